//! Common test fixtures and constants.

use async_snmp_agent::{Oid, oid};

// =============================================================================
// Standard system MIB OIDs (1.3.6.1.2.1.1.*)
// =============================================================================

pub fn sys_descr() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)
}
pub fn sys_uptime() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 3, 0)
}
pub fn sys_contact() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 4, 0)
}
pub fn sys_name() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)
}

// =============================================================================
// Subtree roots (for registrations)
// =============================================================================

/// System subtree root: 1.3.6.1.2.1.1
pub fn system_subtree() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1)
}

/// Interfaces subtree root: 1.3.6.1.2.1.2
pub fn interfaces_subtree() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 2)
}

/// ifTable entry root: 1.3.6.1.2.1.2.2.1
pub fn if_entry() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 2, 2, 1)
}

/// ifDescr column instance for interface `index`.
pub fn if_descr(index: u32) -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, index)
}

/// Enterprise subtree used by custom handlers: 1.3.6.1.4.1.99999
pub fn enterprise_subtree() -> Oid {
    oid!(1, 3, 6, 1, 4, 1, 99999)
}

// =============================================================================
// Test OIDs
// =============================================================================

/// Nonexistent OID for testing NoSuchObject/NoSuchInstance
pub fn nonexistent_oid() -> Oid {
    oid!(1, 3, 6, 1, 99, 99, 99, 0)
}

/// Non-default processing context.
pub const CONTEXT_BRIDGE: &[u8] = b"bridge1";
