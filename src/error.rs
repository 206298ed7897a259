//! Error types for async-snmp-agent.
//!
//! Two layers of failure exist in the agent core:
//!
//! - [`Error`] is returned synchronously to whoever calls a registry, chain,
//!   extension-data or suspension operation. It is never retried internally.
//! - [`RequestError`](crate::handler::RequestError) is attached to an individual
//!   request as its terminal status and later translated into an
//!   [`ErrorStatus`] or exception value for the response.
//!
//! All public enums are `#[non_exhaustive]` where new variants are expected.

use crate::agent::BatchId;
use crate::oid::Oid;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// OID validation error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OidErrorKind {
    /// Empty OID string.
    Empty,
    /// Invalid arc value.
    InvalidArc,
    /// OID has too many arcs (exceeds MAX_OID_LEN).
    TooManyArcs { count: usize, max: usize },
}

impl std::fmt::Display for OidErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty OID"),
            Self::InvalidArc => write!(f, "invalid arc value"),
            Self::TooManyArcs { count, max } => {
                write!(f, "OID has {} arcs, exceeds maximum {}", count, max)
            }
        }
    }
}

/// What a failed lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    /// No registration with this name in the context.
    Registration,
    /// No registration covers this OID in the context.
    Subtree,
    /// No handler node with this name in the chain.
    Handler,
    /// No extension-data entry with this name.
    Data,
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registration => write!(f, "registration"),
            Self::Subtree => write!(f, "subtree"),
            Self::Handler => write!(f, "handler"),
            Self::Data => write!(f, "extension data"),
        }
    }
}

/// SNMP error status codes (RFC 3416).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorStatus {
    NoError,
    TooBig,
    NoSuchName,
    BadValue,
    ReadOnly,
    GenErr,
    NoAccess,
    WrongType,
    WrongLength,
    WrongEncoding,
    WrongValue,
    NoCreation,
    InconsistentValue,
    ResourceUnavailable,
    CommitFailed,
    UndoFailed,
    AuthorizationError,
    NotWritable,
    InconsistentName,
    /// Unknown/future error status code.
    Unknown(i32),
}

impl ErrorStatus {
    /// Create from raw status code.
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::NoError,
            1 => Self::TooBig,
            2 => Self::NoSuchName,
            3 => Self::BadValue,
            4 => Self::ReadOnly,
            5 => Self::GenErr,
            6 => Self::NoAccess,
            7 => Self::WrongType,
            8 => Self::WrongLength,
            9 => Self::WrongEncoding,
            10 => Self::WrongValue,
            11 => Self::NoCreation,
            12 => Self::InconsistentValue,
            13 => Self::ResourceUnavailable,
            14 => Self::CommitFailed,
            15 => Self::UndoFailed,
            16 => Self::AuthorizationError,
            17 => Self::NotWritable,
            18 => Self::InconsistentName,
            other => Self::Unknown(other),
        }
    }

    /// Convert to raw status code.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::NoError => 0,
            Self::TooBig => 1,
            Self::NoSuchName => 2,
            Self::BadValue => 3,
            Self::ReadOnly => 4,
            Self::GenErr => 5,
            Self::NoAccess => 6,
            Self::WrongType => 7,
            Self::WrongLength => 8,
            Self::WrongEncoding => 9,
            Self::WrongValue => 10,
            Self::NoCreation => 11,
            Self::InconsistentValue => 12,
            Self::ResourceUnavailable => 13,
            Self::CommitFailed => 14,
            Self::UndoFailed => 15,
            Self::AuthorizationError => 16,
            Self::NotWritable => 17,
            Self::InconsistentName => 18,
            Self::Unknown(code) => *code,
        }
    }
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoError => write!(f, "noError"),
            Self::TooBig => write!(f, "tooBig"),
            Self::NoSuchName => write!(f, "noSuchName"),
            Self::BadValue => write!(f, "badValue"),
            Self::ReadOnly => write!(f, "readOnly"),
            Self::GenErr => write!(f, "genErr"),
            Self::NoAccess => write!(f, "noAccess"),
            Self::WrongType => write!(f, "wrongType"),
            Self::WrongLength => write!(f, "wrongLength"),
            Self::WrongEncoding => write!(f, "wrongEncoding"),
            Self::WrongValue => write!(f, "wrongValue"),
            Self::NoCreation => write!(f, "noCreation"),
            Self::InconsistentValue => write!(f, "inconsistentValue"),
            Self::ResourceUnavailable => write!(f, "resourceUnavailable"),
            Self::CommitFailed => write!(f, "commitFailed"),
            Self::UndoFailed => write!(f, "undoFailed"),
            Self::AuthorizationError => write!(f, "authorizationError"),
            Self::NotWritable => write!(f, "notWritable"),
            Self::InconsistentName => write!(f, "inconsistentName"),
            Self::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

/// Library error type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A registration already covers this (subtree, context) pair.
    #[error("duplicate registration for subtree {subtree} in context {context:?}")]
    DuplicateSubtree { subtree: Oid, context: Box<str> },

    /// A registration with this name already exists in the context.
    #[error("duplicate registration name {name:?} in context {context:?}")]
    DuplicateRegistration { name: Box<str>, context: Box<str> },

    /// A handler node with this name already exists in the chain.
    #[error("duplicate handler name {name:?} in chain")]
    DuplicateHandler { name: Box<str> },

    /// An extension-data entry with this name is already attached.
    #[error("extension data {name:?} already attached")]
    DuplicateName { name: Box<str> },

    /// Lookup miss.
    #[error("{kind} not found: {key}")]
    NotFound { kind: NotFoundKind, key: Box<str> },

    /// Extension data exists but holds a different type.
    #[error("extension data {name:?} has a different type")]
    DataTypeMismatch { name: Box<str> },

    /// Range registration does not address a valid sub-identifier.
    #[error("invalid range: range_subid {range_subid} (ubound {range_ubound}) outside root of {root_len} arcs")]
    InvalidRange {
        range_subid: usize,
        range_ubound: u32,
        root_len: usize,
    },

    /// A registration was built without any handler.
    #[error("registration {name:?} has an empty handler chain")]
    EmptyChain { name: Box<str> },

    /// The batch behind this suspension was destroyed (timeout or cancellation).
    #[error("suspension context for batch {batch_id} is stale")]
    StaleContext { batch_id: BatchId },

    /// The suspension was already resumed.
    #[error("suspension context for batch {batch_id} was already resumed")]
    AlreadyResumed { batch_id: BatchId },

    /// Invalid OID format.
    #[error("invalid OID: {kind}")]
    InvalidOid {
        kind: OidErrorKind,
        input: Option<Box<str>>, // Only allocated when parsing string input
    },
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(kind: NotFoundKind, key: impl Into<Box<str>>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Create an invalid OID error from a kind (no input string).
    pub fn invalid_oid(kind: OidErrorKind) -> Self {
        Self::InvalidOid { kind, input: None }
    }

    /// Create an invalid OID error with the input string that failed.
    pub fn invalid_oid_with_input(kind: OidErrorKind, input: impl Into<Box<str>>) -> Self {
        Self::InvalidOid {
            kind,
            input: Some(input.into()),
        }
    }

    /// Returns `true` for any lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Render a context name for diagnostics.
pub(crate) fn context_label(context: &[u8]) -> Box<str> {
    String::from_utf8_lossy(context).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_roundtrip_codes() {
        for code in 0..=18 {
            assert_eq!(ErrorStatus::from_i32(code).as_i32(), code);
        }
        assert_eq!(ErrorStatus::from_i32(99), ErrorStatus::Unknown(99));
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found(NotFoundKind::Handler, "serialize");
        assert_eq!(err.to_string(), "handler not found: serialize");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_range_display() {
        let err = Error::InvalidRange {
            range_subid: 12,
            range_ubound: 10,
            root_len: 9,
        };
        assert!(err.to_string().contains("range_subid 12"));
    }

    #[test]
    fn test_context_label_lossy() {
        assert_eq!(&*context_label(b"bridge1"), "bridge1");
        assert_eq!(&*context_label(b""), "");
    }
}
