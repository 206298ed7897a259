//! Handler-chain request dispatch for async SNMP agents.
//!
//! This crate is the part of an SNMP agent that sits between the decoded,
//! already-authenticated request and the code that actually knows the
//! managed objects. Wire encoding, transports and security processing live
//! elsewhere; here a request batch is routed to the registration owning its
//! OIDs and walked through that registration's chain of handlers.
//!
//! # Concepts
//!
//! - A [`Registration`](agent::Registration) binds an OID subtree, optionally
//!   in a named context, to a [`HandlerChain`](handler::HandlerChain).
//! - The [`Registry`](agent::Registry) resolves OIDs to registrations by
//!   longest prefix, then priority.
//! - Handlers implement [`MibHandler`](handler::MibHandler) and steer the walk
//!   with an [`Outcome`](handler::Outcome): continue, skip ahead, stop, fail or
//!   delegate.
//! - A delegating handler parks the batch behind a
//!   [`Suspension`](agent::Suspension) that an external event source resumes
//!   later. Timeouts and cancellation still reach the batch while it is
//!   parked.
//! - Handlers keep per-request and per-transaction state in
//!   [`ExtensionData`](agent::ExtensionData), released when the transaction
//!   ends.
//! - [`Agent`](agent::Agent) ties it together for whole PDUs: GET, GETNEXT,
//!   GETBULK and multi-phase SET.
//!
//! # Example
//!
//! ```rust
//! use async_snmp_agent::agent::{Agent, AgentRequest, Registration};
//! use async_snmp_agent::handler::{Outcome, handler_fn};
//! use async_snmp_agent::{Value, oid};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> async_snmp_agent::Result<()> {
//! let uptime = handler_fn(|ctx| {
//!     for request in ctx.pending_mut() {
//!         request.satisfy(Value::TimeTicks(4200));
//!     }
//!     Outcome::Done
//! });
//!
//! let agent = Agent::builder()
//!     .register(
//!         Registration::builder("sysUpTime", oid!(1, 3, 6, 1, 2, 1, 1, 3))
//!             .handler("uptime", uptime)
//!             .build()?,
//!     )
//!     .build()?;
//!
//! let response = agent
//!     .process(AgentRequest::get([oid!(1, 3, 6, 1, 2, 1, 1, 3, 0)]))
//!     .await;
//! assert_eq!(response.varbinds[0].value, Value::TimeTicks(4200));
//! # Ok(())
//! # }
//! ```
//!
//! # Tracing
//!
//! The crate emits [`tracing`] events and never installs a subscriber.
//! Fields use an `snmp.` prefix so they can be filtered together:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `snmp.registration` | Registration name |
//! | `snmp.context` | Processing context (`""` for the default) |
//! | `snmp.batch_id` | Process-unique batch identifier |
//! | `snmp.mode` | Processing mode, e.g. `getnext`, `set-action` |
//! | `snmp.handler` | Chain node name |
//! | `snmp.request_count` | Requests in the batch |
//! | `snmp.oid` | Request OID |
//!
//! Levels: ERROR for handler contract violations, WARN for timeouts and
//! cancellations, DEBUG for dispatch, suspension and resumption, TRACE for
//! each handler invocation.

pub mod agent;
pub mod error;
pub mod handler;
pub mod oid;
pub mod prelude;
pub mod value;
pub mod varbind;

pub use error::{Error, ErrorStatus, NotFoundKind, OidErrorKind, Result};
pub use oid::Oid;
pub use value::Value;
pub use varbind::VarBind;
