//! Handler types and traits for building MIB handler chains.
//!
//! This module provides the extension point of the agent core:
//!
//! - [`MibHandler`] - Trait implemented by every node of a chain
//! - [`HandlerContext`] - The walk a handler is invoked in
//! - [`Outcome`] - What the handler wants the walk to do next
//! - [`HandlerChain`], [`HandlerNode`], [`Position`] - Ordered chains of named nodes
//! - [`RequestError`], [`Response`] - Per-request errors and the merged response
//! - [`TableHandler`], [`ReadOnly`], [`Tracer`], [`handler_fn`] - Stock handlers
//!
//! # Overview
//!
//! A [`Registration`](crate::agent::Registration) binds an OID subtree to a
//! chain. When a batch is dispatched, the chain is walked from its head and
//! each handler decides, through its [`Outcome`], what happens next:
//!
//! - [`Outcome::Continue`] passes the batch to the next node.
//! - [`Outcome::SkipTo`] jumps ahead to a later node by name.
//! - [`Outcome::Done`] stops the walk successfully.
//! - [`Outcome::Fail`] errors every pending request.
//! - [`Outcome::Delegate`] parks the batch until something calls
//!   [`Suspension::resume`](crate::agent::Suspension::resume).
//!
//! Handlers can also run the rest of the chain themselves with
//! [`HandlerContext::call_next`] and do work afterwards.
//!
//! # Basic Chain Example
//!
//! A logging node followed by a leaf that answers from a table:
//!
//! ```rust
//! use async_snmp_agent::agent::Registration;
//! use async_snmp_agent::handler::{TableHandler, Tracer};
//! use async_snmp_agent::{Value, oid};
//!
//! let table = TableHandler::new();
//! table.insert(oid!(1, 3, 6, 1, 4, 1, 99999, 1, 0), Value::Integer(42));
//!
//! let registration = Registration::builder("example", oid!(1, 3, 6, 1, 4, 1, 99999))
//!     .handler("trace", Tracer)
//!     .handler("table", table)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(registration.chain().names(), vec!["trace", "table"]);
//! ```
//!
//! # SET Phases
//!
//! SET requests reach handlers once per phase: SetReserve, SetAction,
//! SetCommit and SetCleanup, with SetUndo run after a failed action. The
//! requests of a transaction keep their extension data across phases, so a
//! handler can stash undo information during SetAction and read it back in
//! SetUndo. See [`TableHandler`] for a complete example.

mod chain;
mod context;
mod helpers;
mod results;
mod table;
mod traits;

pub use chain::{HandlerChain, HandlerNode, NodeId, Position};
pub use context::HandlerContext;
pub use helpers::{FnHandler, ReadOnly, Tracer, handler_fn};
pub use results::{RequestError, Response};
pub use table::TableHandler;
pub use traits::{BoxFuture, ChainResult, Continuation, MibHandler, Outcome};
