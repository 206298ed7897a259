//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust
//! use async_snmp_agent::prelude::*;
//! ```
//!
//! This imports:
//! - Core types: [`Oid`], [`Value`], [`VarBind`]
//! - Error handling: [`Error`], [`Result`]
//! - Agent surface: [`Agent`], [`AgentRequest`], [`Registration`], [`Registry`]
//! - Handler surface: [`MibHandler`], [`HandlerContext`], [`Outcome`], [`BoxFuture`]
//! - The [`oid!`] macro for OID construction

pub use crate::agent::{Agent, AgentRequest, Mode, Registration, Registry, Suspension};
pub use crate::error::{Error, ErrorStatus, Result};
pub use crate::handler::{
    BoxFuture, HandlerContext, MibHandler, Outcome, RequestError, Response, handler_fn,
};
pub use crate::oid::Oid;
pub use crate::value::Value;
pub use crate::varbind::VarBind;

#[doc(no_inline)]
pub use crate::oid;
