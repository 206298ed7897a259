//! Stock handlers for composing chains.

use super::{BoxFuture, HandlerContext, MibHandler, Outcome, RequestError};
use crate::error::ErrorStatus;

/// Handler built from a synchronous closure. See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> MibHandler for FnHandler<F>
where
    F: Fn(&mut HandlerContext<'_>) -> Outcome + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a mut HandlerContext<'_>) -> BoxFuture<'a, Outcome> {
        let outcome = (self.f)(ctx);
        Box::pin(std::future::ready(outcome))
    }
}

/// Wrap a closure as a handler.
///
/// ```rust
/// use async_snmp_agent::handler::{Outcome, handler_fn};
/// use async_snmp_agent::Value;
///
/// let constant = handler_fn(|ctx| {
///     for request in ctx.pending_mut() {
///         request.satisfy(Value::Integer(1));
///     }
///     Outcome::Done
/// });
/// # let _ = constant;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut HandlerContext<'_>) -> Outcome + Send + Sync + 'static,
{
    FnHandler { f }
}

/// Rejects every SET phase with notWritable; passes reads on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnly;

impl MibHandler for ReadOnly {
    fn handle<'a>(&'a self, ctx: &'a mut HandlerContext<'_>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if ctx.mode().is_set() {
                Outcome::Fail(RequestError::Handler(ErrorStatus::NotWritable))
            } else {
                Outcome::Continue
            }
        })
    }
}

/// Logs each pass through the chain, before and after the nodes below it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tracer;

impl MibHandler for Tracer {
    fn handle<'a>(&'a self, ctx: &'a mut HandlerContext<'_>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            tracing::debug!(
                snmp.registration = %ctx.registration().name(),
                snmp.handler = %ctx.node_name(),
                snmp.batch_id = %ctx.batch_id(),
                snmp.mode = %ctx.mode(),
                snmp.request_count = ctx.pending_count(),
                resumed = ctx.is_resumed(),
                "entering chain"
            );

            let result = ctx.call_next().await;

            tracing::debug!(
                snmp.registration = %ctx.registration().name(),
                snmp.handler = %ctx.node_name(),
                snmp.batch_id = %ctx.batch_id(),
                snmp.request_count = ctx.pending_count(),
                ?result,
                "leaving chain"
            );
            Outcome::Continue
        })
    }
}
