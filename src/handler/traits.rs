//! MibHandler trait and related types.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use super::{HandlerContext, RequestError};

/// Type alias for boxed async return type (dyn-compatible).
///
/// Async trait methods cannot be object-safe, so handler methods return
/// `BoxFuture` to allow handlers to be stored as trait objects in a chain.
///
/// # Example
///
/// ```rust
/// use async_snmp_agent::handler::{BoxFuture, Outcome};
///
/// fn finish<'a>(done: &'a bool) -> BoxFuture<'a, Outcome> {
///     Box::pin(async move {
///         if *done { Outcome::Done } else { Outcome::Continue }
///     })
/// }
/// ```
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One node's logic in a handler chain.
///
/// The dispatcher calls [`handle`](MibHandler::handle) once per walk that
/// reaches the node. The handler inspects the batch through the
/// [`HandlerContext`], satisfies or fails requests, and returns an
/// [`Outcome`] telling the dispatcher how to proceed.
///
/// # Waiting on external events
///
/// A handler never blocks waiting for something outside the agent. To wait,
/// it returns [`Outcome::Delegate`], hands a [`Suspension`](crate::agent::Suspension)
/// (from [`HandlerContext::suspension`]) to whatever will produce the answer,
/// and lets the dispatcher park the batch. Resuming re-enters the chain at the
/// node after the delegating one.
///
/// # Nested style
///
/// Instead of returning [`Outcome::Continue`], a handler may await
/// [`HandlerContext::call_next`] to run the rest of the chain and then do
/// post-processing. Both styles are observably equivalent.
///
/// # Bounds
///
/// Handlers are stored as `Arc<dyn MibHandler>` in chains shared between
/// concurrent batches, hence `Send + Sync + 'static`.
///
/// # Example
///
/// ```rust
/// use async_snmp_agent::handler::{BoxFuture, HandlerContext, MibHandler, Outcome, RequestError};
/// use async_snmp_agent::Value;
///
/// struct Uptime(u32);
///
/// impl MibHandler for Uptime {
///     fn handle<'a>(&'a self, ctx: &'a mut HandlerContext<'_>) -> BoxFuture<'a, Outcome> {
///         Box::pin(async move {
///             if ctx.mode().is_set() {
///                 return Outcome::Fail(RequestError::Handler(
///                     async_snmp_agent::ErrorStatus::NotWritable,
///                 ));
///             }
///             for request in ctx.pending_mut() {
///                 request.satisfy(Value::TimeTicks(self.0));
///             }
///             Outcome::Done
///         })
///     }
/// }
/// ```
pub trait MibHandler: Send + Sync + 'static {
    /// Process the batch for this node.
    fn handle<'a>(&'a self, ctx: &'a mut HandlerContext<'_>) -> BoxFuture<'a, Outcome>;
}

/// What a handler wants the dispatcher to do next.
#[derive(Debug)]
pub enum Outcome {
    /// Advance to the next node.
    Continue,
    /// Advance to the named node, skipping everything in between.
    ///
    /// The node must come later in the chain; anything else is a handler
    /// contract violation and fails the batch.
    SkipTo(Cow<'static, str>),
    /// Park the batch until it is resumed, carrying handler state along.
    Delegate(Continuation),
    /// Stop the walk. Every request must be terminal.
    Done,
    /// Stop the walk and fail every request that is still pending.
    Fail(RequestError),
}

impl Outcome {
    /// Skip ahead to a later node.
    pub fn skip_to(name: impl Into<Cow<'static, str>>) -> Self {
        Outcome::SkipTo(name.into())
    }

    /// Delegate without carrying any state.
    pub fn delegate() -> Self {
        Outcome::Delegate(Continuation::none())
    }

    /// Delegate, carrying `state` to the nodes run on resume.
    pub fn delegate_with<T: Any + Send + Sync>(state: T) -> Self {
        Outcome::Delegate(Continuation::new(state))
    }
}

/// Opaque state carried from a delegating handler to the resumed walk.
#[derive(Default)]
pub struct Continuation {
    state: Option<Box<dyn Any + Send + Sync>>,
}

impl Continuation {
    /// A continuation carrying `state`.
    pub fn new<T: Any + Send + Sync>(state: T) -> Self {
        Self {
            state: Some(Box::new(state)),
        }
    }

    /// A continuation carrying nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Borrow the carried state if it has type `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.state.as_ref()?.downcast_ref::<T>()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none()
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("empty", &self.is_empty())
            .finish()
    }
}

/// Summary of a nested walk started with [`HandlerContext::call_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainResult {
    /// The rest of the chain ran to completion.
    Finished,
    /// A later node delegated; the batch will be parked.
    Delegated,
    /// A later node failed the batch (or broke the handler contract).
    Failed(RequestError),
}
