//! Handler context passed to each node of a walk.

use std::any::Any;
use std::sync::Arc;

use crate::agent::dispatch::{Scope, Step, walk};
use crate::agent::{BatchId, Mode, Registration, Request, RequestBatch, Suspension, Transaction};

use super::{ChainResult, NodeId};

/// View of the walk a handler is invoked in.
///
/// Gives access to the node's own data, the registration being walked, the
/// transaction and the request batch. It also carries the two ways of
/// steering the walk from inside a handler: [`call_next`](Self::call_next)
/// for nested descent, and [`suspension`](Self::suspension) for delegation.
pub struct HandlerContext<'w> {
    scope: Scope<'w>,
    node: NodeId,
    transaction: &'w mut Transaction,
    batch: &'w mut RequestBatch,
    nested: Option<Step>,
}

impl<'w> HandlerContext<'w> {
    pub(crate) fn new(
        scope: Scope<'w>,
        node: NodeId,
        transaction: &'w mut Transaction,
        batch: &'w mut RequestBatch,
    ) -> Self {
        Self {
            scope,
            node,
            transaction,
            batch,
            nested: None,
        }
    }

    pub(crate) fn take_nested(&mut self) -> Option<Step> {
        self.nested.take()
    }

    /// Name of the node being invoked.
    pub fn node_name(&self) -> &str {
        self.scope.registration.chain().node(self.node).name()
    }

    /// The node's own data, if it has data of type `T`.
    pub fn node_data<T: Any>(&self) -> Option<&T> {
        self.scope.registration.chain().node(self.node).data::<T>()
    }

    /// Registration whose chain is being walked.
    pub fn registration(&self) -> &Arc<Registration> {
        self.scope.registration
    }

    /// Mode handlers should act on.
    pub fn mode(&self) -> Mode {
        self.transaction.mode()
    }

    pub fn transaction(&self) -> &Transaction {
        &*self.transaction
    }

    pub fn transaction_mut(&mut self) -> &mut Transaction {
        &mut *self.transaction
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch.id()
    }

    /// All requests of the batch, in order.
    pub fn requests(&self) -> &[Request] {
        self.batch.requests()
    }

    pub fn requests_mut(&mut self) -> &mut [Request] {
        self.batch.requests_mut()
    }

    /// Requests not yet satisfied or errored.
    pub fn pending(&self) -> impl Iterator<Item = &Request> {
        self.batch.requests().iter().filter(|r| r.is_pending())
    }

    pub fn pending_mut(&mut self) -> impl Iterator<Item = &mut Request> {
        self.batch
            .requests_mut()
            .iter_mut()
            .filter(|r| r.is_pending())
    }

    pub fn pending_count(&self) -> usize {
        self.batch.pending_count()
    }

    /// Request at batch position `i`.
    pub fn request_mut(&mut self, i: usize) -> Option<&mut Request> {
        self.batch.requests_mut().get_mut(i)
    }

    /// Returns `true` if this walk is the continuation of a delegated one.
    pub fn is_resumed(&self) -> bool {
        self.scope.resumed.is_some()
    }

    /// State carried over from the delegating handler (or the resumer).
    pub fn continuation<T: Any>(&self) -> Option<&T> {
        self.scope.resumed?.get::<T>()
    }

    /// Handle the external event source uses to resume the batch.
    ///
    /// Only useful together with returning [`Outcome::Delegate`](super::Outcome::Delegate):
    /// if the walk ends any other way, resuming fails with `StaleContext`.
    pub fn suspension(&self) -> Suspension {
        self.scope.tracker.suspension()
    }

    /// Run the rest of the chain now and report how it went.
    ///
    /// The handler's own return value is combined with this result: returning
    /// [`Outcome::Continue`](super::Outcome::Continue) adopts it unchanged, so a
    /// handler can do work on both sides of the rest of the chain. Calling it
    /// again does not rerun anything.
    pub async fn call_next(&mut self) -> ChainResult {
        if let Some(step) = &self.nested {
            return step.summary();
        }
        let next = self.scope.registration.chain().next_of(self.node);
        let step = walk(self.scope, next, &mut *self.transaction, &mut *self.batch).await;
        let result = step.summary();
        self.nested = Some(step);
        result
    }

    /// Walk another registration's chain over this batch, from its head.
    ///
    /// Used to fall through to a broader registration (see
    /// [`Registry::find_fallback`](crate::agent::Registry::find_fallback)).
    /// The result is combined with the handler's outcome like
    /// [`call_next`](Self::call_next).
    pub async fn dispatch_to(&mut self, registration: &Arc<Registration>) -> ChainResult {
        if let Some(step) = &self.nested {
            return step.summary();
        }
        tracing::debug!(
            snmp.registration = %self.scope.registration.name(),
            snmp.handler = %self.node_name(),
            target = %registration.name(),
            "falling through to registration"
        );
        let scope = Scope::new(registration, self.scope.tracker, self.scope.resumed);
        let head = registration.chain().head();
        let step = walk(scope, head, &mut *self.transaction, &mut *self.batch).await;
        let result = step.summary();
        self.nested = Some(step);
        result
    }
}

impl std::fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("registration", &self.scope.registration.name())
            .field("node", &self.node_name())
            .field("batch_id", &self.batch.id())
            .field("mode", &self.transaction.mode())
            .finish()
    }
}
