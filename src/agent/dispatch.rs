//! Dispatch engine.
//!
//! [`Dispatcher::dispatch`] walks one registration's chain for one batch:
//!
//! 1. Extension-data stores get the configured duplicate policy.
//! 2. The batch is prepared against the registration: SET phases on a
//!    registration without [`Modes::SET`](super::Modes::SET) fail with
//!    notWritable, GETBULK without [`Modes::BULK`](super::Modes::BULK) is walked
//!    as GETNEXT, and range registrations fail requests whose range arc falls
//!    outside `[1, ubound]` with `OutOfRange`. Next-style requests sorting
//!    before the first row are left for the chain to walk forward from.
//! 3. The chain is walked from its head. Each handler's [`Outcome`] decides
//!    the next node.
//! 4. The walk's final step either completes the batch or parks it behind a
//!    [`Suspension`](super::Suspension).
//!
//! Completion applies the terminal-state rules: a chain that stops with
//! requests still pending broke the handler contract, so those requests fail
//! with `Internal` and the violation is logged at ERROR. Extension data is
//! released once the transaction's final phase completes, or immediately on
//! timeout and cancellation.

use std::sync::Arc;
use std::time::Duration;

use crate::error::context_label;
use crate::handler::{
    BoxFuture, ChainResult, Continuation, HandlerContext, HandlerNode, NodeId, Outcome,
    RequestError,
};

use super::extension::DuplicatePolicy;
use super::registry::{Modes, Registration};
use super::request::{BatchStatus, CompletedBatch, Mode, RequestBatch, Transaction};
use super::suspend::{Completion, Settled, Suspension, Tracker};

/// Dispatcher configuration.
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Suspension timeout for registrations that do not set their own.
    ///
    /// `None` lets a suspended batch wait until it is resumed or cancelled.
    pub default_timeout: Option<Duration>,
    /// How extension-data stores treat a repeated name.
    pub duplicate_data: DuplicatePolicy,
}

/// Result of dispatching a batch.
#[derive(Debug)]
pub enum Dispatch {
    /// The batch reached a terminal state without suspending.
    Complete(CompletedBatch),
    /// A handler delegated; the batch is parked.
    Suspended {
        /// Handle for the event source that will resume the batch.
        suspension: Suspension,
        /// Resolves when the batch reaches its terminal state.
        completion: Completion,
    },
}

impl Dispatch {
    /// Returns `true` if a handler delegated and the batch is parked.
    pub fn is_suspended(&self) -> bool {
        matches!(self, Dispatch::Suspended { .. })
    }

    /// Wait for the terminal state, however it is reached.
    ///
    /// The returned suspension handle is dropped before waiting; the batch can
    /// still be resumed through handles obtained by handlers. If none remain
    /// and no timeout is pending, this fails with `StaleContext`.
    pub async fn finish(self) -> crate::Result<CompletedBatch> {
        match self {
            Dispatch::Complete(completed) => Ok(completed),
            Dispatch::Suspended {
                suspension,
                completion,
            } => {
                drop(suspension);
                completion.wait().await
            }
        }
    }
}

/// Walks handler chains for request batches.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher with the given configuration.
    pub fn new(config: DispatcherConfig) -> Self {
        Self { config }
    }

    /// The configuration this dispatcher was created with.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Dispatch `batch` through `registration`'s chain.
    ///
    /// Must be called from within a Tokio runtime when a suspension timeout
    /// applies, since the timeout runs as a spawned task.
    pub async fn dispatch(
        &self,
        registration: Arc<Registration>,
        mut transaction: Transaction,
        mut batch: RequestBatch,
    ) -> Dispatch {
        transaction.data_mut().set_policy(self.config.duplicate_data);
        batch.set_data_policy(self.config.duplicate_data);

        let timeout = registration.timeout().or(self.config.default_timeout);
        let (tracker, done_rx) = Tracker::new(batch.id(), registration.clone(), timeout);

        tracing::debug!(
            snmp.registration = %registration.name(),
            snmp.context = %context_label(&transaction.context_name),
            snmp.batch_id = %batch.id(),
            snmp.mode = %transaction.mode(),
            snmp.request_count = batch.len(),
            "dispatching batch"
        );

        let step = match prepare(&registration, &mut transaction, &mut batch) {
            Some(step) => step,
            None => {
                let scope = Scope::new(&registration, &tracker, None);
                walk(
                    scope,
                    registration.chain().head(),
                    &mut transaction,
                    &mut batch,
                )
                .await
            }
        };

        match tracker.settle(step, transaction, batch) {
            Settled::Finished(completed) => Dispatch::Complete(completed),
            Settled::Parked(suspension) => Dispatch::Suspended {
                suspension,
                completion: Completion::new(&tracker, done_rx),
            },
        }
    }
}

/// Apply registration-level rules before walking.
///
/// Returns the step to settle with when the chain must not run at all.
fn prepare(
    registration: &Registration,
    transaction: &mut Transaction,
    batch: &mut RequestBatch,
) -> Option<Step> {
    let mode = transaction.mode();

    if mode.is_set() && !registration.modes().contains(Modes::SET) {
        tracing::debug!(
            snmp.registration = %registration.name(),
            snmp.batch_id = %batch.id(),
            "registration does not accept set"
        );
        return Some(Step::Failed(RequestError::Handler(
            crate::error::ErrorStatus::NotWritable,
        )));
    }

    if mode == Mode::GetBulk && !registration.modes().contains(Modes::BULK) {
        transaction.downgrade(Mode::GetNext);
    }

    if let Some(range) = registration.range() {
        let lower = registration.lower_bound();
        for request in batch.requests_mut() {
            // A next-style request sorting before the first row starts the walk
            // at that row instead of being out of range.
            if mode.is_next() && *request.oid() < lower {
                continue;
            }
            if request.is_pending() && !range.accepts(request.oid()) {
                request.fail(RequestError::OutOfRange);
            }
        }
    }

    if batch.pending_count() == 0 {
        return Some(Step::Done);
    }
    None
}

/// Borrowed state shared by every node of one walk.
#[derive(Clone, Copy)]
pub(crate) struct Scope<'a> {
    pub(crate) registration: &'a Arc<Registration>,
    pub(crate) tracker: &'a Arc<Tracker>,
    pub(crate) resumed: Option<&'a Continuation>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        registration: &'a Arc<Registration>,
        tracker: &'a Arc<Tracker>,
        resumed: Option<&'a Continuation>,
    ) -> Self {
        Self {
            registration,
            tracker,
            resumed,
        }
    }
}

/// Where a walk stopped.
#[derive(Debug)]
pub(crate) enum Step {
    /// Ran past the tail.
    EndOfChain,
    Done,
    Failed(RequestError),
    Delegated {
        registration: Arc<Registration>,
        node: NodeId,
        resume_at: Option<NodeId>,
        continuation: Continuation,
    },
    /// Handler contract violation.
    Violation(String),
}

impl Step {
    pub(crate) fn summary(&self) -> ChainResult {
        match self {
            Step::EndOfChain | Step::Done => ChainResult::Finished,
            Step::Failed(err) => ChainResult::Failed(*err),
            Step::Delegated { .. } => ChainResult::Delegated,
            Step::Violation(_) => ChainResult::Failed(RequestError::Internal),
        }
    }

    fn delegated(scope: Scope<'_>, node: NodeId, continuation: Continuation) -> Self {
        Step::Delegated {
            registration: scope.registration.clone(),
            node,
            resume_at: scope.registration.chain().next_of(node),
            continuation,
        }
    }
}

/// Walk a chain from `start` until a handler stops it or the tail is passed.
pub(crate) fn walk<'a>(
    scope: Scope<'a>,
    start: Option<NodeId>,
    transaction: &'a mut Transaction,
    batch: &'a mut RequestBatch,
) -> BoxFuture<'a, Step> {
    Box::pin(async move {
        let chain = scope.registration.chain();
        let mut cursor = start;

        while let Some(id) = cursor {
            let node = chain.node(id);
            tracing::trace!(
                snmp.registration = %scope.registration.name(),
                snmp.handler = %node.name(),
                snmp.batch_id = %batch.id(),
                snmp.mode = %transaction.mode(),
                "invoking handler"
            );

            let mut ctx = HandlerContext::new(scope, id, &mut *transaction, &mut *batch);
            let outcome = node.handler().handle(&mut ctx).await;

            if let Some(inner) = ctx.take_nested() {
                return merge_nested(scope, node, id, outcome, inner);
            }

            cursor = match outcome {
                Outcome::Continue => chain.next_of(id),
                Outcome::SkipTo(target) => match chain.find_after(id, &target) {
                    Some(next) => Some(next),
                    None => {
                        return Step::Violation(format!(
                            "handler {} skipped to {:?}, which is not a later node",
                            node.name(),
                            target
                        ));
                    }
                },
                Outcome::Delegate(continuation) => {
                    return Step::delegated(scope, id, continuation);
                }
                Outcome::Done => return Step::Done,
                Outcome::Fail(err) => return Step::Failed(err),
            };
        }

        Step::EndOfChain
    })
}

/// Combine a handler's outcome with the rest-of-chain walk it ran itself.
fn merge_nested(
    scope: Scope<'_>,
    node: &HandlerNode,
    id: NodeId,
    outcome: Outcome,
    inner: Step,
) -> Step {
    match (outcome, inner) {
        (Outcome::Fail(err), _) => Step::Failed(err),
        (Outcome::SkipTo(target), _) => Step::Violation(format!(
            "handler {} skipped to {:?} after running the rest of the chain",
            node.name(),
            target
        )),
        (_, inner @ (Step::Failed(_) | Step::Violation(_) | Step::Delegated { .. })) => inner,
        (Outcome::Delegate(continuation), _) => Step::Delegated {
            registration: scope.registration.clone(),
            node: id,
            resume_at: None,
            continuation,
        },
        (Outcome::Done, _) => Step::Done,
        (Outcome::Continue, inner) => inner,
    }
}

/// How a batch reached its terminal state.
#[derive(Debug)]
pub(crate) enum Ending {
    /// The walk stopped normally (`Done` or end of chain).
    Finished,
    Failed(RequestError),
    Violation(String),
    Timeout,
    Cancelled,
}

impl Ending {
    /// Terminal ending for a non-delegated step.
    pub(crate) fn from_step(step: Step) -> Self {
        match step {
            Step::EndOfChain | Step::Done => Ending::Finished,
            Step::Failed(err) => Ending::Failed(err),
            Step::Violation(reason) => Ending::Violation(reason),
            Step::Delegated { .. } => {
                Ending::Violation("delegated step reached completion".to_owned())
            }
        }
    }
}

/// Put a batch into its terminal state and release what must be released.
pub(crate) fn finalize(
    registration: &Registration,
    ending: Ending,
    mut transaction: Transaction,
    mut batch: RequestBatch,
) -> CompletedBatch {
    let status = match ending {
        Ending::Finished => {
            let unhandled = batch.fail_unfinished(RequestError::Internal);
            if unhandled > 0 {
                tracing::error!(
                    snmp.registration = %registration.name(),
                    snmp.batch_id = %batch.id(),
                    snmp.mode = %transaction.mode(),
                    snmp.request_count = unhandled,
                    "incomplete handling: chain finished with pending requests"
                );
                BatchStatus::Failed(RequestError::Internal)
            } else {
                BatchStatus::Done
            }
        }
        Ending::Failed(err) => {
            batch.fail_unfinished(err);
            BatchStatus::Failed(err)
        }
        Ending::Violation(reason) => {
            let unhandled = batch.fail_unfinished(RequestError::Internal);
            tracing::error!(
                snmp.registration = %registration.name(),
                snmp.batch_id = %batch.id(),
                snmp.request_count = unhandled,
                %reason,
                "handler contract violation"
            );
            BatchStatus::Failed(RequestError::Internal)
        }
        Ending::Timeout => {
            batch.fail_unfinished(RequestError::Timeout);
            BatchStatus::Failed(RequestError::Timeout)
        }
        Ending::Cancelled => {
            batch.fail_unfinished(RequestError::Cancelled);
            BatchStatus::Failed(RequestError::Cancelled)
        }
    };

    let aborted = matches!(
        status,
        BatchStatus::Failed(RequestError::Timeout | RequestError::Cancelled)
    );
    let released = if transaction.mode().is_final() || aborted {
        batch.release_all() + transaction.data_mut().release_all()
    } else {
        0
    };

    tracing::debug!(
        snmp.registration = %registration.name(),
        snmp.batch_id = %batch.id(),
        snmp.mode = %transaction.mode(),
        ?status,
        released,
        "batch complete"
    );
    CompletedBatch::new(transaction, batch, status)
}
