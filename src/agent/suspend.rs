//! Suspended batches.
//!
//! When a handler returns [`Outcome::Delegate`](crate::handler::Outcome::Delegate)
//! the dispatcher parks the whole batch (transaction, requests, chain snapshot
//! and the handler's continuation) in a per-batch tracker and hands out two
//! handles:
//!
//! - [`Suspension`]: given to the external event source. [`Suspension::resume`]
//!   re-enters the chain at the node after the delegating one.
//! - [`Completion`]: kept by the caller. [`Completion::wait`] resolves with the
//!   [`CompletedBatch`] once the batch is terminal, whether that happens through
//!   resumption, timeout or cancellation.
//!
//! Each walk of a batch has an epoch. A suspension handle is bound to the
//! epoch of the walk that parked; resuming it a second time fails with
//! `AlreadyResumed`, and resuming after the batch timed out or was cancelled
//! fails with `StaleContext`. No lock is held while the batch is parked or
//! while a resumed walk runs.
//!
//! A handler may pass its handle to the event source before the walk has
//! actually parked. A resume that arrives early waits for the park.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::handler::{Continuation, NodeId};

use super::dispatch::{Ending, Scope, Step, finalize, walk};
use super::registry::Registration;
use super::request::{BatchId, CompletedBatch, RequestBatch, Transaction};

/// Everything needed to continue a parked walk.
struct Parked {
    registration: Arc<Registration>,
    resume_at: Option<NodeId>,
    continuation: Continuation,
    transaction: Transaction,
    batch: RequestBatch,
}

enum Phase {
    Running,
    Parked(Box<Parked>),
    Finished,
}

struct TrackerState {
    phase: Phase,
    /// Epoch of the current (or last) walk.
    epoch: u64,
    /// Highest epoch whose park has been resumed.
    resumed_through: u64,
    cancel_requested: bool,
    done_tx: Option<oneshot::Sender<CompletedBatch>>,
    watchdog: Option<CancellationToken>,
}

impl TrackerState {
    fn take_parked(&mut self) -> Option<Box<Parked>> {
        match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Parked(parked) => Some(parked),
            other => {
                self.phase = other;
                None
            }
        }
    }
}

/// Per-batch suspension bookkeeping.
pub(crate) struct Tracker {
    batch_id: BatchId,
    origin: Arc<Registration>,
    timeout: Option<Duration>,
    state: Mutex<TrackerState>,
    parked: Notify,
}

pub(crate) enum Settled {
    Finished(CompletedBatch),
    Parked(Suspension),
}

impl Tracker {
    pub(crate) fn new(
        batch_id: BatchId,
        origin: Arc<Registration>,
        timeout: Option<Duration>,
    ) -> (Arc<Self>, oneshot::Receiver<CompletedBatch>) {
        let (done_tx, done_rx) = oneshot::channel();
        let tracker = Arc::new(Self {
            batch_id,
            origin,
            timeout,
            state: Mutex::new(TrackerState {
                phase: Phase::Running,
                epoch: 1,
                resumed_through: 0,
                cancel_requested: false,
                done_tx: Some(done_tx),
                watchdog: None,
            }),
            parked: Notify::new(),
        });
        (tracker, done_rx)
    }

    pub(crate) fn suspension(self: &Arc<Self>) -> Suspension {
        let epoch = self.state.lock().epoch;
        Suspension {
            tracker: self.clone(),
            epoch,
        }
    }

    fn stale(&self) -> Error {
        Error::StaleContext {
            batch_id: self.batch_id,
        }
    }

    /// Take the parked state for the walk of `epoch`, waiting if that walk
    /// has not parked yet.
    async fn claim(&self, epoch: u64) -> Result<Box<Parked>> {
        loop {
            let notified = self.parked.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if epoch <= state.resumed_through {
                    return Err(Error::AlreadyResumed {
                        batch_id: self.batch_id,
                    });
                }
                if epoch != state.epoch || matches!(state.phase, Phase::Finished) {
                    return Err(self.stale());
                }
                if let Some(parked) = state.take_parked() {
                    state.phase = Phase::Running;
                    state.resumed_through = epoch;
                    state.epoch += 1;
                    if let Some(watchdog) = state.watchdog.take() {
                        watchdog.cancel();
                    }
                    return Ok(parked);
                }
            }

            notified.await;
        }
    }

    /// Park a delegated walk, or finish the batch for any other step.
    pub(crate) fn settle(
        self: &Arc<Self>,
        step: Step,
        transaction: Transaction,
        mut batch: RequestBatch,
    ) -> Settled {
        let (registration, node, resume_at, continuation) = match step {
            Step::Delegated {
                registration,
                node,
                resume_at,
                continuation,
            } => (registration, node, resume_at, continuation),
            other => {
                let cancelled = std::mem::take(&mut self.state.lock().cancel_requested);
                let ending = if cancelled {
                    tracing::warn!(snmp.batch_id = %self.batch_id, "batch cancelled");
                    Ending::Cancelled
                } else {
                    Ending::from_step(other)
                };
                let completed = finalize(&self.origin, ending, transaction, batch);
                self.finish();
                return Settled::Finished(completed);
            }
        };

        let mut state = self.state.lock();
        if state.cancel_requested {
            state.phase = Phase::Finished;
            drop(state);
            self.parked.notify_waiters();
            tracing::warn!(snmp.batch_id = %self.batch_id, "batch cancelled");
            let completed = finalize(&self.origin, Ending::Cancelled, transaction, batch);
            return Settled::Finished(completed);
        }

        batch.delegate_pending();
        let epoch = state.epoch;
        state.watchdog = self.timeout.map(|timeout| self.arm(epoch, timeout));

        tracing::debug!(
            snmp.registration = %registration.name(),
            snmp.handler = %registration.chain().node(node).name(),
            snmp.batch_id = %self.batch_id,
            snmp.request_count = batch.len(),
            epoch,
            "batch suspended"
        );

        state.phase = Phase::Parked(Box::new(Parked {
            registration,
            resume_at,
            continuation,
            transaction,
            batch,
        }));
        drop(state);
        self.parked.notify_waiters();

        Settled::Parked(Suspension {
            tracker: self.clone(),
            epoch,
        })
    }

    fn finish(&self) {
        self.state.lock().phase = Phase::Finished;
        self.parked.notify_waiters();
    }

    fn deliver(&self, completed: CompletedBatch) {
        let done_tx = self.state.lock().done_tx.take();
        if let Some(tx) = done_tx {
            // The caller may have dropped its completion handle.
            let _ = tx.send(completed);
        }
    }

    /// Start the timeout for the park of `epoch`.
    fn arm(self: &Arc<Self>, epoch: u64, timeout: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tracker = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(timeout) => tracker.expire(epoch, timeout),
            }
        });
        token
    }

    fn expire(&self, epoch: u64, timeout: Duration) {
        let (parked, done_tx) = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            let Some(parked) = state.take_parked() else {
                return;
            };
            state.watchdog = None;
            (parked, state.done_tx.take())
        };
        self.parked.notify_waiters();

        tracing::warn!(
            snmp.registration = %parked.registration.name(),
            snmp.batch_id = %self.batch_id,
            timeout_ms = timeout.as_millis() as u64,
            "delegated batch timed out"
        );
        let completed = finalize(&self.origin, Ending::Timeout, parked.transaction, parked.batch);
        if let Some(tx) = done_tx {
            let _ = tx.send(completed);
        }
    }

    fn cancel(&self) {
        let (parked, done_tx) = {
            let mut state = self.state.lock();
            match state.take_parked() {
                Some(parked) => {
                    if let Some(watchdog) = state.watchdog.take() {
                        watchdog.cancel();
                    }
                    (parked, state.done_tx.take())
                }
                None => {
                    if matches!(state.phase, Phase::Running) {
                        state.cancel_requested = true;
                    }
                    return;
                }
            }
        };
        self.parked.notify_waiters();

        tracing::warn!(snmp.batch_id = %self.batch_id, "batch cancelled");
        let completed = finalize(&self.origin, Ending::Cancelled, parked.transaction, parked.batch);
        if let Some(tx) = done_tx {
            let _ = tx.send(completed);
        }
    }
}

/// How a resumed walk stopped.
#[derive(Debug)]
pub enum Resumed {
    /// The batch is terminal; the result went to its [`Completion`].
    Completed,
    /// A later handler delegated again.
    Suspended(Suspension),
}

/// Handle for resuming a parked batch.
///
/// Cloning yields another handle for the same park; only the first resume
/// succeeds.
#[derive(Clone)]
pub struct Suspension {
    tracker: Arc<Tracker>,
    epoch: u64,
}

impl Suspension {
    pub fn batch_id(&self) -> BatchId {
        self.tracker.batch_id
    }

    /// Re-enter the chain at the successor of the delegating node.
    ///
    /// Nodes run by the resumed walk see the continuation the delegating
    /// handler returned.
    pub async fn resume(&self) -> Result<Resumed> {
        self.resume_inner(None).await
    }

    /// Like [`resume`](Self::resume), replacing the continuation with `state`.
    ///
    /// This is how an event source hands its result to the resumed nodes.
    pub async fn resume_with<T: Any + Send + Sync>(&self, state: T) -> Result<Resumed> {
        self.resume_inner(Some(Continuation::new(state))).await
    }

    async fn resume_inner(&self, replacement: Option<Continuation>) -> Result<Resumed> {
        let parked = self.tracker.claim(self.epoch).await?;
        let Parked {
            registration,
            resume_at,
            continuation,
            mut transaction,
            mut batch,
        } = *parked;
        let continuation = replacement.unwrap_or(continuation);
        batch.reactivate();

        tracing::debug!(
            snmp.registration = %registration.name(),
            snmp.batch_id = %self.tracker.batch_id,
            epoch = self.epoch,
            "resuming batch"
        );

        let scope = Scope::new(&registration, &self.tracker, Some(&continuation));
        let step = walk(scope, resume_at, &mut transaction, &mut batch).await;

        Ok(match self.tracker.settle(step, transaction, batch) {
            Settled::Finished(completed) => {
                self.tracker.deliver(completed);
                Resumed::Completed
            }
            Settled::Parked(next) => Resumed::Suspended(next),
        })
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("batch_id", &self.tracker.batch_id)
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// Caller-side handle of a suspended batch.
///
/// Holding a completion does not keep the batch alive: once every
/// [`Suspension`] is dropped and no timeout is pending, the batch is destroyed
/// (releasing its extension data) and [`wait`](Self::wait) fails with
/// `StaleContext`.
pub struct Completion {
    batch_id: BatchId,
    tracker: Weak<Tracker>,
    rx: oneshot::Receiver<CompletedBatch>,
}

impl Completion {
    pub(crate) fn new(tracker: &Arc<Tracker>, rx: oneshot::Receiver<CompletedBatch>) -> Self {
        Self {
            batch_id: tracker.batch_id,
            tracker: Arc::downgrade(tracker),
            rx,
        }
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Wait for the batch's terminal state.
    pub async fn wait(self) -> Result<CompletedBatch> {
        self.rx.await.map_err(|_| Error::StaleContext {
            batch_id: self.batch_id,
        })
    }

    /// Cancel the batch.
    ///
    /// A parked batch is failed with `Cancelled` at once, its extension data
    /// released and outstanding suspensions invalidated. If a resumed walk is
    /// running, cancellation takes effect when that walk stops: the batch ends
    /// as `Cancelled` whether the walk would have parked again or finished.
    /// Requests the walk already satisfied keep their answers.
    pub fn cancel(&self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.cancel();
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("batch_id", &self.batch_id)
            .finish()
    }
}
