//! Request batches, transactions and their terminal states.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::handler::{RequestError, Response};
use crate::oid::Oid;
use crate::value::Value;
use crate::varbind::VarBind;

use super::extension::{DuplicatePolicy, ExtensionData};

/// Processing mode of a transaction.
///
/// SET requests are driven through several phases, each dispatched as its own
/// walk over the same batch. Per-request extension data survives from one
/// phase to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Get,
    GetNext,
    GetBulk,
    /// Set phase 1: validate and reserve resources.
    SetReserve,
    /// Set phase 2: apply the change, keeping undo information.
    SetAction,
    SetCommit,
    SetUndo,
    SetCleanup,
}

impl Mode {
    /// Returns `true` for any SET phase.
    pub fn is_set(&self) -> bool {
        matches!(
            self,
            Mode::SetReserve | Mode::SetAction | Mode::SetCommit | Mode::SetUndo | Mode::SetCleanup
        )
    }

    /// Returns `true` for GET, GETNEXT and GETBULK.
    pub fn is_read(&self) -> bool {
        !self.is_set()
    }

    /// Returns `true` for the next-style read modes.
    pub fn is_next(&self) -> bool {
        matches!(self, Mode::GetNext | Mode::GetBulk)
    }

    /// Returns `true` if no later phase of the same transaction follows.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Mode::Get | Mode::GetNext | Mode::GetBulk | Mode::SetCleanup
        )
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Get => write!(f, "get"),
            Mode::GetNext => write!(f, "getnext"),
            Mode::GetBulk => write!(f, "getbulk"),
            Mode::SetReserve => write!(f, "set-reserve"),
            Mode::SetAction => write!(f, "set-action"),
            Mode::SetCommit => write!(f, "set-commit"),
            Mode::SetUndo => write!(f, "set-undo"),
            Mode::SetCleanup => write!(f, "set-cleanup"),
        }
    }
}

/// Process-unique identifier of a request batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(u64);

impl BatchId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared state of one protocol transaction.
#[derive(Debug)]
pub struct Transaction {
    mode: Mode,
    requested_mode: Mode,
    /// Request ID from the PDU.
    pub request_id: i32,
    /// Processing context the transaction was resolved to (empty for the default).
    pub context_name: Bytes,
    /// Source address of the request, when known.
    pub source: Option<SocketAddr>,
    data: ExtensionData,
}

impl Transaction {
    /// Create a transaction in the given mode for the default context.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            requested_mode: mode,
            request_id: 0,
            context_name: Bytes::new(),
            source: None,
            data: ExtensionData::new(),
        }
    }

    /// Set the request ID.
    pub fn with_request_id(mut self, request_id: i32) -> Self {
        self.request_id = request_id;
        self
    }

    /// Set the processing context name.
    pub fn with_context(mut self, context_name: impl Into<Bytes>) -> Self {
        self.context_name = context_name.into();
        self
    }

    /// Set the source address.
    pub fn with_source(mut self, source: SocketAddr) -> Self {
        self.source = Some(source);
        self
    }

    /// Mode handlers should act on.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Mode the transaction was issued with, before any downgrade.
    pub fn requested_mode(&self) -> Mode {
        self.requested_mode
    }

    /// Transaction-scoped extension data, shared by every handler.
    pub fn data(&self) -> &ExtensionData {
        &self.data
    }

    /// Mutable transaction-scoped extension data.
    pub fn data_mut(&mut self) -> &mut ExtensionData {
        &mut self.data
    }

    pub(crate) fn downgrade(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub(crate) fn begin_phase(&mut self, mode: Mode) {
        self.mode = mode;
        self.requested_mode = mode;
    }
}

/// Processing status of a single request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestStatus {
    /// Not yet handled.
    Pending,
    /// Waiting on a suspended batch.
    Delegated,
    /// Answered with this binding.
    Satisfied(VarBind),
    /// Terminally failed.
    Errored(RequestError),
}

impl RequestStatus {
    /// Returns `true` once the request is satisfied or errored.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Satisfied(_) | RequestStatus::Errored(_))
    }
}

/// One varbind of a batch, with its result slot and extension data.
#[derive(Debug)]
pub struct Request {
    index: usize,
    oid: Oid,
    value: Value,
    status: RequestStatus,
    data: ExtensionData,
}

impl Request {
    /// Create a pending request for the varbind at `index` of the PDU.
    pub fn new(index: usize, oid: Oid, value: Value) -> Self {
        Self {
            index,
            oid,
            value,
            status: RequestStatus::Pending,
            data: ExtensionData::new(),
        }
    }

    /// Position of the varbind in the original PDU (0-based).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Target OID.
    pub fn oid(&self) -> &Oid {
        &self.oid
    }

    /// Incoming value (`Null` for reads, the new value for sets).
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn status(&self) -> &RequestStatus {
        &self.status
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, RequestStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Per-request extension data.
    pub fn data(&self) -> &ExtensionData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ExtensionData {
        &mut self.data
    }

    /// Answer the request with a value for its own OID.
    ///
    /// Returns `false` and changes nothing if the request is already terminal.
    pub fn satisfy(&mut self, value: Value) -> bool {
        let varbind = VarBind::new(self.oid.clone(), value);
        self.satisfy_next(varbind)
    }

    /// Answer the request with a full binding (GETNEXT/GETBULK successor).
    pub fn satisfy_next(&mut self, varbind: VarBind) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = RequestStatus::Satisfied(varbind);
        true
    }

    /// Fail the request. Returns `false` if it was already terminal.
    pub fn fail(&mut self, error: RequestError) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = RequestStatus::Errored(error);
        true
    }

    /// Replace the status unconditionally, even a terminal one.
    pub fn override_status(&mut self, status: RequestStatus) {
        self.status = status;
    }

    pub(crate) fn delegate(&mut self) {
        if self.is_pending() {
            self.status = RequestStatus::Delegated;
        }
    }

    pub(crate) fn reactivate(&mut self) {
        if matches!(self.status, RequestStatus::Delegated) {
            self.status = RequestStatus::Pending;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.status = RequestStatus::Pending;
    }
}

/// Ordered requests dispatched together against one registration.
#[derive(Debug)]
pub struct RequestBatch {
    id: BatchId,
    requests: Vec<Request>,
}

impl RequestBatch {
    /// Create a batch with a fresh process-unique ID.
    pub fn new(requests: Vec<Request>) -> Self {
        Self {
            id: BatchId::next(),
            requests,
        }
    }

    /// Build a batch from varbinds, indexing them by position.
    pub fn from_varbinds(varbinds: impl IntoIterator<Item = VarBind>) -> Self {
        let requests = varbinds
            .into_iter()
            .enumerate()
            .map(|(index, vb)| Request::new(index, vb.oid, vb.value))
            .collect();
        Self::new(requests)
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn requests_mut(&mut self) -> &mut [Request] {
        &mut self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Number of requests still pending.
    pub fn pending_count(&self) -> usize {
        self.requests.iter().filter(|r| r.is_pending()).count()
    }

    /// Consume the batch, returning its requests.
    pub fn into_requests(self) -> Vec<Request> {
        self.requests
    }

    pub(crate) fn set_data_policy(&mut self, policy: DuplicatePolicy) {
        for request in &mut self.requests {
            request.data.set_policy(policy);
        }
    }

    /// Fail every pending or delegated request. Returns how many changed.
    pub(crate) fn fail_unfinished(&mut self, error: RequestError) -> usize {
        let mut failed = 0;
        for request in &mut self.requests {
            if matches!(
                request.status,
                RequestStatus::Pending | RequestStatus::Delegated
            ) {
                request.status = RequestStatus::Errored(error);
                failed += 1;
            }
        }
        failed
    }

    pub(crate) fn delegate_pending(&mut self) {
        self.requests.iter_mut().for_each(Request::delegate);
    }

    pub(crate) fn reactivate(&mut self) {
        self.requests.iter_mut().for_each(Request::reactivate);
    }

    pub(crate) fn reset(&mut self) {
        self.requests.iter_mut().for_each(Request::reset);
    }

    /// Release every request's extension data. Returns the entry count.
    pub(crate) fn release_all(&mut self) -> usize {
        self.requests.iter_mut().map(|r| r.data.release_all()).sum()
    }
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// The chain handled every request.
    Done,
    /// The batch failed; unfinished requests carry this error.
    Failed(RequestError),
}

/// A batch that reached its terminal state.
#[derive(Debug)]
pub struct CompletedBatch {
    transaction: Transaction,
    batch: RequestBatch,
    status: BatchStatus,
}

impl CompletedBatch {
    pub(crate) fn new(transaction: Transaction, batch: RequestBatch, status: BatchStatus) -> Self {
        Self {
            transaction,
            batch,
            status,
        }
    }

    pub fn id(&self) -> BatchId {
        self.batch.id()
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn is_done(&self) -> bool {
        self.status == BatchStatus::Done
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn requests(&self) -> &[Request] {
        self.batch.requests()
    }

    /// Split into the transaction, the batch and the status.
    pub fn into_parts(self) -> (Transaction, RequestBatch, BatchStatus) {
        (self.transaction, self.batch, self.status)
    }

    /// Build the protocol response for this batch alone.
    pub fn response(&self) -> Response {
        Response::from_requests(self.transaction.requested_mode(), self.batch.requests())
    }
}
