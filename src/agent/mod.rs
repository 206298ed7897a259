//! Agent core: registrations, dispatch, suspension and the request front end.
//!
//! The pieces, bottom-up:
//!
//! - [`Registry`] holds [`Registration`]s, each binding an OID subtree (in a
//!   context) to a handler chain.
//! - [`Dispatcher`] walks one registration's chain for one [`RequestBatch`].
//! - [`Suspension`] / [`Completion`] let a handler park a batch and something
//!   else finish it later.
//! - [`Agent`] takes a decoded PDU ([`AgentRequest`]), routes its varbinds to
//!   registrations, drives SET through its phases and merges everything back
//!   into a [`Response`].
//!
//! # Example
//!
//! ```rust
//! use async_snmp_agent::agent::{Agent, AgentRequest, Registration};
//! use async_snmp_agent::handler::TableHandler;
//! use async_snmp_agent::{Value, oid};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> async_snmp_agent::Result<()> {
//! let table = TableHandler::new();
//! table.insert(oid!(1, 3, 6, 1, 2, 1, 1, 5, 0), Value::from("router-1"));
//!
//! let agent = Agent::builder()
//!     .register(
//!         Registration::builder("system", oid!(1, 3, 6, 1, 2, 1, 1))
//!             .handler("table", table)
//!             .build()?,
//!     )
//!     .build()?;
//!
//! let response = agent
//!     .process(AgentRequest::get([oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)]))
//!     .await;
//! assert!(response.is_success());
//! assert_eq!(response.varbinds[0].value, Value::from("router-1"));
//! # Ok(())
//! # }
//! ```

pub(crate) mod dispatch;
mod extension;
mod registry;
mod request;
mod set_handler;
mod suspend;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{ErrorStatus, Result, context_label};
use crate::handler::{RequestError, Response};
use crate::oid::Oid;
use crate::value::Value;
use crate::varbind::VarBind;

pub use dispatch::{Dispatch, Dispatcher, DispatcherConfig};
pub use extension::{DuplicatePolicy, ExtensionData};
pub use registry::{
    DEFAULT_PRIORITY, Modes, Registration, RegistrationBuilder, RegistrationSummary, Registry,
    SubidRange,
};
pub use request::{
    BatchId, BatchStatus, CompletedBatch, Mode, Request, RequestBatch, RequestStatus, Transaction,
};
pub use suspend::{Completion, Resumed, Suspension};

/// Kind of decoded PDU handed to [`Agent::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    GetBulkRequest,
    SetRequest,
}

impl fmt::Display for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetRequest => write!(f, "GetRequest"),
            Self::GetNextRequest => write!(f, "GetNextRequest"),
            Self::GetBulkRequest => write!(f, "GetBulkRequest"),
            Self::SetRequest => write!(f, "SetRequest"),
        }
    }
}

/// A decoded, already-authenticated request PDU.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub pdu_type: PduType,
    pub request_id: i32,
    /// Processing context the request was resolved to (empty for the default).
    pub context_name: Bytes,
    /// Where the request came from, if known.
    pub source: Option<SocketAddr>,
    pub varbinds: Vec<VarBind>,
    /// GETBULK only.
    pub non_repeaters: i32,
    /// GETBULK only.
    pub max_repetitions: i32,
}

impl AgentRequest {
    fn new(pdu_type: PduType, varbinds: Vec<VarBind>) -> Self {
        Self {
            pdu_type,
            request_id: 0,
            context_name: Bytes::new(),
            source: None,
            varbinds,
            non_repeaters: 0,
            max_repetitions: 0,
        }
    }

    /// GET for the given OIDs.
    pub fn get(oids: impl IntoIterator<Item = Oid>) -> Self {
        Self::new(PduType::GetRequest, oids.into_iter().map(VarBind::null).collect())
    }

    /// GETNEXT for the given OIDs.
    pub fn get_next(oids: impl IntoIterator<Item = Oid>) -> Self {
        Self::new(
            PduType::GetNextRequest,
            oids.into_iter().map(VarBind::null).collect(),
        )
    }

    /// GETBULK for the given OIDs.
    pub fn get_bulk(
        oids: impl IntoIterator<Item = Oid>,
        non_repeaters: i32,
        max_repetitions: i32,
    ) -> Self {
        let mut request = Self::new(
            PduType::GetBulkRequest,
            oids.into_iter().map(VarBind::null).collect(),
        );
        request.non_repeaters = non_repeaters;
        request.max_repetitions = max_repetitions;
        request
    }

    /// SET of the given bindings.
    pub fn set(varbinds: impl IntoIterator<Item = VarBind>) -> Self {
        Self::new(PduType::SetRequest, varbinds.into_iter().collect())
    }

    pub fn with_request_id(mut self, request_id: i32) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_context(mut self, context_name: impl Into<Bytes>) -> Self {
        self.context_name = context_name.into();
        self
    }

    pub fn with_source(mut self, source: SocketAddr) -> Self {
        self.source = Some(source);
        self
    }

    fn transaction(&self, mode: Mode) -> Transaction {
        let transaction = Transaction::new(mode)
            .with_request_id(self.request_id)
            .with_context(self.context_name.clone());
        match self.source {
            Some(source) => transaction.with_source(source),
            None => transaction,
        }
    }

    /// Error response for the varbind at `index`, echoing the request's bindings.
    fn fail(&self, status: ErrorStatus, index: usize) -> Response {
        Response::error(status, (index + 1) as i32, self.varbinds.clone())
    }

    /// Error responses carry the request's own bindings.
    fn echo(&self, mut response: Response) -> Response {
        if !response.is_success() {
            response.varbinds = self.varbinds.clone();
        }
        response
    }
}

/// Builder for [`Agent`].
#[derive(Debug, Default)]
pub struct AgentBuilder {
    config: DispatcherConfig,
    registry: Option<Arc<Registry>>,
    registrations: Vec<Registration>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout for suspended batches whose registration sets none.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    /// How extension-data stores treat a repeated name.
    pub fn duplicate_data(mut self, policy: DuplicatePolicy) -> Self {
        self.config.duplicate_data = policy;
        self
    }

    /// Use an existing registry instead of a fresh one.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register a subtree when the agent is built.
    pub fn register(mut self, registration: Registration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Build the agent, registering everything queued with [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Returns the first registration error (`DuplicateSubtree`,
    /// `DuplicateRegistration`).
    pub fn build(self) -> Result<Agent> {
        let registry = self.registry.unwrap_or_default();
        for registration in self.registrations {
            registry.register(registration)?;
        }
        Ok(Agent {
            inner: Arc::new(AgentInner {
                registry,
                dispatcher: Dispatcher::new(self.config),
            }),
        })
    }
}

struct AgentInner {
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
}

/// Request front end over a [`Registry`] and a [`Dispatcher`].
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// The registry requests are routed through.
    ///
    /// Registrations may be added or removed while the agent runs.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Process one decoded request and build its response.
    ///
    /// Suspended batches are waited on; this returns once every batch of the
    /// request reached its terminal state.
    pub async fn process(&self, request: AgentRequest) -> Response {
        tracing::debug!(
            snmp.pdu_type = %request.pdu_type,
            snmp.request_id = request.request_id,
            snmp.context = %context_label(&request.context_name),
            snmp.request_count = request.varbinds.len(),
            "processing request"
        );

        let response = match request.pdu_type {
            PduType::GetRequest => self.handle_read(&request, Mode::Get).await,
            PduType::GetNextRequest => self.handle_read(&request, Mode::GetNext).await,
            PduType::GetBulkRequest => self.handle_bulk(&request).await,
            PduType::SetRequest => self.handle_set(&request).await,
        };

        tracing::debug!(
            snmp.request_id = request.request_id,
            error_status = %response.error_status,
            error_index = response.error_index,
            "request complete"
        );
        response
    }

    async fn handle_read(&self, request: &AgentRequest, mode: Mode) -> Response {
        let requests = request
            .varbinds
            .iter()
            .enumerate()
            .map(|(index, vb)| Request::new(index, vb.oid.clone(), vb.value.clone()))
            .collect();
        let done = self.read_round(request, mode, requests).await;
        request.echo(Response::from_requests(mode, &done))
    }

    /// GETBULK (RFC 3416 section 4.2.3).
    ///
    /// Non-repeaters get one round; the remaining columns get up to
    /// `max_repetitions` rounds, each continuing from the column's last OID.
    /// A column that reached endOfMibView keeps reporting it without being
    /// walked again, and the loop stops once every column has.
    async fn handle_bulk(&self, request: &AgentRequest) -> Response {
        let non_repeaters = (request.non_repeaters.max(0) as usize).min(request.varbinds.len());
        let max_repetitions = request.max_repetitions.max(0) as usize;
        let mut varbinds = Vec::new();

        if non_repeaters > 0 {
            let requests = request.varbinds[..non_repeaters]
                .iter()
                .enumerate()
                .map(|(index, vb)| Request::new(index, vb.oid.clone(), Value::Null))
                .collect();
            let done = self.read_round(request, Mode::GetBulk, requests).await;
            let response = Response::from_requests(Mode::GetBulk, &done);
            if !response.is_success() {
                return request.echo(response);
            }
            varbinds.extend(response.varbinds);
        }

        let mut columns: Vec<Oid> = request.varbinds[non_repeaters..]
            .iter()
            .map(|vb| vb.oid.clone())
            .collect();
        let mut ended = vec![false; columns.len()];

        for _ in 0..max_repetitions {
            if ended.iter().all(|e| *e) {
                break;
            }

            let requests = columns
                .iter()
                .enumerate()
                .filter(|(column, _)| !ended[*column])
                .map(|(column, oid)| {
                    Request::new(non_repeaters + column, oid.clone(), Value::Null)
                })
                .collect();
            let done = self.read_round(request, Mode::GetBulk, requests).await;
            let response = Response::from_requests(Mode::GetBulk, &done);
            if !response.is_success() {
                return request.echo(response);
            }

            let mut row: Vec<Option<VarBind>> = vec![None; columns.len()];
            for (req, vb) in done.iter().zip(response.varbinds) {
                row[req.index() - non_repeaters] = Some(vb);
            }
            for (column, vb) in row.into_iter().enumerate() {
                let vb = vb.unwrap_or_else(|| {
                    VarBind::new(columns[column].clone(), Value::EndOfMibView)
                });
                if matches!(vb.value, Value::EndOfMibView) {
                    ended[column] = true;
                } else {
                    columns[column] = vb.oid.clone();
                }
                varbinds.push(vb);
            }
        }

        Response::success(varbinds)
    }

    /// Route, dispatch and collect one round of read requests.
    ///
    /// Returns the finished requests sorted by index.
    async fn read_round(
        &self,
        request: &AgentRequest,
        mode: Mode,
        requests: Vec<Request>,
    ) -> Vec<Request> {
        if mode.is_next() {
            return self.next_round(request, mode, requests).await;
        }

        let registry = &self.inner.registry;
        let mut done = Vec::with_capacity(requests.len());
        let mut groups = Vec::new();

        for mut req in requests {
            match registry.find_by_subtree(req.oid(), &request.context_name) {
                Ok(registration) => enqueue(&mut groups, registration, req),
                Err(_) => {
                    req.fail(RequestError::NoSuchObject);
                    done.push(req);
                }
            }
        }

        for (registration, requests) in groups {
            done.extend(self.run_batch(request, mode, &registration, requests).await);
        }

        done.sort_by_key(Request::index);
        done
    }

    /// One GETNEXT/GETBULK step for each request.
    ///
    /// A request is offered to every registration that may hold its
    /// successor, in order of the lowest OID each could answer, and keeps the
    /// smallest answer that the answering registration actually owns. Offers
    /// stop once no remaining registration can beat that answer. Answers that
    /// belong to a more specific registration, or fall outside a range, are
    /// skipped by asking the same registration again from them.
    async fn next_round(
        &self,
        request: &AgentRequest,
        mode: Mode,
        requests: Vec<Request>,
    ) -> Vec<Request> {
        let registry = &self.inner.registry;
        let context = &request.context_name;

        let mut walks: Vec<NextWalk> = requests
            .iter()
            .map(|req| {
                let candidates = registry.find_next_candidates(req.oid(), context);
                NextWalk::new(req.index(), req.oid().clone(), candidates)
            })
            .collect();
        let slots: HashMap<usize, usize> = walks
            .iter()
            .enumerate()
            .map(|(slot, walk)| (walk.index, slot))
            .collect();

        loop {
            let mut groups = Vec::new();
            for walk in &walks {
                if let Some((registration, cursor)) = &walk.current {
                    let req = Request::new(walk.index, cursor.clone(), Value::Null);
                    enqueue(&mut groups, registration.clone(), req);
                }
            }
            if groups.is_empty() {
                break;
            }

            for (registration, requests) in groups {
                for answered in self.run_batch(request, mode, &registration, requests).await {
                    if let Some(&slot) = slots.get(&answered.index()) {
                        walks[slot].offer(registry, context, &registration, &answered);
                    }
                }
            }
        }

        let mut done: Vec<Request> = walks.into_iter().map(NextWalk::finish).collect();
        done.sort_by_key(Request::index);
        done
    }

    /// Dispatch one batch and wait for it, whatever path it takes.
    async fn run_batch(
        &self,
        request: &AgentRequest,
        mode: Mode,
        registration: &Arc<Registration>,
        requests: Vec<Request>,
    ) -> Vec<Request> {
        let saved: Vec<(usize, Oid, Value)> = requests
            .iter()
            .map(|r| (r.index(), r.oid().clone(), r.value().clone()))
            .collect();

        let dispatch = self
            .inner
            .dispatcher
            .dispatch(
                registration.clone(),
                request.transaction(mode),
                RequestBatch::new(requests),
            )
            .await;

        match dispatch.finish().await {
            Ok(completed) => {
                let (_, batch, _) = completed.into_parts();
                batch.into_requests()
            }
            Err(err) => {
                tracing::warn!(
                    snmp.registration = %registration.name(),
                    snmp.mode = %mode,
                    error = %err,
                    "batch dropped before completion"
                );
                saved
                    .into_iter()
                    .map(|(index, oid, value)| {
                        let mut req = Request::new(index, oid, value);
                        req.fail(RequestError::Internal);
                        req
                    })
                    .collect()
            }
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("registry", &self.inner.registry)
            .field("config", self.inner.dispatcher.config())
            .finish()
    }
}

/// Add `request` to the batch for `registration`, or start one.
fn enqueue(
    groups: &mut Vec<(Arc<Registration>, Vec<Request>)>,
    registration: Arc<Registration>,
    request: Request,
) {
    match groups
        .iter_mut()
        .find(|(queued, _)| Arc::ptr_eq(queued, &registration))
    {
        Some((_, requests)) => requests.push(request),
        None => groups.push((registration, vec![request])),
    }
}

/// A next-style request working through the registrations that may hold
/// its successor.
struct NextWalk {
    index: usize,
    origin: Oid,
    /// Remaining registrations with the lowest OID each could answer.
    candidates: VecDeque<(Oid, Arc<Registration>)>,
    /// Registration to ask next, and the OID to ask from.
    current: Option<(Arc<Registration>, Oid)>,
    best: Option<VarBind>,
    error: Option<RequestError>,
}

impl NextWalk {
    fn new(index: usize, origin: Oid, candidates: Vec<(Oid, Arc<Registration>)>) -> Self {
        let mut walk = Self {
            index,
            origin,
            candidates: candidates.into(),
            current: None,
            best: None,
            error: None,
        };
        walk.advance();
        walk
    }

    /// Move to the next registration that could still beat the best answer.
    fn advance(&mut self) {
        self.current = match self.candidates.pop_front() {
            Some((bound, _)) if self.best.as_ref().is_some_and(|best| bound >= best.oid) => {
                // Candidates are ordered by bound; none of the rest can win either.
                self.candidates.clear();
                None
            }
            Some((_, registration)) => Some((registration, self.origin.clone())),
            None => None,
        };
    }

    fn stop(&mut self, error: RequestError) {
        self.error = Some(error);
        self.current = None;
        self.candidates.clear();
    }

    /// Take the answer `registration` gave for `answered`.
    fn offer(
        &mut self,
        registry: &Registry,
        context: &[u8],
        registration: &Arc<Registration>,
        answered: &Request,
    ) {
        match answered.status() {
            RequestStatus::Satisfied(vb) => {
                if vb.oid <= *answered.oid() {
                    tracing::warn!(
                        snmp.registration = %registration.name(),
                        snmp.oid = %answered.oid(),
                        answer = %vb.oid,
                        "get-next answer does not advance"
                    );
                    self.advance();
                } else if self.best.as_ref().is_some_and(|best| vb.oid >= best.oid) {
                    self.advance();
                } else if owns(registry, context, registration, &vb.oid) {
                    self.best = Some(vb.clone());
                    self.advance();
                } else {
                    tracing::trace!(
                        snmp.registration = %registration.name(),
                        snmp.oid = %vb.oid,
                        "skipping answer owned elsewhere"
                    );
                    self.current = Some((registration.clone(), vb.oid.clone()));
                }
            }
            RequestStatus::Errored(err) if err.exception().is_some() => self.advance(),
            RequestStatus::Errored(err) => self.stop(*err),
            RequestStatus::Pending | RequestStatus::Delegated => self.stop(RequestError::Internal),
        }
    }

    fn finish(self) -> Request {
        let mut req = Request::new(self.index, self.origin, Value::Null);
        match (self.error, self.best) {
            (Some(err), _) => req.fail(err),
            (None, Some(vb)) => req.satisfy_next(vb),
            (None, None) => req.fail(RequestError::EndOfMibView),
        };
        req
    }
}

/// Returns `true` if `oid` is an object of `registration` rather than of a
/// more specific registration nested in it.
fn owns(registry: &Registry, context: &[u8], registration: &Registration, oid: &Oid) -> bool {
    registration.accepts(oid)
        && registry
            .find_by_subtree(oid, context)
            .is_ok_and(|owner| owner.name() == registration.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Outcome, TableHandler, handler_fn};
    use crate::oid;

    fn table(entries: &[(Oid, i32)]) -> TableHandler {
        let table = TableHandler::new();
        for (oid, value) in entries {
            table.insert(oid.clone(), Value::Integer(*value));
        }
        table
    }

    fn agent() -> Agent {
        Agent::builder()
            .register(
                Registration::builder("a", oid!(1, 3, 6, 1, 4, 1, 1))
                    .handler(
                        "table",
                        table(&[
                            (oid!(1, 3, 6, 1, 4, 1, 1, 1, 0), 10),
                            (oid!(1, 3, 6, 1, 4, 1, 1, 2, 0), 20),
                        ]),
                    )
                    .build()
                    .unwrap(),
            )
            .register(
                Registration::builder("b", oid!(1, 3, 6, 1, 4, 1, 2))
                    .handler("table", table(&[(oid!(1, 3, 6, 1, 4, 1, 2, 1, 0), 30)]))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_unrouted_is_no_such_object() {
        let response = agent()
            .process(AgentRequest::get([oid!(1, 3, 6, 1, 9)]))
            .await;
        assert!(response.is_success());
        assert_eq!(response.varbinds[0].value, Value::NoSuchObject);
        assert_eq!(response.varbinds[0].oid, oid!(1, 3, 6, 1, 9));
    }

    #[tokio::test]
    async fn test_get_next_crosses_registrations() {
        let response = agent()
            .process(AgentRequest::get_next([oid!(1, 3, 6, 1, 4, 1, 1, 2, 0)]))
            .await;
        assert!(response.is_success());
        assert_eq!(response.varbinds[0].oid, oid!(1, 3, 6, 1, 4, 1, 2, 1, 0));
        assert_eq!(response.varbinds[0].value, Value::Integer(30));
    }

    #[tokio::test]
    async fn test_get_next_past_last_is_end_of_mib_view() {
        let response = agent()
            .process(AgentRequest::get_next([oid!(1, 3, 6, 1, 4, 1, 2, 1, 0)]))
            .await;
        assert_eq!(response.varbinds[0].oid, oid!(1, 3, 6, 1, 4, 1, 2, 1, 0));
        assert_eq!(response.varbinds[0].value, Value::EndOfMibView);
    }

    #[tokio::test]
    async fn test_get_bulk_walks_until_end() {
        let response = agent()
            .process(AgentRequest::get_bulk([oid!(1, 3, 6, 1, 4, 1)], 0, 10))
            .await;
        assert!(response.is_success());
        let values: Vec<Value> = response.varbinds.iter().map(|vb| vb.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                Value::Integer(10),
                Value::Integer(20),
                Value::Integer(30),
                Value::EndOfMibView,
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_handler_echoes_request() {
        let agent = Agent::builder()
            .register(
                Registration::builder("broken", oid!(1, 3, 6, 1, 4, 1, 5))
                    .handler(
                        "fail",
                        handler_fn(|_| Outcome::Fail(RequestError::Handler(ErrorStatus::GenErr))),
                    )
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let response = agent
            .process(AgentRequest::get([oid!(1, 3, 6, 1, 9), oid!(1, 3, 6, 1, 4, 1, 5, 1)]))
            .await;
        assert_eq!(response.error_status, ErrorStatus::GenErr);
        assert_eq!(response.error_index, 2);
        assert_eq!(response.varbinds[1].value, Value::Null);
    }
}
