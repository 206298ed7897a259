//! SET transaction phases (RFC 3416 section 4.2.5).

use std::sync::Arc;

use crate::error::ErrorStatus;
use crate::handler::Response;

use super::{
    Agent, AgentRequest, BatchStatus, Mode, Registration, Request, RequestBatch, RequestStatus,
    Transaction,
};

/// One registration's share of a SET, kept across phases.
struct SetGroup {
    registration: Arc<Registration>,
    first_index: usize,
    /// `None` once the batch was lost mid-transaction.
    state: Option<(Transaction, RequestBatch)>,
}

impl Agent {
    /// Handle SET by driving every involved registration through the phases.
    ///
    /// 1. **SetReserve** for all groups. Any failure skips to cleanup.
    /// 2. **SetAction** for all groups. Any failure runs SetUndo, then cleanup.
    /// 3. **SetCommit** for all groups. A failure here is reported as
    ///    commitFailed.
    /// 4. **SetCleanup** always runs last.
    ///
    /// Each group keeps its transaction and requests between phases, so
    /// extension data attached in one phase is visible in the next.
    pub(super) async fn handle_set(&self, request: &AgentRequest) -> Response {
        let mut routed: Vec<(Arc<Registration>, Vec<Request>)> = Vec::new();

        for (index, vb) in request.varbinds.iter().enumerate() {
            let registration = match self
                .inner
                .registry
                .find_by_subtree(&vb.oid, &request.context_name)
            {
                Ok(registration) => registration,
                Err(_) => {
                    tracing::debug!(snmp.oid = %vb.oid, "no registration for set");
                    return request.fail(ErrorStatus::NotWritable, index);
                }
            };
            let req = Request::new(index, vb.oid.clone(), vb.value.clone());
            match routed
                .iter_mut()
                .find(|(queued, _)| Arc::ptr_eq(queued, &registration))
            {
                Some((_, requests)) => requests.push(req),
                None => routed.push((registration, vec![req])),
            }
        }

        let mut groups: Vec<SetGroup> = routed
            .into_iter()
            .map(|(registration, requests)| SetGroup {
                registration,
                first_index: requests.first().map_or(0, Request::index),
                state: Some((
                    request.transaction(Mode::SetReserve),
                    RequestBatch::new(requests),
                )),
            })
            .collect();

        if let Some((status, index)) = self.run_phase(&mut groups, Mode::SetReserve).await {
            self.run_phase(&mut groups, Mode::SetCleanup).await;
            return request.fail(status, index);
        }

        if let Some((status, index)) = self.run_phase(&mut groups, Mode::SetAction).await {
            let status = match self.run_phase(&mut groups, Mode::SetUndo).await {
                Some(_) => ErrorStatus::UndoFailed,
                None => status,
            };
            self.run_phase(&mut groups, Mode::SetCleanup).await;
            return request.fail(status, index);
        }

        if let Some((_, index)) = self.run_phase(&mut groups, Mode::SetCommit).await {
            self.run_phase(&mut groups, Mode::SetCleanup).await;
            return request.fail(ErrorStatus::CommitFailed, index);
        }

        if let Some((status, index)) = self.run_phase(&mut groups, Mode::SetCleanup).await {
            tracing::warn!(
                snmp.request_id = request.request_id,
                error_status = %status,
                error_index = index + 1,
                "set cleanup failed after commit"
            );
        }

        Response::success(request.varbinds.clone())
    }

    /// Run one phase over every group.
    ///
    /// Returns the error status and varbind index of the lowest failing
    /// request, if any failed.
    async fn run_phase(
        &self,
        groups: &mut [SetGroup],
        mode: Mode,
    ) -> Option<(ErrorStatus, usize)> {
        let mut failure: Option<(ErrorStatus, usize)> = None;
        let mut record = |status: ErrorStatus, index: usize| {
            if failure.is_none_or(|(_, seen)| index < seen) {
                failure = Some((status, index));
            }
        };

        for group in groups.iter_mut() {
            let Some((mut transaction, mut batch)) = group.state.take() else {
                record(ErrorStatus::GenErr, group.first_index);
                continue;
            };
            transaction.begin_phase(mode);
            batch.reset();

            let dispatch = self
                .inner
                .dispatcher
                .dispatch(group.registration.clone(), transaction, batch)
                .await;

            match dispatch.finish().await {
                Ok(completed) => {
                    let (transaction, batch, status) = completed.into_parts();
                    let mut errored = false;
                    for req in batch.requests() {
                        if let RequestStatus::Errored(err) = req.status() {
                            record(err.to_error_status(), req.index());
                            errored = true;
                        }
                    }
                    // A batch cancelled after its requests were answered.
                    if let BatchStatus::Failed(err) = status
                        && !errored
                    {
                        record(err.to_error_status(), group.first_index);
                    }
                    group.state = Some((transaction, batch));
                }
                Err(err) => {
                    tracing::warn!(
                        snmp.registration = %group.registration.name(),
                        snmp.mode = %mode,
                        error = %err,
                        "set batch dropped before completion"
                    );
                    record(ErrorStatus::GenErr, group.first_index);
                }
            }
        }

        failure
    }
}
