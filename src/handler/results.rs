//! Per-request outcomes and the protocol response built from them.

use crate::agent::{Mode, Request, RequestStatus};
use crate::error::ErrorStatus;
use crate::value::Value;
use crate::varbind::VarBind;

/// Terminal error attached to a single request.
///
/// Per-request errors never abort sibling requests in the same batch. They are
/// translated into an exception value (read operations) or an RFC 3416 error
/// status when the response is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestError {
    /// The range sub-identifier of the request fell outside the registration's bound.
    OutOfRange,
    /// The object type is not implemented.
    NoSuchObject,
    /// The object type exists but this instance does not.
    NoSuchInstance,
    /// No lexicographic successor exists in this subtree.
    EndOfMibView,
    /// A delegated request was not resumed within the registration's timeout.
    Timeout,
    /// Handler contract violation (chain finished with pending requests).
    Internal,
    /// The batch was cancelled by its owner.
    Cancelled,
    /// Handler-reported failure.
    Handler(ErrorStatus),
}

impl RequestError {
    /// Exception value to report for read operations, if this error has one.
    pub fn exception(&self) -> Option<Value> {
        match self {
            RequestError::OutOfRange | RequestError::NoSuchObject => Some(Value::NoSuchObject),
            RequestError::NoSuchInstance => Some(Value::NoSuchInstance),
            RequestError::EndOfMibView => Some(Value::EndOfMibView),
            _ => None,
        }
    }

    /// Convert to an ErrorStatus code.
    pub fn to_error_status(&self) -> ErrorStatus {
        match self {
            RequestError::OutOfRange
            | RequestError::NoSuchObject
            | RequestError::NoSuchInstance
            | RequestError::EndOfMibView => ErrorStatus::NoSuchName,
            RequestError::Timeout | RequestError::Internal | RequestError::Cancelled => {
                ErrorStatus::GenErr
            }
            RequestError::Handler(status) => *status,
        }
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "sub-identifier out of registered range"),
            Self::NoSuchObject => write!(f, "noSuchObject"),
            Self::NoSuchInstance => write!(f, "noSuchInstance"),
            Self::EndOfMibView => write!(f, "endOfMibView"),
            Self::Timeout => write!(f, "delegated request timed out"),
            Self::Internal => write!(f, "incomplete handling"),
            Self::Cancelled => write!(f, "batch cancelled"),
            Self::Handler(status) => write!(f, "handler error: {}", status),
        }
    }
}

impl From<ErrorStatus> for RequestError {
    fn from(status: ErrorStatus) -> Self {
        RequestError::Handler(status)
    }
}

/// Response to hand back to the encode layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Variable bindings in the response
    pub varbinds: Vec<VarBind>,
    /// Error status (0 = no error)
    pub error_status: ErrorStatus,
    /// Error index (1-based index of problematic varbind, 0 if no error)
    pub error_index: i32,
}

impl Response {
    /// Create a successful response with the given varbinds.
    pub fn success(varbinds: Vec<VarBind>) -> Self {
        Self {
            varbinds,
            error_status: ErrorStatus::NoError,
            error_index: 0,
        }
    }

    /// Create an error response.
    pub fn error(error_status: ErrorStatus, error_index: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            varbinds,
            error_status,
            error_index,
        }
    }

    /// Build a response from finished requests, in the order given.
    ///
    /// For read modes, exception-like errors become exception values in the
    /// varbind list. Any other error (or any error at all for SET) produces an
    /// error response pointing at the first failing varbind, echoing the
    /// request's original bindings.
    pub fn from_requests<'r>(mode: Mode, requests: impl IntoIterator<Item = &'r Request>) -> Self {
        let requests: Vec<&Request> = requests.into_iter().collect();

        let failure = requests.iter().find_map(|r| match r.status() {
            RequestStatus::Errored(err) if mode.is_read() && err.exception().is_some() => None,
            RequestStatus::Errored(err) => Some((err.to_error_status(), r.index())),
            RequestStatus::Pending | RequestStatus::Delegated => {
                Some((ErrorStatus::GenErr, r.index()))
            }
            RequestStatus::Satisfied(_) => None,
        });

        if let Some((status, index)) = failure {
            let echoed = requests
                .iter()
                .map(|r| VarBind::new(r.oid().clone(), r.value().clone()))
                .collect();
            return Self::error(status, (index + 1) as i32, echoed);
        }

        let varbinds = requests
            .iter()
            .map(|r| match r.status() {
                RequestStatus::Satisfied(vb) => vb.clone(),
                RequestStatus::Errored(err) => {
                    VarBind::new(r.oid().clone(), err.exception().unwrap_or(Value::Null))
                }
                RequestStatus::Pending | RequestStatus::Delegated => VarBind::null(r.oid().clone()),
            })
            .collect();
        Self::success(varbinds)
    }

    /// Returns `true` if the response carries no error status.
    pub fn is_success(&self) -> bool {
        self.error_status == ErrorStatus::NoError
    }
}
