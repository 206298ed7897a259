//! In-memory table handler.
//!
//! [`TableHandler`] is a leaf handler answering GET, GETNEXT/GETBULK and all
//! SET phases from a sorted list of OID/value pairs. It is handy for static
//! scalars, for tests, and as an example of a handler that keeps per-request
//! state across SET phases:
//!
//! - SetReserve checks that the instance exists and the value type matches.
//! - SetAction attaches the old value to the request's extension data under
//!   `"table_undo"`, then writes the new one. If the attach fails nothing is
//!   written and the request fails with undoFailed.
//! - SetUndo puts the attached old value back.
//!
//! The undo value is released by the dispatcher once the transaction's final
//! phase completes.
//!
//! ```rust
//! use async_snmp_agent::handler::TableHandler;
//! use async_snmp_agent::{Value, oid};
//!
//! let table = TableHandler::new();
//! table.insert(oid!(1, 3, 6, 1, 4, 1, 99999, 1, 0), Value::Integer(100));
//! table.insert(oid!(1, 3, 6, 1, 4, 1, 99999, 2, 0), Value::from("test"));
//!
//! assert_eq!(table.get(&oid!(1, 3, 6, 1, 4, 1, 99999, 1, 0)), Some(Value::Integer(100)));
//! let (next, _) = table.get_next(&oid!(1, 3, 6, 1, 4, 1, 99999, 1, 0)).unwrap();
//! assert_eq!(next, oid!(1, 3, 6, 1, 4, 1, 99999, 2, 0));
//! ```

use parking_lot::RwLock;

use super::{BoxFuture, HandlerContext, MibHandler, Outcome, RequestError};
use crate::agent::{Mode, Registration};
use crate::error::ErrorStatus;
use crate::oid::Oid;
use crate::value::Value;
use crate::varbind::VarBind;

const UNDO: &str = "table_undo";

/// Leaf handler serving values from a sorted OID table.
#[derive(Debug)]
pub struct TableHandler {
    entries: RwLock<Vec<(Oid, Value)>>,
    writable: bool,
}

impl Default for TableHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TableHandler {
    /// Create an empty, writable table.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            writable: true,
        }
    }

    /// Allow or refuse SET.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&self, oid: Oid, value: Value) -> Option<Value> {
        let mut entries = self.entries.write();
        match entries.binary_search_by(|(o, _)| o.cmp(&oid)) {
            Ok(idx) => Some(std::mem::replace(&mut entries[idx].1, value)),
            Err(idx) => {
                entries.insert(idx, (oid, value));
                None
            }
        }
    }

    pub fn remove(&self, oid: &Oid) -> Option<Value> {
        let mut entries = self.entries.write();
        match entries.binary_search_by(|(o, _)| o.cmp(oid)) {
            Ok(idx) => Some(entries.remove(idx).1),
            Err(_) => None,
        }
    }

    /// Value at exactly `oid`.
    pub fn get(&self, oid: &Oid) -> Option<Value> {
        let entries = self.entries.read();
        entries
            .binary_search_by(|(o, _)| o.cmp(oid))
            .ok()
            .map(|idx| entries[idx].1.clone())
    }

    /// First entry strictly after `oid`.
    pub fn get_next(&self, oid: &Oid) -> Option<(Oid, Value)> {
        self.next_matching(oid, |_| true)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn next_matching(&self, oid: &Oid, accept: impl Fn(&Oid) -> bool) -> Option<(Oid, Value)> {
        let entries = self.entries.read();
        let start = match entries.binary_search_by(|(o, _)| o.cmp(oid)) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        };
        entries[start..]
            .iter()
            .find(|(o, _)| accept(o))
            .cloned()
    }

    fn serve_get(&self, ctx: &mut HandlerContext<'_>) {
        for request in ctx.pending_mut() {
            match self.get(request.oid()) {
                Some(value) => request.satisfy(value),
                None => request.fail(RequestError::NoSuchInstance),
            };
        }
    }

    fn serve_next(&self, ctx: &mut HandlerContext<'_>, registration: &Registration) {
        for request in ctx.pending_mut() {
            match self.next_matching(request.oid(), |o| registration.accepts(o)) {
                Some((oid, value)) => request.satisfy_next(VarBind::new(oid, value)),
                None => request.fail(RequestError::EndOfMibView),
            };
        }
    }

    fn reserve(&self, ctx: &mut HandlerContext<'_>) {
        for request in ctx.pending_mut() {
            let verdict = match self.get(request.oid()) {
                _ if !self.writable => Err(ErrorStatus::NotWritable),
                None => Err(ErrorStatus::NoCreation),
                Some(current) if !current.same_type(request.value()) => {
                    Err(ErrorStatus::WrongType)
                }
                Some(_) => Ok(()),
            };
            match verdict {
                Ok(()) => {
                    let value = request.value().clone();
                    request.satisfy(value);
                }
                Err(status) => {
                    request.fail(RequestError::Handler(status));
                }
            }
        }
    }

    fn action(&self, ctx: &mut HandlerContext<'_>) {
        for request in ctx.pending_mut() {
            let value = request.value().clone();
            // A failed attach must leave the table untouched.
            if let Some(old) = self.get(request.oid())
                && request.data_mut().attach(UNDO, old).is_err()
            {
                request.fail(RequestError::Handler(ErrorStatus::UndoFailed));
                continue;
            }
            self.insert(request.oid().clone(), value.clone());
            request.satisfy(value);
        }
    }

    fn undo(&self, ctx: &mut HandlerContext<'_>) {
        for request in ctx.pending_mut() {
            if let Ok(old) = request.data().get::<Value>(UNDO) {
                tracing::trace!(snmp.oid = %request.oid(), "restoring previous value");
                self.insert(request.oid().clone(), old.clone());
            }
            let value = request.value().clone();
            request.satisfy(value);
        }
    }

    fn acknowledge(&self, ctx: &mut HandlerContext<'_>) {
        for request in ctx.pending_mut() {
            let value = request.value().clone();
            request.satisfy(value);
        }
    }
}

impl MibHandler for TableHandler {
    fn handle<'a>(&'a self, ctx: &'a mut HandlerContext<'_>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            match ctx.mode() {
                Mode::Get => self.serve_get(ctx),
                Mode::GetNext | Mode::GetBulk => {
                    let registration = ctx.registration().clone();
                    self.serve_next(ctx, &registration);
                }
                Mode::SetReserve => self.reserve(ctx),
                Mode::SetAction => self.action(ctx),
                Mode::SetUndo => self.undo(ctx),
                Mode::SetCommit | Mode::SetCleanup => self.acknowledge(ctx),
            }
            Outcome::Done
        })
    }
}
