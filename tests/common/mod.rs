//! Shared test utilities for async-snmp-agent integration tests.

// Allow dead code and unused imports since not all test files use all utilities
#![allow(dead_code)]
#![allow(unused_imports)]

mod fixtures;

pub use fixtures::*;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_snmp_agent::agent::{Request, RequestBatch, RequestStatus};
use async_snmp_agent::handler::{MibHandler, Outcome, handler_fn};
use async_snmp_agent::{Oid, Value};
use parking_lot::Mutex;

/// Install a test-writer subscriber, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Ordered record of handler invocations shared between handlers of a test.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Handler that logs its name and returns `outcome()`.
pub fn recording(log: &CallLog, name: &'static str, outcome: fn() -> Outcome) -> impl MibHandler {
    let log = log.clone();
    handler_fn(move |_| {
        log.push(name);
        outcome()
    })
}

/// Leaf that satisfies every pending request with `value`.
pub fn constant(value: Value) -> impl MibHandler {
    handler_fn(move |ctx| {
        for request in ctx.pending_mut() {
            request.satisfy(value.clone());
        }
        Outcome::Done
    })
}

/// Counts release callbacks of attached extension data.
#[derive(Clone, Default)]
pub struct ReleaseCounter(Arc<AtomicUsize>);

impl ReleaseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Handler attaching one counted entry named `name` to each pending request.
    pub fn attacher(&self, name: &'static str) -> impl MibHandler {
        let counter = self.clone();
        handler_fn(move |ctx| {
            for request in ctx.pending_mut() {
                let counter = counter.clone();
                request
                    .data_mut()
                    .attach_with(name, (), move |()| {
                        counter.0.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            }
            Outcome::Continue
        })
    }
}

/// Batch of GET-style requests for `oids`, indexed in order.
pub fn batch(oids: &[Oid]) -> RequestBatch {
    RequestBatch::new(
        oids.iter()
            .enumerate()
            .map(|(i, oid)| Request::new(i, oid.clone(), Value::Null))
            .collect(),
    )
}

/// Value a request was satisfied with, if it was.
pub fn satisfied_value(request: &Request) -> Option<&Value> {
    match request.status() {
        RequestStatus::Satisfied(vb) => Some(&vb.value),
        _ => None,
    }
}
