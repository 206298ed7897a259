//! Dispatch behaviour across registrations and chains.

mod common;

use std::sync::Arc;

use async_snmp_agent::agent::{
    BatchStatus, Dispatcher, Mode, Registration, Registry, RequestStatus, Transaction,
};
use async_snmp_agent::handler::{
    BoxFuture, ChainResult, HandlerContext, HandlerNode, MibHandler, Outcome, Position,
    RequestError, handler_fn,
};
use async_snmp_agent::{Error, Value, oid};
use common::*;

/// Runs the rest of the chain itself, logging before and after.
struct Around {
    log: CallLog,
    name: &'static str,
}

impl MibHandler for Around {
    fn handle<'a>(&'a self, ctx: &'a mut HandlerContext<'_>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            self.log.push(format!("{}:before", self.name));
            let result = ctx.call_next().await;
            self.log.push(format!("{}:after:{:?}", self.name, result));
            Outcome::Continue
        })
    }
}

fn parity_leaf(log: &CallLog, name: &'static str, even: bool) -> impl MibHandler {
    let log = log.clone();
    handler_fn(move |ctx| {
        log.push(name);
        for request in ctx.pending_mut() {
            if (request.index() % 2 == 0) == even {
                let value = Value::Integer(request.index() as i32);
                request.satisfy(value);
            }
        }
        if even { Outcome::Continue } else { Outcome::Done }
    })
}

#[tokio::test]
async fn two_handlers_split_a_batch_by_parity() {
    init_tracing();
    let log = CallLog::new();
    let registration = Arc::new(
        Registration::builder("parity", system_subtree())
            .handler("even", parity_leaf(&log, "even", true))
            .handler("odd", parity_leaf(&log, "odd", false))
            .build()
            .unwrap(),
    );

    let oids = [sys_descr(), sys_uptime(), sys_contact(), sys_name()];
    let completed = Dispatcher::default()
        .dispatch(registration, Transaction::new(Mode::Get), batch(&oids))
        .await
        .finish()
        .await
        .unwrap();

    assert_eq!(completed.status(), BatchStatus::Done);
    assert_eq!(log.entries(), vec!["even", "odd"]);
    for (i, request) in completed.requests().iter().enumerate() {
        assert_eq!(satisfied_value(request), Some(&Value::Integer(i as i32)));
    }
}

#[tokio::test]
async fn nested_and_iterative_chains_agree() {
    let iterative_log = CallLog::new();
    let iterative = Arc::new(
        Registration::builder("iterative", system_subtree())
            .handler("pre", recording(&iterative_log, "pre", || Outcome::Continue))
            .handler("leaf", constant(Value::Integer(7)))
            .build()
            .unwrap(),
    );

    let nested_log = CallLog::new();
    let nested = Arc::new(
        Registration::builder("nested", system_subtree())
            .handler(
                "pre",
                Around {
                    log: nested_log.clone(),
                    name: "pre",
                },
            )
            .handler("leaf", constant(Value::Integer(7)))
            .build()
            .unwrap(),
    );

    let dispatcher = Dispatcher::default();
    let oids = [sys_descr(), sys_name()];
    let a = dispatcher
        .dispatch(iterative, Transaction::new(Mode::Get), batch(&oids))
        .await
        .finish()
        .await
        .unwrap();
    let b = dispatcher
        .dispatch(nested, Transaction::new(Mode::Get), batch(&oids))
        .await
        .finish()
        .await
        .unwrap();

    assert_eq!(a.status(), b.status());
    assert_eq!(a.response(), b.response());
    assert_eq!(
        nested_log.entries(),
        vec!["pre:before".to_string(), "pre:after:Finished".to_string()]
    );
    assert_eq!(iterative_log.entries(), vec!["pre"]);
}

#[tokio::test]
async fn nested_failure_reaches_outer_handler() {
    let log = CallLog::new();
    let registration = Arc::new(
        Registration::builder("nested-fail", system_subtree())
            .handler(
                "outer",
                Around {
                    log: log.clone(),
                    name: "outer",
                },
            )
            .handler(
                "leaf",
                handler_fn(|_| Outcome::Fail(RequestError::NoSuchInstance)),
            )
            .build()
            .unwrap(),
    );

    let completed = Dispatcher::default()
        .dispatch(registration, Transaction::new(Mode::Get), batch(&[sys_name()]))
        .await
        .finish()
        .await
        .unwrap();

    assert_eq!(
        completed.status(),
        BatchStatus::Failed(RequestError::NoSuchInstance)
    );
    assert_eq!(
        log.entries()[1],
        format!(
            "outer:after:{:?}",
            ChainResult::Failed(RequestError::NoSuchInstance)
        )
    );
}

#[tokio::test]
async fn skip_to_bypasses_intermediate_nodes() {
    let log = CallLog::new();
    let registration = Arc::new(
        Registration::builder("skip", system_subtree())
            .handler("a", recording(&log, "a", || Outcome::skip_to("c")))
            .handler("b", recording(&log, "b", || Outcome::Continue))
            .node(HandlerNode::new("c", constant(Value::Integer(1))))
            .build()
            .unwrap(),
    );

    let completed = Dispatcher::default()
        .dispatch(registration, Transaction::new(Mode::Get), batch(&[sys_name()]))
        .await
        .finish()
        .await
        .unwrap();

    assert!(completed.is_done());
    assert_eq!(log.entries(), vec!["a"]);
    assert_eq!(
        satisfied_value(&completed.requests()[0]),
        Some(&Value::Integer(1))
    );
}

#[tokio::test]
async fn range_registration_rejects_arcs_past_upper_bound() {
    // ifDescr.<ifIndex> with ifIndex in 1..=10 at arc position 11
    let registry = Registry::new();
    let registration = registry
        .register(
            Registration::builder("ifDescr", if_descr(1))
                .range(11, 10)
                .handler("leaf", constant(Value::from("eth")))
                .build()
                .unwrap(),
        )
        .unwrap();

    assert!(registry.find_by_subtree(&if_descr(10), b"").is_ok());
    assert!(registry.find_by_subtree(&if_descr(11), b"").is_ok());

    let completed = Dispatcher::default()
        .dispatch(
            registration,
            Transaction::new(Mode::Get),
            batch(&[if_descr(10), if_descr(11)]),
        )
        .await
        .finish()
        .await
        .unwrap();

    assert_eq!(
        satisfied_value(&completed.requests()[0]),
        Some(&Value::from("eth"))
    );
    assert_eq!(
        completed.requests()[1].status(),
        &RequestStatus::Errored(RequestError::OutOfRange)
    );
}

#[tokio::test]
async fn duplicate_registration_leaves_original_dispatchable() {
    let registry = Registry::new();
    registry
        .register(
            Registration::builder("first", system_subtree())
                .handler("leaf", constant(Value::Integer(1)))
                .build()
                .unwrap(),
        )
        .unwrap();

    let err = registry
        .register(
            Registration::builder("second", system_subtree())
                .handler("leaf", constant(Value::Integer(2)))
                .build()
                .unwrap(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateSubtree { .. }));

    let registration = registry.find_by_subtree(&sys_name(), b"").unwrap();
    assert_eq!(registration.name(), "first");

    let completed = Dispatcher::default()
        .dispatch(registration, Transaction::new(Mode::Get), batch(&[sys_name()]))
        .await
        .finish()
        .await
        .unwrap();
    assert_eq!(
        satisfied_value(&completed.requests()[0]),
        Some(&Value::Integer(1))
    );
}

#[tokio::test]
async fn longest_prefix_then_priority() {
    let registry = Registry::new();
    registry
        .register(
            Registration::builder("broad", oid!(1, 3, 6, 1, 2, 1))
                .priority(1)
                .handler("leaf", constant(Value::Integer(1)))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            Registration::builder("system", system_subtree())
                .priority(200)
                .handler("leaf", constant(Value::Integer(2)))
                .build()
                .unwrap(),
        )
        .unwrap();

    // Longer prefix wins even with a worse priority.
    let found = registry.find_by_subtree(&sys_name(), b"").unwrap();
    assert_eq!(found.name(), "system");

    // Two column registrations whose range arcs overlap cover the same
    // instance with equal prefix length; priority orders them.
    for (name, column, priority) in [("low", 1, 100), ("high", 2, 10)] {
        registry
            .register(
                Registration::builder(name, if_entry().child(column))
                    .context(CONTEXT_BRIDGE)
                    .priority(priority)
                    .range(10, 5)
                    .handler("leaf", constant(Value::Integer(3)))
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }
    let instance = oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 3, 1);
    let names: Vec<String> = registry
        .find_all(&instance, CONTEXT_BRIDGE)
        .iter()
        .map(|r| r.name().to_string())
        .collect();
    assert_eq!(names, vec!["high", "low"]);

    // The default context never sees the bridge registrations.
    let found = registry.find_by_subtree(&instance, b"").unwrap();
    assert_eq!(found.name(), "broad");
}

async fn released_after(last: HandlerNode) -> (usize, usize) {
    let counter = ReleaseCounter::new();
    let registration = Arc::new(
        Registration::builder("release", system_subtree())
            .handler("attach", counter.attacher("lock"))
            .node(last)
            .build()
            .unwrap(),
    );

    let completed = Dispatcher::default()
        .dispatch(
            registration,
            Transaction::new(Mode::Get),
            batch(&[sys_descr(), sys_name()]),
        )
        .await
        .finish()
        .await
        .unwrap();

    let at_completion = counter.count();
    drop(completed);
    (at_completion, counter.count())
}

#[tokio::test]
async fn extension_data_released_once_on_done() {
    let last = HandlerNode::new("last", constant(Value::Null));
    assert_eq!(released_after(last).await, (2, 2));
}

#[tokio::test]
async fn extension_data_released_once_on_fail() {
    let last = HandlerNode::new(
        "last",
        handler_fn(|_| Outcome::Fail(RequestError::Internal)),
    );
    assert_eq!(released_after(last).await, (2, 2));
}

#[tokio::test]
async fn set_phase_keeps_data_until_final_phase() {
    let counter = ReleaseCounter::new();
    let registration = Arc::new(
        Registration::builder("rw", system_subtree())
            .handler("attach", counter.attacher("undo"))
            .handler("leaf", constant(Value::Null))
            .build()
            .unwrap(),
    );

    let completed = Dispatcher::default()
        .dispatch(
            registration,
            Transaction::new(Mode::SetReserve),
            batch(&[sys_name()]),
        )
        .await
        .finish()
        .await
        .unwrap();

    assert!(completed.is_done());
    assert_eq!(counter.count(), 0);
    assert!(completed.requests()[0].data().contains("undo"));
}

#[tokio::test]
async fn injected_node_runs_in_later_dispatches() {
    let log = CallLog::new();
    let registry = Registry::new();
    registry
        .register(
            Registration::builder("system", system_subtree())
                .handler("leaf", constant(Value::Integer(1)))
                .build()
                .unwrap(),
        )
        .unwrap();
    let before = registry.find_by_subtree(&sys_name(), b"").unwrap();

    registry
        .inject(
            "system",
            b"",
            HandlerNode::new("audit", recording(&log, "audit", || Outcome::Continue)),
            Position::before("leaf"),
        )
        .unwrap();
    let after = registry.find_by_subtree(&sys_name(), b"").unwrap();

    assert_eq!(before.chain().names(), vec!["leaf"]);
    assert_eq!(after.chain().names(), vec!["audit", "leaf"]);

    Dispatcher::default()
        .dispatch(after, Transaction::new(Mode::Get), batch(&[sys_name()]))
        .await
        .finish()
        .await
        .unwrap();
    assert_eq!(log.entries(), vec!["audit"]);
}

#[tokio::test]
async fn fall_through_to_broader_registration() {
    let registry = Arc::new(Registry::new());
    registry
        .register(
            Registration::builder("broad", oid!(1, 3, 6, 1, 2, 1))
                .handler("leaf", constant(Value::Integer(99)))
                .build()
                .unwrap(),
        )
        .unwrap();

    struct FallThrough(Arc<Registry>);

    impl MibHandler for FallThrough {
        fn handle<'a>(&'a self, ctx: &'a mut HandlerContext<'_>) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                let oid = ctx.requests()[0].oid().clone();
                let context = ctx.transaction().context_name.clone();
                match self.0.find_fallback(&oid, &context, ctx.registration()) {
                    Some(broader) => {
                        ctx.dispatch_to(&broader).await;
                        Outcome::Continue
                    }
                    None => Outcome::Fail(RequestError::NoSuchObject),
                }
            })
        }
    }

    let specific = registry
        .register(
            Registration::builder("specific", system_subtree())
                .handler("fallthrough", FallThrough(registry.clone()))
                .build()
                .unwrap(),
        )
        .unwrap();

    let completed = Dispatcher::default()
        .dispatch(specific, Transaction::new(Mode::Get), batch(&[sys_name()]))
        .await
        .finish()
        .await
        .unwrap();

    assert_eq!(
        satisfied_value(&completed.requests()[0]),
        Some(&Value::Integer(99))
    );
}
