#![no_main]

use libfuzzer_sys::fuzz_target;

use async_snmp_agent::agent::{Registration, Registry};
use async_snmp_agent::handler::{Outcome, handler_fn};
use async_snmp_agent::oid::Oid;

/// Split input into small OIDs: each byte is one arc, 0xFF ends an OID.
fn oids(data: &[u8]) -> Vec<Oid> {
    data.split(|b| *b == 0xFF)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| Oid::from_arcs(chunk.iter().map(|b| u32::from(*b % 8)).collect()))
        .collect()
}

fuzz_target!(|data: &[u8]| {
    let mut oids = oids(data);
    let Some(target) = oids.pop() else {
        return;
    };

    let registry = Registry::new();
    for (i, root) in oids.into_iter().enumerate() {
        let mut builder = Registration::builder(format!("r{i}"), root.clone())
            .priority((i % 4) as u8)
            .handler("leaf", handler_fn(|_| Outcome::Done));
        if root.len() > 1 && i % 3 == 0 {
            builder = builder.range(root.len(), 4);
        }
        // Duplicates and invalid ranges are expected; they must just be rejected.
        if let Ok(registration) = builder.build() {
            let _ = registry.register(registration);
        }
    }

    if let Ok(found) = registry.find_by_subtree(&target, b"") {
        assert!(found.covers(&target));
        let all = registry.find_all(&target, b"");
        assert_eq!(all.first().map(|r| r.name()), Some(found.name()));
    }

    let candidates = registry.find_next_candidates(&target, b"");
    for (bound, registration) in &candidates {
        assert!(*bound >= target);
        assert!(*bound >= registration.lower_bound());
        assert!(registration.upper_bound().is_none_or(|end| end > target));
    }
    assert!(candidates.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    assert_eq!(
        registry.find_for_next(&target, b"").map(|r| r.name().to_owned()),
        candidates.first().map(|(_, r)| r.name().to_owned()),
    );
});
