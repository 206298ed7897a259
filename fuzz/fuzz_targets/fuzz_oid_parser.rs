#![no_main]

use libfuzzer_sys::fuzz_target;

use async_snmp_agent::oid::Oid;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    // Anything that parses must display back to something that parses to the same OID
    if let Ok(oid) = Oid::parse(s) {
        let reparsed = Oid::parse(&oid.to_string()).expect("displayed OID must parse");
        assert_eq!(oid, reparsed);
    }
});
