//! Fuzz target: Gate verdict accounting
//!
//! Feeds random bytes through a gate with a restrictive policy. Verdicts
//! must never panic, `More` must only come last, and consumed counts must
//! add up to what the connection reports.

#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use sqlgate::{
    Direction, Gate, NullAuditSink, PolicyDocument, PolicyStore, Protocol, ScopeKey, Verdict,
};

const POLICY: &str = r#"
scopes:
  - name: fuzz
    ingress:
      - key: cmd
        value: select
      - key: table
        value: "t[0-9]+"
      - key: raw
        value: "^READ"
"#;

fuzz_target!(|data: &[u8]| {
    let Ok(document) = PolicyDocument::from_yaml_str(POLICY) else {
        return;
    };
    let Ok(store) = PolicyStore::from_document(&document) else {
        return;
    };
    let gate = Gate::new(Arc::new(store)).with_audit_sink(Arc::new(NullAuditSink));

    for (id, protocol) in [(1, Protocol::LengthPrefixed), (2, Protocol::Line)] {
        let _ = gate.on_connection_established(id, Direction::Ingress, ScopeKey::new(protocol, "fuzz"));

        let mut consumed = 0u64;
        for chunk in data.chunks(17) {
            let Ok(verdicts) = gate.on_data(id, false, chunk) else {
                continue;
            };
            if let Some(pos) = verdicts.iter().position(|v| matches!(v, Verdict::More { .. })) {
                assert_eq!(pos, verdicts.len() - 1);
            }
            consumed += verdicts.iter().map(|v| v.consumed() as u64).sum::<u64>();
        }

        if let Some(summary) = gate.on_connection_closed(id) {
            assert_eq!(summary.bytes_consumed, consumed);
            assert_eq!(summary.bytes_offered, summary.bytes_consumed + summary.residue);
        }
    }
});
