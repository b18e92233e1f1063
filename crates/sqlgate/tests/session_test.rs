//! End-to-end sessions through the public API: a policy file on disk, a
//! gate with an in-memory audit sink, and traffic split the way a proxy
//! might deliver it.

use std::sync::Arc;

use sqlgate::{
    Direction, Gate, GateConfig, MemoryAuditSink, MissingPolicy, PolicyStore, Protocol, ScopeKey,
    Verdict, load_gate_config, load_policy_document,
};

const POLICY: &str = r#"
scopes:
  - name: analytics
    protocol: mysql
    ingress:
      - key: cmd
        value: select
      - key: cmd
        value: init_db
      - key: cmd
        value: quit
"#;

fn packet(sequence_id: u8, command: u8, body: &str) -> Vec<u8> {
    let mut payload = vec![command];
    payload.extend_from_slice(body.as_bytes());
    sqlframe::encode_packet(sequence_id, &payload).unwrap()
}

fn setup(dir: &tempfile::TempDir) -> (Gate, Arc<PolicyStore>, Arc<MemoryAuditSink>) {
    let policy_path = dir.path().join("policy.yml");
    std::fs::write(&policy_path, POLICY).unwrap();
    let config_path = dir.path().join("gate.json");
    std::fs::write(&config_path, r#"{"missing_policy": "deny"}"#).unwrap();

    let document = load_policy_document(&policy_path).unwrap();
    let config: GateConfig = load_gate_config(&config_path).unwrap();
    assert_eq!(config.missing_policy, MissingPolicy::Deny);

    let store = Arc::new(PolicyStore::from_document(&document).unwrap());
    let audit = Arc::new(MemoryAuditSink::new());
    let gate = Gate::new(store.clone())
        .with_config(config)
        .with_audit_sink(audit.clone());
    (gate, store, audit)
}

#[test]
fn test_client_session() {
    let dir = tempfile::tempdir().unwrap();
    let (gate, _store, audit) = setup(&dir);
    gate.on_connection_established(
        42,
        Direction::Ingress,
        ScopeKey::new(Protocol::LengthPrefixed, "analytics"),
    )
    .unwrap();

    let stream = [
        packet(0, 0x02, "warehouse"),
        packet(0, 0x03, "SELECT id, total FROM warehouse.orders"),
        packet(0, 0x03, "DELETE FROM warehouse.orders"),
        packet(0, 0x0e, ""),
        packet(0, 0x01, ""),
    ];
    let bytes = stream.concat();

    // Deliver in uneven segments that split headers and payloads
    let mut verdicts = Vec::new();
    for segment in [&bytes[..3], &bytes[3..20], &bytes[20..61], &bytes[61..]] {
        verdicts.extend(gate.on_data(42, false, segment).unwrap());
    }
    let decided: Vec<&Verdict> = verdicts
        .iter()
        .filter(|v| !matches!(v, Verdict::More { .. }))
        .collect();

    assert_eq!(decided.len(), stream.len());
    let outcome: Vec<bool> = decided.iter().map(|v| v.is_pass()).collect();
    assert_eq!(outcome, vec![true, true, false, false, true]);
    for (verdict, frame) in decided.iter().zip(&stream) {
        assert_eq!(verdict.consumed(), frame.len());
    }

    let actions: Vec<Option<String>> = audit.records().into_iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![
            Some("init_db".to_string()),
            Some("select".to_string()),
            Some("delete".to_string()),
            Some("ping".to_string()),
            Some("quit".to_string()),
        ]
    );

    let summary = gate.on_connection_closed(42).unwrap();
    assert_eq!(summary.frames_passed, 3);
    assert_eq!(summary.frames_dropped, 2);
    assert_eq!(summary.bytes_consumed, bytes.len() as u64);
    assert_eq!(summary.residue, 0);
}

#[test]
fn test_strict_mode_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let (gate, store, _audit) = setup(&dir);
    let scope = ScopeKey::new(Protocol::Line, "cache");
    gate.on_connection_established(1, Direction::Egress, scope).unwrap();

    let verdicts = gate.on_data(1, false, b"GET k\r\n").unwrap();
    assert!(verdicts[0].is_drop());

    store.upsert(sqlgate::ScopePolicy::allow_all("cache"));
    gate.refresh_policies();
    let verdicts = gate.on_data(1, false, b"GET k\r\n").unwrap();
    assert!(verdicts[0].is_pass());
}
