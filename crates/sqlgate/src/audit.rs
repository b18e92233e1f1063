//! Audit records for PASS/DROP decisions

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::traits::{AuditSink, Direction};

/// One PASS or DROP decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub connection_id: u64,
    pub direction:     Direction,
    pub is_reply:      bool,
    pub scope:         String,
    pub action:        Option<String>,
    pub schema:        Option<String>,
    pub table:         Option<String>,
    /// `"pass"` or `"drop"`
    pub verdict:       &'static str,
    pub consumed:      usize,
    pub timestamp:     DateTime<Utc>,
}

impl AuditRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn is_drop(&self) -> bool {
        self.verdict == "drop"
    }
}

/// Emits every record as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        info!(
            target: "sqlgate::audit",
            connection_id = record.connection_id,
            direction = %record.direction,
            is_reply = record.is_reply,
            scope = %record.scope,
            action = record.action.as_deref().unwrap_or(""),
            schema = record.schema.as_deref().unwrap_or(""),
            table = record.table.as_deref().unwrap_or(""),
            verdict = record.verdict,
            consumed = record.consumed,
            "statement {}",
            record.verdict
        );
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _record: AuditRecord) {}
}

/// Keeps the most recent records in memory and counts every decision.
#[derive(Debug)]
pub struct MemoryAuditSink {
    capacity: usize,
    records:  Mutex<VecDeque<AuditRecord>>,
    passed:   AtomicU64,
    dropped:  AtomicU64,
}

impl MemoryAuditSink {
    /// Default number of retained records
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY))),
            passed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Retained records, oldest first
    pub fn records(&self) -> Vec<AuditRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().cloned().collect()
    }

    pub fn passed(&self) -> u64 {
        self.passed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        let counter = if record.is_drop() {
            &self.dropped
        } else {
            &self.passed
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(connection_id: u64, verdict: &'static str) -> AuditRecord {
        AuditRecord {
            connection_id,
            direction: Direction::Ingress,
            is_reply: false,
            scope: "orders".into(),
            action: Some("select".into()),
            schema: Some("d".into()),
            table: Some("t".into()),
            verdict,
            consumed: 24,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_memory_sink_counts_and_bounds() {
        let sink = MemoryAuditSink::with_capacity(2);
        sink.record(record(1, "pass"));
        sink.record(record(2, "drop"));
        sink.record(record(3, "pass"));

        assert_eq!(sink.passed(), 2);
        assert_eq!(sink.dropped(), 1);
        let ids: Vec<u64> = sink.records().iter().map(|r| r.connection_id).collect();
        assert_eq!(ids, vec![2, 3]);

        sink.clear();
        assert!(sink.records().is_empty());
        assert_eq!(sink.passed(), 2);
    }

    #[test]
    fn test_zero_capacity_only_counts() {
        let sink = MemoryAuditSink::with_capacity(0);
        sink.record(record(1, "drop"));
        assert_eq!(sink.dropped(), 1);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_record_json() {
        let json = record(7, "drop").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["connection_id"], 7);
        assert_eq!(value["direction"], "ingress");
        assert_eq!(value["verdict"], "drop");
        assert_eq!(value["table"], "t");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_sinks_accept_records() {
        TracingAuditSink.record(record(1, "pass"));
        NullAuditSink.record(record(1, "pass"));
    }
}
