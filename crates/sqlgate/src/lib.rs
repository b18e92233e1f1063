//! Statement filtering library
//!
//! Decides, frame by frame, whether traffic of a SQL-like client protocol
//! may pass a proxy. The host delivers raw bytes per connection and
//! direction; the gate reassembles frames, extracts the statement each one
//! carries and checks it against an allow-list policy.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use sqlgate::{Direction, Gate, PolicyDocument, PolicyStore, Protocol, ScopeKey};
//!
//! let store = Arc::new(PolicyStore::from_document(&PolicyDocument::from_yaml_str(yaml)?)?);
//! let gate = Gate::new(store);
//!
//! gate.on_connection_established(7, Direction::Ingress, ScopeKey::new(Protocol::LengthPrefixed, "orders"))?;
//! for verdict in gate.on_data(7, false, &bytes)? {
//!     // forward, drop or wait
//! }
//! gate.on_connection_closed(7);
//! ```

mod audit;
mod config;
mod connection;
mod error;
mod grammar;
mod policy;
mod statement;
mod traits;
mod verdict;

pub use audit::{AuditRecord, MemoryAuditSink, NullAuditSink, TracingAuditSink};
pub use config::{
    GateConfig, MissingPolicy, PolicyDocument, RuleSpec, ScopeSpec, load_gate_config,
    load_policy_document,
};
pub use connection::{ConnectionState, ConnectionSummary, ScopeKey};
pub use error::{ConfigError, GateError, PolicyError};
pub use grammar::{GrammarError, NoGrammar, ParsedStatement, SqlGrammar};
pub use policy::{
    MatchMode, PolicyStore, Rule, RuleKey, RuleSet, ScopePolicy, compile_document,
};
pub use sqlframe::{FrameLimits, Protocol};
pub use statement::{Command, Statement, extract};
pub use traits::{AuditSink, Direction, GrammarParser, PolicyResolver};
pub use verdict::{
    ER_TABLEACCESS_DENIED, Evaluation, LINE_ERROR_REPLY, SQLSTATE_ACCESS_DENIED, Verdict, decide,
    error_packet, error_reply, evaluate,
};

use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Connection table and host boundary.
///
/// Uses `DashMap<u64, Mutex<ConnectionState>>`: the shard lock is held only
/// to look up the entry, while the per-connection mutex serializes calls for
/// the same connection. Calls for different connections proceed in parallel.
pub struct Gate {
    connections: DashMap<u64, Mutex<ConnectionState>>,
    resolver:    Arc<dyn PolicyResolver>,
    grammar:     Arc<dyn GrammarParser>,
    audit:       Arc<dyn AuditSink>,
    config:      GateConfig,
}

impl Gate {
    /// Create a gate with the `sqlparser` grammar, `tracing` audit records
    /// and default configuration
    pub fn new(resolver: Arc<dyn PolicyResolver>) -> Self {
        Self {
            connections: DashMap::new(),
            resolver,
            grammar: Arc::new(SqlGrammar),
            audit: Arc::new(TracingAuditSink),
            config: GateConfig::default(),
        }
    }

    pub fn with_grammar(mut self, grammar: Arc<dyn GrammarParser>) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Applies to connections established afterwards
    pub fn with_config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Start tracking a connection and resolve its policy snapshot.
    pub fn on_connection_established(
        &self,
        id: u64,
        direction: Direction,
        scope: ScopeKey,
    ) -> Result<(), GateError> {
        match self.connections.entry(id) {
            Entry::Occupied(_) => Err(GateError::DuplicateConnection(id)),
            Entry::Vacant(slot) => {
                let state = ConnectionState::new(
                    id,
                    direction,
                    scope,
                    self.config.frame_limits(),
                    self.config.missing_policy,
                    self.resolver.as_ref(),
                );
                info!(
                    connection_id = id,
                    %direction,
                    scope = %state.scope(),
                    has_policy = state.policy().is_some(),
                    "connection established"
                );
                slot.insert(Mutex::new(state));
                Ok(())
            },
        }
    }

    /// Process bytes for one direction of a connection.
    ///
    /// Returns the verdicts in arrival order, ending with `More` when a
    /// partial frame is buffered.
    pub fn on_data(&self, id: u64, is_reply: bool, data: &[u8]) -> Result<Vec<Verdict>, GateError> {
        let Some(entry) = self.connections.get(&id) else {
            warn!(connection_id = id, "data for unknown connection");
            return Err(GateError::UnknownConnection(id));
        };
        let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
        state.on_data(data, is_reply, self.grammar.as_ref(), self.audit.as_ref())
    }

    /// Stop tracking a connection. Returns its final counters, or `None` if
    /// the id was unknown.
    pub fn on_connection_closed(&self, id: u64) -> Option<ConnectionSummary> {
        let (_, mutex) = self.connections.remove(&id)?;
        let summary = mutex.into_inner().unwrap_or_else(|e| e.into_inner()).summary();
        info!(
            connection_id = id,
            passed = summary.frames_passed,
            dropped = summary.frames_dropped,
            errored = summary.errored,
            "connection closed"
        );
        Some(summary)
    }

    /// Re-resolve every connection's policy snapshot, e.g. after publishing
    /// a new policy document.
    pub fn refresh_policies(&self) {
        for entry in self.connections.iter() {
            let mut state = entry.value().lock().unwrap_or_else(|e| e.into_inner());
            state.refresh_policy(self.resolver.as_ref());
        }
        info!(connections = self.connections.len(), "policies refreshed");
    }

    /// Returns true if the connection saw malformed input (false if unknown)
    pub fn is_errored(&self, id: u64) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|entry| entry.lock().unwrap_or_else(|e| e.into_inner()).is_errored())
    }

    /// Check if a connection is tracked
    pub fn contains(&self, id: u64) -> bool {
        self.connections.contains_key(&id)
    }

    /// Get number of tracked connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connections are tracked
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
