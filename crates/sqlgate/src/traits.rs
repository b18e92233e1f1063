//! Traits for the collaborators the gate consumes
//!
//! The host supplies connection direction and bytes; policy distribution,
//! grammar parsing and audit delivery sit behind the traits below so the
//! decision loop never depends on their internals.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    audit::AuditRecord,
    grammar::{GrammarError, ParsedStatement},
    policy::ScopePolicy,
};

/// Which side initiated the connection, relative to the protected endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client connecting into the protected endpoint
    Ingress,
    /// Protected endpoint connecting out to a server
    Egress,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Egress => "egress",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of compiled policy snapshots, keyed by scope name.
///
/// Returned snapshots are immutable; a resolver publishes changes by handing
/// out a new `Arc` on the next call.
pub trait PolicyResolver: Send + Sync {
    fn resolve(&self, scope: &str) -> Option<Arc<ScopePolicy>>;
}

/// Structured statement parser used to derive action, schema and table.
///
/// Failure is expected for statements outside the grammar and is never an
/// error for the caller: extraction falls back to the leading verb.
pub trait GrammarParser: Send + Sync {
    fn parse_statement(&self, text: &str) -> Result<ParsedStatement, GrammarError>;
}

impl<F> GrammarParser for F
where
    F: Fn(&str) -> Result<ParsedStatement, GrammarError> + Send + Sync,
{
    fn parse_statement(&self, text: &str) -> Result<ParsedStatement, GrammarError> {
        self(text)
    }
}

/// Receiver of one record per PASS/DROP decision. Must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}
