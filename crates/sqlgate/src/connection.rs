//! Per-connection state: one framing state per direction plus the policy
//! snapshot the connection is evaluated against.

use std::sync::Arc;

use chrono::Utc;
use sqlframe::{FrameLimits, FrameState, Protocol};
use tracing::{debug, warn};

use crate::{
    audit::AuditRecord,
    config::MissingPolicy,
    error::GateError,
    policy::{RuleSet, ScopePolicy},
    traits::{AuditSink, Direction, GrammarParser, PolicyResolver},
    verdict::{Evaluation, Verdict, evaluate},
};

/// Identifies which policy applies to a connection: the listener's wire
/// protocol plus the policy scope name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    pub protocol: Protocol,
    pub policy:   String,
}

impl ScopeKey {
    pub fn new(protocol: Protocol, policy: impl Into<String>) -> Self {
        Self {
            protocol,
            policy: policy.into(),
        }
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.protocol, self.policy)
    }
}

/// Final counters of a closed connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub connection_id:  u64,
    pub direction:      Direction,
    pub scope:          ScopeKey,
    pub frames_passed:  u64,
    pub frames_dropped: u64,
    /// Bytes delivered by the host, both directions
    pub bytes_offered:  u64,
    /// Bytes covered by PASS/DROP verdicts, both directions
    pub bytes_consumed: u64,
    /// Bytes still buffered as incomplete frames at close
    pub residue:        u64,
    /// Whether either direction saw malformed input
    pub errored:        bool,
}

/// State of one bidirectional connection.
///
/// Not internally synchronized: the host delivers data for a connection
/// from a single context at a time.
#[derive(Debug)]
pub struct ConnectionState {
    id:             u64,
    direction:      Direction,
    scope:          ScopeKey,
    missing_policy: MissingPolicy,
    /// Snapshot in effect; `None` when the scope has no usable policy
    policy:         Option<Arc<ScopePolicy>>,

    /// Client to server
    request: FrameState,
    /// Server to client
    reply:   FrameState,

    frames_passed:  u64,
    frames_dropped: u64,
}

impl ConnectionState {
    pub fn new(
        id: u64,
        direction: Direction,
        scope: ScopeKey,
        limits: FrameLimits,
        missing_policy: MissingPolicy,
        resolver: &dyn PolicyResolver,
    ) -> Self {
        let policy = resolve_policy(resolver, &scope);
        Self {
            id,
            direction,
            request: FrameState::with_limits(scope.protocol, limits),
            reply: FrameState::with_limits(scope.protocol, limits),
            scope,
            missing_policy,
            policy,
            frames_passed: 0,
            frames_dropped: 0,
        }
    }

    /// Feed bytes for one direction and decide every complete frame.
    ///
    /// Verdicts are in arrival order; their `consumed` counts sum to the
    /// bytes that left the residue during this call. A trailing `More` means
    /// the remaining bytes are buffered.
    pub fn on_data(
        &mut self,
        data: &[u8],
        is_reply: bool,
        grammar: &dyn GrammarParser,
        audit: &dyn AuditSink,
    ) -> Result<Vec<Verdict>, GateError> {
        let framing = if is_reply {
            &mut self.reply
        } else {
            &mut self.request
        };
        let decoded = framing.feed(data).map_err(|source| GateError::Frame {
            connection_id: self.id,
            source,
        })?;

        if let Some(malformed) = &decoded.malformed {
            warn!(
                connection_id = self.id,
                scope = %self.scope,
                is_reply,
                discarded = malformed.discarded,
                "malformed input, dropping residue: {}",
                malformed.error
            );
        }

        let fallback;
        let (rules, deny_reply) = match &self.policy {
            Some(policy) => (policy.rules_for(self.direction, is_reply), policy.deny_reply()),
            None => {
                fallback = match self.missing_policy {
                    MissingPolicy::Allow => RuleSet::allow_all(),
                    MissingPolicy::Deny => RuleSet::deny_all(),
                };
                (&fallback, true)
            },
        };
        // Replies are never answered with a synthetic error
        let evaluations = evaluate(&decoded, rules, deny_reply && !is_reply, grammar);

        let mut verdicts = Vec::with_capacity(evaluations.len());
        for Evaluation { verdict, statement } in evaluations {
            if let Verdict::More { .. } = verdict {
                verdicts.push(verdict);
                continue;
            }
            if verdict.is_pass() {
                self.frames_passed += 1;
            } else {
                self.frames_dropped += 1;
            }
            let (action, schema, table) = match statement {
                Some(s) => (Some(s.action), s.schema, s.table),
                None => (None, None, None),
            };
            audit.record(AuditRecord {
                connection_id: self.id,
                direction: self.direction,
                is_reply,
                scope: self.scope.policy.clone(),
                action,
                schema,
                table,
                verdict: verdict.as_str(),
                consumed: verdict.consumed(),
                timestamp: Utc::now(),
            });
            verdicts.push(verdict);
        }

        debug!(
            connection_id = self.id,
            is_reply,
            offered = data.len(),
            verdicts = verdicts.len(),
            "data processed"
        );
        Ok(verdicts)
    }

    /// Re-resolve the policy snapshot. Evaluations already running keep the
    /// snapshot they started with.
    pub fn refresh_policy(&mut self, resolver: &dyn PolicyResolver) {
        self.policy = resolve_policy(resolver, &self.scope);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn policy(&self) -> Option<&Arc<ScopePolicy>> {
        self.policy.as_ref()
    }

    /// Returns true once either direction has seen malformed input
    pub fn is_errored(&self) -> bool {
        self.request.is_errored() || self.reply.is_errored()
    }

    pub fn request_state(&self) -> &FrameState {
        &self.request
    }

    pub fn reply_state(&self) -> &FrameState {
        &self.reply
    }

    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            connection_id:  self.id,
            direction:      self.direction,
            scope:          self.scope.clone(),
            frames_passed:  self.frames_passed,
            frames_dropped: self.frames_dropped,
            bytes_offered:  self.request.bytes_offered() + self.reply.bytes_offered(),
            bytes_consumed: self.request.bytes_consumed() + self.reply.bytes_consumed(),
            residue:        (self.request.residue_len() + self.reply.residue_len()) as u64,
            errored:        self.is_errored(),
        }
    }
}

/// Look up the policy for `scope`, treating a policy declared for a
/// different protocol as absent.
fn resolve_policy(resolver: &dyn PolicyResolver, scope: &ScopeKey) -> Option<Arc<ScopePolicy>> {
    let policy = resolver.resolve(&scope.policy)?;
    match policy.protocol() {
        Some(declared) if declared != scope.protocol => {
            warn!(
                scope = %scope,
                declared = %declared,
                "policy protocol does not match listener, ignoring policy"
            );
            None
        },
        _ => Some(policy),
    }
}
