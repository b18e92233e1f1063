//! Allow-list policy: compiled rule sets and the scope store
//!
//! A [`RuleSet`] is an ordered list of rules combined with OR; an empty set
//! allows everything. Rule sets are compiled once when a [`PolicyDocument`]
//! is published and shared as immutable [`ScopePolicy`] snapshots.

use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlframe::Protocol;
use tracing::info;

use crate::{
    config::{PolicyDocument, RuleSpec, ScopeSpec},
    error::PolicyError,
    statement::Statement,
    traits::{Direction, PolicyResolver},
};

/// Statement field a rule inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKey {
    /// The statement action (verb or command name)
    Cmd,
    Schema,
    Table,
    /// Statement text, or line-command arguments
    Raw,
}

impl RuleKey {
    /// Match mode applied when a rule does not name one
    pub fn default_mode(&self) -> MatchMode {
        match self {
            Self::Cmd => MatchMode::Exact,
            Self::Schema | Self::Table => MatchMode::Regex,
            Self::Raw => MatchMode::Partial,
        }
    }

    fn field<'a>(&self, statement: &'a Statement) -> Option<&'a str> {
        match self {
            Self::Cmd => Some(statement.action.as_str()),
            Self::Schema => statement.schema.as_deref(),
            Self::Table => statement.table.as_deref(),
            Self::Raw => statement.raw.as_deref(),
        }
    }
}

/// How a rule value is compared with a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Case-sensitive equality
    Exact,
    /// Regular expression that must match the whole field
    Regex,
    /// Regular expression that may match anywhere in the field
    Partial,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Pattern(Regex),
}

/// One compiled allow rule.
#[derive(Debug, Clone)]
pub struct Rule {
    key:     RuleKey,
    mode:    MatchMode,
    value:   String,
    matcher: Matcher,
}

impl Rule {
    pub fn compile(spec: &RuleSpec) -> Result<Self, regex::Error> {
        let mode = spec.mode.unwrap_or_else(|| spec.key.default_mode());
        let matcher = match mode {
            MatchMode::Exact => Matcher::Exact(spec.value.clone()),
            MatchMode::Regex => Matcher::Pattern(Regex::new(&format!("^(?:{})$", spec.value))?),
            MatchMode::Partial => Matcher::Pattern(Regex::new(&spec.value)?),
        };
        Ok(Self {
            key: spec.key,
            mode,
            value: spec.value.clone(),
            matcher,
        })
    }

    /// True if the inspected field is present, non-empty and matches
    pub fn matches(&self, statement: &Statement) -> bool {
        let Some(field) = self.key.field(statement).filter(|f| !f.is_empty()) else {
            return false;
        };
        match &self.matcher {
            Matcher::Exact(value) => field == value,
            Matcher::Pattern(regex) => regex.is_match(field),
        }
    }

    pub fn key(&self) -> RuleKey {
        self.key
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Ordered allow rules, combined with OR.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules:    Vec<Rule>,
    deny_all: bool,
}

impl RuleSet {
    /// Rule set that allows every statement
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Rule set that allows nothing, used when a scope has no policy and
    /// the gate runs in strict mode
    pub fn deny_all() -> Self {
        Self {
            rules:    Vec::new(),
            deny_all: true,
        }
    }

    pub fn compile(specs: &[RuleSpec]) -> Result<Self, regex::Error> {
        let rules = specs.iter().map(Rule::compile).collect::<Result<_, _>>()?;
        Ok(Self {
            rules,
            deny_all: false,
        })
    }

    /// True if any rule matches, or if the set is empty and not deny-all
    pub fn matches(&self, statement: &Statement) -> bool {
        if self.rules.is_empty() {
            return !self.deny_all;
        }
        self.rules.iter().any(|rule| rule.matches(statement))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

/// Compiled, immutable policy for one scope.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    name:       String,
    protocol:   Option<Protocol>,
    deny_reply: bool,
    ingress:    RuleSet,
    egress:     RuleSet,
    replies:    RuleSet,
}

impl ScopePolicy {
    /// Policy with no rules: everything is allowed
    pub fn allow_all(name: impl Into<String>) -> Self {
        Self {
            name:       name.into(),
            protocol:   None,
            deny_reply: true,
            ingress:    RuleSet::allow_all(),
            egress:     RuleSet::allow_all(),
            replies:    RuleSet::allow_all(),
        }
    }

    pub fn compile(spec: &ScopeSpec) -> Result<Self, PolicyError> {
        if spec.name.trim().is_empty() {
            return Err(PolicyError::EmptyScopeName);
        }
        let protocol = spec
            .protocol
            .as_deref()
            .map(str::parse::<Protocol>)
            .transpose()
            .map_err(|source| PolicyError::UnknownProtocol {
                scope: spec.name.clone(),
                source,
            })?;
        let compile = |specs: &[RuleSpec]| {
            RuleSet::compile(specs).map_err(|source| PolicyError::InvalidRegex {
                scope:   spec.name.clone(),
                pattern: first_invalid_pattern(specs),
                source,
            })
        };
        Ok(Self {
            name: spec.name.clone(),
            protocol,
            deny_reply: spec.deny_reply.unwrap_or(true),
            ingress: compile(&spec.ingress)?,
            egress: compile(&spec.egress)?,
            replies: compile(&spec.replies)?,
        })
    }

    /// Rules for request traffic of a connection in `direction`, or for
    /// reply traffic when `is_reply` is set
    pub fn rules_for(&self, direction: Direction, is_reply: bool) -> &RuleSet {
        match (is_reply, direction) {
            (true, _) => &self.replies,
            (false, Direction::Ingress) => &self.ingress,
            (false, Direction::Egress) => &self.egress,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol the scope is restricted to, if any
    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    pub fn deny_reply(&self) -> bool {
        self.deny_reply
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_deny_reply(mut self, deny_reply: bool) -> Self {
        self.deny_reply = deny_reply;
        self
    }

    pub fn with_ingress(mut self, rules: RuleSet) -> Self {
        self.ingress = rules;
        self
    }

    pub fn with_egress(mut self, rules: RuleSet) -> Self {
        self.egress = rules;
        self
    }

    pub fn with_replies(mut self, rules: RuleSet) -> Self {
        self.replies = rules;
        self
    }
}

fn first_invalid_pattern(specs: &[RuleSpec]) -> String {
    specs
        .iter()
        .find(|spec| Rule::compile(spec).is_err())
        .map(|spec| spec.value.clone())
        .unwrap_or_default()
}

type ScopeMap = HashMap<String, Arc<ScopePolicy>>;

/// Compile every scope of `document`.
pub fn compile_document(document: &PolicyDocument) -> Result<ScopeMap, PolicyError> {
    let mut scopes = ScopeMap::with_capacity(document.scopes.len());
    for spec in &document.scopes {
        let policy = ScopePolicy::compile(spec)?;
        if scopes.insert(spec.name.clone(), Arc::new(policy)).is_some() {
            return Err(PolicyError::DuplicateScope(spec.name.clone()));
        }
    }
    Ok(scopes)
}

/// In-process policy distribution.
///
/// Readers get `Arc` snapshots without locking; writers compile a complete
/// new map and swap it in, so a reader never observes a partially applied
/// document.
#[derive(Debug, Default)]
pub struct PolicyStore {
    scopes: ArcSwap<ScopeMap>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(document: &PolicyDocument) -> Result<Self, PolicyError> {
        let store = Self::new();
        store.publish(document)?;
        Ok(store)
    }

    /// Replace every scope with the scopes of `document`.
    ///
    /// On error the previous policies stay in effect.
    pub fn publish(&self, document: &PolicyDocument) -> Result<(), PolicyError> {
        let scopes = compile_document(document)?;
        info!(scopes = scopes.len(), "publishing policy document");
        self.scopes.store(Arc::new(scopes));
        Ok(())
    }

    /// Add or replace a single scope
    pub fn upsert(&self, policy: ScopePolicy) {
        let policy = Arc::new(policy);
        self.scopes.rcu(|current| {
            let mut next = ScopeMap::clone(current);
            next.insert(policy.name().to_string(), Arc::clone(&policy));
            next
        });
    }

    /// Remove a scope; returns true if it existed
    pub fn remove(&self, name: &str) -> bool {
        let previous = self.scopes.rcu(|current| {
            let mut next = ScopeMap::clone(current);
            next.remove(name);
            next
        });
        previous.contains_key(name)
    }

    pub fn scope_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scopes.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.scopes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.load().is_empty()
    }
}

impl PolicyResolver for PolicyStore {
    fn resolve(&self, scope: &str) -> Option<Arc<ScopePolicy>> {
        self.scopes.load().get(scope).cloned()
    }
}
