//! Error types for the gate, policy compilation and configuration loading

use std::path::PathBuf;

use sqlframe::{InvalidLimits, ParseError, UnknownProtocol};
use thiserror::Error;

/// Errors returned at the host boundary.
#[derive(Debug, Error)]
pub enum GateError {
    /// Data or close for a connection that was never established
    #[error("unknown connection {0}")]
    UnknownConnection(u64),

    #[error("connection {0} is already established")]
    DuplicateConnection(u64),

    /// Framing rejected the bytes of an errored direction
    #[error("connection {connection_id}: {source}")]
    Frame {
        connection_id: u64,
        #[source]
        source:        ParseError,
    },
}

/// Errors compiling a policy document into rule sets.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("scope '{scope}': invalid regex '{pattern}': {source}")]
    InvalidRegex {
        scope:   String,
        pattern: String,
        #[source]
        source:  regex::Error,
    },

    #[error("scope '{scope}': {source}")]
    UnknownProtocol {
        scope:  String,
        #[source]
        source: UnknownProtocol,
    },

    #[error("duplicate scope '{0}'")]
    DuplicateScope(String),

    #[error("scope name is empty")]
    EmptyScopeName,
}

/// Errors loading configuration or policy files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// File extension is neither YAML nor JSON
    #[error("unsupported configuration format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("invalid frame limits: {0}")]
    InvalidLimits(#[from] InvalidLimits),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}
