//! Gate configuration and policy documents
//!
//! Both load from YAML (`.yaml`/`.yml`) or JSON (`.json`) files. Every field
//! has a default, so an empty document is valid: default limits, fail-open
//! on missing policy, no scopes.

use std::path::Path;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sqlframe::FrameLimits;

use crate::{
    error::ConfigError,
    policy::{MatchMode, RuleKey},
};

/// What to do with frames on a connection whose scope has no policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    /// Forward everything
    #[default]
    Allow,
    /// Drop everything
    Deny,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub max_payload_len: usize,
    pub max_line_len:    usize,
    pub max_buffer_size: usize,
    pub missing_policy:  MissingPolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        let limits = FrameLimits::default();
        Self {
            max_payload_len: limits.max_payload_len,
            max_line_len:    limits.max_line_len,
            max_buffer_size: limits.max_buffer_size,
            missing_policy:  MissingPolicy::default(),
        }
    }
}

impl GateConfig {
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_payload_len: self.max_payload_len,
            max_line_len:    self.max_line_len,
            max_buffer_size: self.max_buffer_size,
        }
    }

    /// Rejects a buffer cap too small for the payload or line limit
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.frame_limits().validate()?;
        Ok(())
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

/// One allow rule as written in a policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub key:   RuleKey,
    pub value: String,
    /// Overrides the key's default match mode
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub mode:  Option<MatchMode>,
}

impl RuleSpec {
    pub fn new(key: RuleKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Rules for one policy scope as written in a policy document.
///
/// `name` is required; every other field may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSpec {
    pub name:       String,
    /// Protocol identifier the scope applies to; any protocol if absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol:   Option<String>,
    /// Attach a synthetic error reply to dropped requests (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_reply: Option<bool>,
    #[serde(default)]
    pub ingress:    Vec<RuleSpec>,
    #[serde(default)]
    pub egress:     Vec<RuleSpec>,
    #[serde(default)]
    pub replies:    Vec<RuleSpec>,
}

impl ScopeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A complete policy distribution: every scope the engine knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDocument {
    pub scopes: Vec<ScopeSpec>,
}

impl PolicyDocument {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}

pub fn load_policy_document(path: &Path) -> Result<PolicyDocument, ConfigError> {
    load(path)
}

pub fn load_gate_config(path: &Path) -> Result<GateConfig, ConfigError> {
    let config: GateConfig = load(path)?;
    config.validate()?;
    Ok(config)
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => Ok(serde_yaml::from_str(&text)?),
        Some("json") => Ok(serde_json::from_str(&text)?),
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    const POLICY_YAML: &str = r#"
scopes:
  - name: reporting
    protocol: mysql
    ingress:
      - key: cmd
        value: select
      - key: table
        value: "report_.*"
  - name: kv
    protocol: line
    deny_reply: false
    ingress:
      - key: cmd
        value: READ
      - key: raw
        value: "^s+$"
        match: regex
"#;

    #[test]
    fn test_policy_document_from_yaml() {
        let doc = PolicyDocument::from_yaml_str(POLICY_YAML).unwrap();
        assert_eq!(doc.scopes.len(), 2);

        let reporting = &doc.scopes[0];
        assert_eq!(reporting.name, "reporting");
        assert_eq!(reporting.protocol.as_deref(), Some("mysql"));
        assert_eq!(reporting.deny_reply, None);
        assert_eq!(reporting.ingress[1], RuleSpec::new(RuleKey::Table, "report_.*"));
        assert!(reporting.egress.is_empty());

        let kv = &doc.scopes[1];
        assert_eq!(kv.deny_reply, Some(false));
        assert_eq!(
            kv.ingress[1],
            RuleSpec::new(RuleKey::Raw, "^s+$").with_mode(MatchMode::Regex)
        );
    }

    #[test]
    fn test_policy_document_from_json() {
        let doc = PolicyDocument::from_json_str(
            r#"{"scopes":[{"name":"a","replies":[{"key":"cmd","value":"ok","match":"partial"}]}]}"#,
        )
        .unwrap();
        assert_eq!(doc.scopes[0].replies[0].mode, Some(MatchMode::Partial));
    }

    #[test]
    fn test_unknown_rule_key_rejected() {
        let err = PolicyDocument::from_yaml_str("scopes: [{name: a, ingress: [{key: host, value: x}]}]")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[rstest]
    #[case::missing_name("scopes: [{protocol: mysql}]")]
    #[case::only_rules("scopes: [{ingress: [{key: cmd, value: select}]}]")]
    fn test_scope_without_name_rejected(#[case] yaml: &str) {
        assert!(matches!(
            PolicyDocument::from_yaml_str(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[rstest]
    #[case::buffer_below_payload("{max_payload_len: 4096, max_buffer_size: 4099}")]
    #[case::buffer_below_line("{max_payload_len: 16, max_line_len: 4096, max_buffer_size: 4097}")]
    fn test_gate_config_rejects_small_buffer(#[case] yaml: &str) {
        assert!(matches!(
            GateConfig::from_yaml_str(yaml),
            Err(ConfigError::InvalidLimits(_))
        ));
    }

    #[test]
    fn test_gate_config_defaults() {
        let config = GateConfig::from_yaml_str("missing_policy: deny").unwrap();
        assert_eq!(config.missing_policy, MissingPolicy::Deny);
        assert_eq!(config.frame_limits(), FrameLimits::default());

        let config = GateConfig::from_json_str("{}").unwrap();
        assert_eq!(config, GateConfig::default());
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("policy.yaml");
        std::fs::File::create(&yaml_path)
            .unwrap()
            .write_all(POLICY_YAML.as_bytes())
            .unwrap();
        assert_eq!(load_policy_document(&yaml_path).unwrap().scopes.len(), 2);

        let json_path = dir.path().join("gate.json");
        std::fs::write(&json_path, r#"{"max_line_len": 128}"#).unwrap();
        assert_eq!(load_gate_config(&json_path).unwrap().max_line_len, 128);

        let toml_path = dir.path().join("gate.toml");
        std::fs::write(&toml_path, "").unwrap();
        assert!(matches!(
            load_gate_config(&toml_path),
            Err(ConfigError::UnsupportedFormat { .. })
        ));

        assert!(matches!(
            load_gate_config(&dir.path().join("missing.yaml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
