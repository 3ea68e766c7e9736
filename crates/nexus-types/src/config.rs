//! Shell configuration: the JSON config-file schema plus built-in defaults.
//!
//! Unknown keys are ignored; missing keys take the documented defaults.
//! Byte-valued fields accept either a raw integer or a `<n>KB|MB|GB` string.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::NexusError;

/// Default live-value memory cap: 50 MiB.
pub const DEFAULT_MAX_MEMORY: u64 = 50 * 1024 * 1024;

/// Default bound on the audit ring buffer.
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// Parse a byte specification: either a plain integer (`52428800`) or a
/// suffixed string (`50MB`, `512KB`, `1GB`). Suffixes are powers of 1024.
pub fn parse_byte_spec(spec: &str) -> Result<u64, NexusError> {
    let trimmed = spec.trim();
    if let Ok(n) = trimmed.parse::<u64>() {
        return Ok(n);
    }
    let upper = trimmed.to_ascii_uppercase();
    let (digits, multiplier) = if let Some(d) = upper.strip_suffix("GB") {
        (d, 1024u64 * 1024 * 1024)
    } else if let Some(d) = upper.strip_suffix("MB") {
        (d, 1024 * 1024)
    } else if let Some(d) = upper.strip_suffix("KB") {
        (d, 1024)
    } else if let Some(d) = upper.strip_suffix('B') {
        (d, 1)
    } else {
        return Err(NexusError::InvalidArgument(format!(
            "unrecognised byte spec '{spec}'"
        )));
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| NexusError::InvalidArgument(format!("unrecognised byte spec '{spec}'")))
}

/// Serde helper: accept an integer or a byte-spec string.
fn de_byte_spec<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Spec {
        Number(u64),
        Text(String),
    }
    match Spec::deserialize(deserializer)? {
        Spec::Number(n) => Ok(n),
        Spec::Text(s) => parse_byte_spec(&s).map_err(serde::de::Error::custom),
    }
}

fn de_opt_byte_spec<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Spec {
        Number(u64),
        Text(String),
    }
    match Option::<Spec>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Spec::Number(n)) => Ok(Some(n)),
        Some(Spec::Text(s)) => parse_byte_spec(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// The three built-in security policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyName {
    /// Deny-heavy, read-only posture.
    Sandbox,
    /// Broad allow with explicit sensitive denies.
    #[default]
    Developer,
    /// Middle ground.
    Production,
}

impl PolicyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyName::Sandbox => "sandbox",
            PolicyName::Developer => "developer",
            PolicyName::Production => "production",
        }
    }
}

fn default_thread_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_max_memory() -> u64 {
    DEFAULT_MAX_MEMORY
}

fn default_true() -> bool {
    true
}

/// `shell` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellSection {
    #[serde(deserialize_with = "de_byte_spec", default = "default_max_memory")]
    pub max_memory: u64,
    /// Parsed and recorded; JIT compilation is not implemented.
    #[serde(rename = "enableJIT", default)]
    pub enable_jit: bool,
    #[serde(default)]
    pub enable_sandbox: bool,
    #[serde(default)]
    pub enable_debug: bool,
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            max_memory: DEFAULT_MAX_MEMORY,
            enable_jit: false,
            enable_sandbox: false,
            enable_debug: false,
            thread_pool_size: default_thread_pool_size(),
        }
    }
}

/// `security` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySection {
    #[serde(default)]
    pub default_policy: PolicyName,
    #[serde(default = "default_true")]
    pub audit_logging: bool,
    /// `action:resource` grant strings applied at startup.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            default_policy: PolicyName::Developer,
            audit_logging: true,
            capabilities: Vec::new(),
        }
    }
}

/// `performance.thresholds` subsection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    #[serde(deserialize_with = "de_opt_byte_spec", default)]
    pub memory_warning: Option<u64>,
    /// Milliseconds.
    #[serde(default)]
    pub latency_warning: Option<u64>,
}

/// `performance` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSection {
    #[serde(default)]
    pub monitoring: bool,
    #[serde(default)]
    pub thresholds: Thresholds,
}

/// The complete shell configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShellConfig {
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub security: SecuritySection,
    #[serde(default)]
    pub performance: PerformanceSection,
    /// From `NEXUS_PLUGIN_PATH`; consumed by the out-of-scope plugin loader.
    #[serde(skip)]
    pub plugin_path: Option<PathBuf>,
    /// From `NEXUS_JS_PATH`; consumed by the out-of-scope scripted stdlib loader.
    #[serde(skip)]
    pub js_path: Option<PathBuf>,
}

impl ShellConfig {
    /// The policy the capability store starts with: the configured one, or
    /// `sandbox` when `enableSandbox` is set and no explicit policy was given.
    pub fn effective_policy(&self) -> PolicyName {
        if self.shell.enable_sandbox && self.security.default_policy == PolicyName::Developer {
            PolicyName::Sandbox
        } else {
            self.security.default_policy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_spec_forms() {
        assert_eq!(parse_byte_spec("52428800").unwrap(), 52428800);
        assert_eq!(parse_byte_spec("50MB").unwrap(), 50 * 1024 * 1024);
        assert_eq!(parse_byte_spec("512KB").unwrap(), 512 * 1024);
        assert_eq!(parse_byte_spec("1GB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_byte_spec(" 2mb ").unwrap(), 2 * 1024 * 1024);
        assert!(parse_byte_spec("lots").is_err());
    }

    #[test]
    fn defaults_when_sections_missing() {
        let cfg: ShellConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.shell.max_memory, DEFAULT_MAX_MEMORY);
        assert!(cfg.security.audit_logging);
        assert_eq!(cfg.security.default_policy, PolicyName::Developer);
        assert!(!cfg.shell.enable_jit);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg: ShellConfig = serde_json::from_str(
            r#"{"shell": {"maxMemory": "1MB", "futureKnob": 3}, "telemetry": {}}"#,
        )
        .unwrap();
        assert_eq!(cfg.shell.max_memory, 1024 * 1024);
    }

    #[test]
    fn camel_case_schema_round_trip() {
        let cfg: ShellConfig = serde_json::from_str(
            r#"{
                "shell": {"maxMemory": "50MB", "enableJIT": true, "threadPoolSize": 2},
                "security": {"defaultPolicy": "sandbox", "auditLogging": false,
                             "capabilities": ["fs:read:/tmp/**"]},
                "performance": {"monitoring": true,
                                "thresholds": {"memoryWarning": "40MB", "latencyWarning": 250}}
            }"#,
        )
        .unwrap();
        assert!(cfg.shell.enable_jit);
        assert_eq!(cfg.shell.thread_pool_size, 2);
        assert_eq!(cfg.security.default_policy, PolicyName::Sandbox);
        assert_eq!(cfg.security.capabilities, vec!["fs:read:/tmp/**"]);
        assert_eq!(
            cfg.performance.thresholds.memory_warning,
            Some(40 * 1024 * 1024)
        );
        assert_eq!(cfg.performance.thresholds.latency_warning, Some(250));
    }

    #[test]
    fn sandbox_flag_tightens_default_policy() {
        let cfg: ShellConfig =
            serde_json::from_str(r#"{"shell": {"enableSandbox": true}}"#).unwrap();
        assert_eq!(cfg.effective_policy(), PolicyName::Sandbox);

        let explicit: ShellConfig = serde_json::from_str(
            r#"{"shell": {"enableSandbox": true}, "security": {"defaultPolicy": "production"}}"#,
        )
        .unwrap();
        assert_eq!(explicit.effective_policy(), PolicyName::Production);
    }
}
