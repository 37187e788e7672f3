//! Configuration structures.
//!
//! Configuration is loaded from `AGENTIX_*` environment variables or a YAML
//! file. The routing table (which tool servers exist) is loaded separately on
//! every run, see [`crate::tools::routing`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Error, Result};

/// Global back-office configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Credential validation.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Routing table location.
    #[serde(default)]
    pub routing: RoutingSettings,

    /// Audit trail storage.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Execution defaults.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Completion delivery.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Credential validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HMAC secret. Required.
    #[serde(default)]
    pub secret: String,

    /// Signature algorithm name (`HS256`, `HS384`, `HS512`).
    pub algorithm: String,

    pub expected_issuer: String,

    pub expected_subject: String,

    /// Audience that must be present in the token's audience set.
    pub required_audience: String,

    /// Clock skew tolerated on `exp`/`nbf`.
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            algorithm: "HS256".to_string(),
            expected_issuer: "agentix-bpmn".to_string(),
            expected_subject: "Automático".to_string(),
            required_audience: "agentix-mcp-expedientes".to_string(),
            leeway: Duration::ZERO,
        }
    }
}

/// Routing table location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    pub config_path: PathBuf,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/mcp_servers.yaml"),
        }
    }
}

/// Audit trail storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Base directory; one file per (target, run) pair below it.
    pub log_dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs/agent_runs"),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Execution defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Wall-clock budget when a request does not carry one.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// How long tracked runs are kept before the sweeper drops them.
    #[serde(with = "humantime_serde")]
    pub task_retention: Duration,

    /// How often the sweeper runs.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            task_retention: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Completion delivery (webhook) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_retries: u32,

    /// Delay before retry `n` is `backoff_factor^n` seconds.
    pub backoff_factor: f64,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Accept plain-http, loopback and private-network callback addresses.
    pub allow_insecure_callbacks: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            request_timeout: Duration::from_secs(10),
            allow_insecure_callbacks: false,
        }
    }
}

impl Config {
    /// Load from a YAML file, then validate.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `AGENTIX_*` environment variables onto the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("AGENTIX_JWT_SECRET") {
            config.auth.secret = v;
        }
        if let Some(v) = lookup("AGENTIX_JWT_ALGORITHM") {
            config.auth.algorithm = v;
        }
        if let Some(v) = lookup("AGENTIX_JWT_EXPECTED_ISSUER") {
            config.auth.expected_issuer = v;
        }
        if let Some(v) = lookup("AGENTIX_JWT_EXPECTED_SUBJECT") {
            config.auth.expected_subject = v;
        }
        if let Some(v) = lookup("AGENTIX_JWT_REQUIRED_AUDIENCE") {
            config.auth.required_audience = v;
        }
        if let Some(v) = lookup("AGENTIX_JWT_LEEWAY") {
            config.auth.leeway = parse_duration("AGENTIX_JWT_LEEWAY", &v)?;
        }
        if let Some(v) = lookup("AGENTIX_MCP_CONFIG_PATH") {
            config.routing.config_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("AGENTIX_LOG_DIR") {
            config.audit.log_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("AGENTIX_LOG_LEVEL") {
            config.observability.log_level = v;
        }
        if let Some(v) = lookup("AGENTIX_LOG_FORMAT") {
            config.observability.json_logs = v.eq_ignore_ascii_case("json");
        }
        if let Some(v) = lookup("AGENTIX_DEFAULT_TIMEOUT") {
            config.execution.default_timeout = parse_duration("AGENTIX_DEFAULT_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("AGENTIX_TASK_RETENTION") {
            config.execution.task_retention = parse_duration("AGENTIX_TASK_RETENTION", &v)?;
        }
        if let Some(v) = lookup("AGENTIX_ALLOW_INSECURE_CALLBACKS") {
            config.delivery.allow_insecure_callbacks = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("AGENTIX_WEBHOOK_MAX_RETRIES") {
            config.delivery.max_retries = v.parse().map_err(|_| {
                Error::config(format!("AGENTIX_WEBHOOK_MAX_RETRIES: not an integer: {}", v))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot validate any credential.
    pub fn validate(&self) -> Result<()> {
        if self.auth.secret.is_empty() {
            return Err(Error::config("AGENTIX_JWT_SECRET is required"));
        }
        if self.auth.required_audience.is_empty() {
            return Err(Error::config("required audience cannot be empty"));
        }
        if self.delivery.backoff_factor < 1.0 {
            return Err(Error::config("delivery backoff factor must be >= 1.0"));
        }
        Ok(())
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(value)
        .map_err(|e| Error::config(format!("{}: invalid duration '{}': {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.auth.algorithm, "HS256");
        assert_eq!(config.auth.expected_issuer, "agentix-bpmn");
        assert_eq!(config.auth.required_audience, "agentix-mcp-expedientes");
        assert_eq!(config.execution.default_timeout, Duration::from_secs(300));
        assert_eq!(config.delivery.max_retries, 3);
    }

    #[test]
    fn test_missing_secret_rejected() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("AGENTIX_JWT_SECRET"));
    }

    #[test]
    fn test_env_overlay() {
        let config = Config::from_lookup(lookup_from(&[
            ("AGENTIX_JWT_SECRET", "s3cret"),
            ("AGENTIX_JWT_EXPECTED_ISSUER", "other-engine"),
            ("AGENTIX_LOG_DIR", "/tmp/audit"),
            ("AGENTIX_LOG_FORMAT", "JSON"),
            ("AGENTIX_DEFAULT_TIMEOUT", "90s"),
        ]))
        .unwrap();

        assert_eq!(config.auth.secret, "s3cret");
        assert_eq!(config.auth.expected_issuer, "other-engine");
        assert_eq!(config.audit.log_dir, PathBuf::from("/tmp/audit"));
        assert!(config.observability.json_logs);
        assert_eq!(config.execution.default_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("AGENTIX_JWT_SECRET", "s3cret"),
            ("AGENTIX_DEFAULT_TIMEOUT", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("AGENTIX_DEFAULT_TIMEOUT"));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentix.yaml");
        std::fs::write(
            &path,
            "auth:\n  secret: abc\n  algorithm: HS512\n  expected_issuer: i\n  expected_subject: s\n  required_audience: a\n  leeway: 5s\nexecution:\n  default_timeout: 2m\n  task_retention: 1h\n  sweep_interval: 30s\n",
        )
        .unwrap();

        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.auth.algorithm, "HS512");
        assert_eq!(config.auth.leeway, Duration::from_secs(5));
        assert_eq!(config.execution.default_timeout, Duration::from_secs(120));
        assert_eq!(config.audit.log_dir, PathBuf::from("logs/agent_runs"));
    }
}
