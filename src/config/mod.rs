// Configuration module

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::error::ConfigError;
use crate::models::Severity;

const DEFAULT_CONFIG_PATH: &str = "config/byakugan.yaml";

#[derive(Debug, Deserialize, Clone, Default, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub core: CoreConfig,
    #[validate(nested)]
    pub parser: ParserConfig,
    #[validate(nested)]
    pub rule_engine: RuleEngineConfig,
    #[validate(nested)]
    pub coordinator: CoordinatorConfig,
    #[validate(nested)]
    pub comms: CommsConfig,
    pub auth: AuthConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct CoreConfig {
    #[validate(length(min = 1))]
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct ParserConfig {
    /// Bytes
    #[validate(range(min = 1))]
    pub max_file_size: usize,
    /// Substrings that mark a parameter name as an injection candidate
    pub vulnerable_params: Vec<String>,
    #[validate(length(min = 1))]
    pub injection_category: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            vulnerable_params: ["query", "search", "filter", "where", "id"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            injection_category: "sql_injection".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct RuleEngineConfig {
    pub rules_dir: PathBuf,
    pub custom_rules_dir: Option<PathBuf>,
    /// Empty means every category participates
    pub enabled_categories: Vec<String>,
    pub severity_threshold: Severity,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            rules_dir: PathBuf::from("rules"),
            custom_rules_dir: None,
            enabled_categories: Vec::new(),
            severity_threshold: Severity::Low,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct CoordinatorConfig {
    #[validate(range(min = 1, max = 1024))]
    pub concurrent_limit: usize,
    #[validate(range(min = 1))]
    pub task_timeout_secs: u64,
    /// Attempts per task, including the first
    #[validate(range(min = 1, max = 100))]
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl CoordinatorConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: 10,
            task_timeout_secs: 300,
            retry_count: 3,
            retry_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub domain_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_tls"))]
pub struct CommsConfig {
    #[validate(length(min = 1))]
    pub scanner_nodes: Vec<String>,
    #[validate(range(min = 1))]
    pub connect_timeout_secs: u64,
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
    #[validate(range(min = 1024, max = 67108864))]
    pub max_message_size: usize,
    pub connection_retries: u32,
    pub connection_retry_delay_ms: u64,
    /// Extra attempts for calls rejected with `Unavailable`
    pub transport_retries: u32,
    pub transport_retry_delay_ms: u64,
    pub keepalive_interval_secs: u64,
    pub keepalive_timeout_secs: u64,
    pub tls: TlsConfig,
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            scanner_nodes: vec!["http://127.0.0.1:50051".to_string()],
            connect_timeout_secs: 5,
            request_timeout_secs: 120,
            max_message_size: 10 * 1024 * 1024,
            connection_retries: 3,
            connection_retry_delay_ms: 1_000,
            transport_retries: 2,
            transport_retry_delay_ms: 500,
            keepalive_interval_secs: 30,
            keepalive_timeout_secs: 10,
            tls: TlsConfig::default(),
        }
    }
}

fn validate_tls(comms: &CommsConfig) -> Result<(), ValidationError> {
    let tls = &comms.tls;
    if !tls.enabled {
        return Ok(());
    }
    if tls.client_cert.is_some() != tls.client_key.is_some() {
        return Err(ValidationError::new("tls_identity_incomplete"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub basic_username: Option<String>,
    pub basic_password: Option<String>,
    pub api_key: Option<String>,
    pub api_key_header: Option<String>,
    /// Pre-issued bearer token used for JWT and OAuth2 requirements
    pub bearer_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ScanConfig {
    pub definition: Option<String>,
    pub target_base_url: Option<String>,
    pub report_path: Option<PathBuf>,
}

impl Config {
    /// Built-in defaults, overridden by the optional YAML file named by
    /// `BYAKUGAN_CONFIG` and then by `BYAKUGAN__SECTION__KEY` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("BYAKUGAN_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Yaml).required(false))
            .add_source(
                config::Environment::with_prefix("BYAKUGAN")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("comms.scanner_nodes")
                    .with_list_parse_key("parser.vulnerable_params")
                    .with_list_parse_key("rule_engine.enabled_categories")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.coordinator.retry_count, 3);
        assert_eq!(config.comms.max_message_size, 10 * 1024 * 1024);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("byakugan.yaml");
        std::fs::write(
            &path,
            "coordinator:\n  concurrent_limit: 4\n  retry_delay_ms: 10\nrule_engine:\n  severity_threshold: HIGH\n",
        )
        .unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.coordinator.concurrent_limit, 4);
        assert_eq!(config.coordinator.retry_delay(), Duration::from_millis(10));
        assert_eq!(config.coordinator.retry_count, 3);
        assert_eq!(config.rule_engine.severity_threshold, Severity::High);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = Config::default();
        config.coordinator.concurrent_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tls_identity_needs_cert_and_key() {
        let mut config = Config::default();
        config.comms.tls.enabled = true;
        config.comms.tls.client_cert = Some(PathBuf::from("client.pem"));
        assert!(config.validate().is_err());

        config.comms.tls.client_key = Some(PathBuf::from("client.key"));
        assert!(config.validate().is_ok());
    }
}
