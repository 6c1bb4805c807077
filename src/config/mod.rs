use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `slack.webhook`.
pub const SLACK_WEBHOOK_ENV: &str = "SLACK_WEBHOOK_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no chains configured")]
    NoChains,
    #[error("invalid chain id {0:?}: only ASCII letters, digits, '.', '-' and '_' are allowed")]
    InvalidChainId(String),
    #[error("chain {0}: endpoint must not be empty")]
    MissingEndpoint(String),
    #[error("chain {0}: no Slack webhook configured (set slack.webhook, SLACK_WEBHOOK_URL or slack_webhook)")]
    MissingWebhook(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding one persisted upgrade record per chain.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Default polling interval for chains without an override.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Upper bound on every outbound HTTP request (chain REST/RPC and Slack).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub chains: BTreeMap<String, ChainSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackConfig {
    /// Incoming webhook URL - loaded from env SLACK_WEBHOOK_URL when set
    #[serde(default)]
    pub webhook: String,
}

/// Per-chain section as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    /// Cosmos REST (LCD) base URL
    pub endpoint: String,
    /// Tendermint RPC base URL, used for `/status` when present
    #[serde(default)]
    pub rpc: Option<String>,
    #[serde(default = "default_remind_diff_blocks")]
    pub remind_diff_blocks: u64,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub slack_webhook: Option<String>,
}

/// Fully resolved settings handed to one chain's monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: String,
    pub endpoint: String,
    pub rpc: Option<String>,
    pub interval: Duration,
    pub remind_diff_blocks: u64,
    pub slack_webhook: String,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_interval_seconds() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    5
}
fn default_metrics_listen() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    8000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_remind_diff_blocks() -> u64 {
    1000
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen: default_metrics_listen(),
            port: default_metrics_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Chain ids double as file names in the state directory.
pub fn is_valid_chain_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&contents)?;

        // Webhook URLs carry a token, prefer keeping them out of the file
        if let Ok(webhook) = std::env::var(SLACK_WEBHOOK_ENV) {
            if !webhook.is_empty() {
                config.slack.webhook = webhook;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse without touching the environment or validating.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::NoChains);
        }
        if self.interval_seconds == 0 {
            return Err(ConfigError::Zero("interval_seconds"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("request_timeout_secs"));
        }

        for (id, chain) in &self.chains {
            if !is_valid_chain_id(id) {
                return Err(ConfigError::InvalidChainId(id.clone()));
            }
            if chain.endpoint.trim().is_empty() {
                return Err(ConfigError::MissingEndpoint(id.clone()));
            }
            if chain.interval_seconds == Some(0) {
                return Err(ConfigError::Zero("chains.*.interval_seconds"));
            }
            if self.webhook_for(chain).is_none() {
                return Err(ConfigError::MissingWebhook(id.clone()));
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn metrics_addr(&self) -> String {
        format!("{}:{}", self.metrics.listen, self.metrics.port)
    }

    /// Resolve every chain section against the global defaults.
    pub fn chain_configs(&self) -> Vec<ChainConfig> {
        self.chains
            .iter()
            .map(|(id, chain)| ChainConfig {
                chain_id: id.clone(),
                endpoint: chain.endpoint.trim_end_matches('/').to_string(),
                rpc: chain
                    .rpc
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(|r| r.trim_end_matches('/').to_string()),
                interval: Duration::from_secs(
                    chain.interval_seconds.unwrap_or(self.interval_seconds),
                ),
                remind_diff_blocks: chain.remind_diff_blocks,
                slack_webhook: self.webhook_for(chain).unwrap_or_default(),
            })
            .collect()
    }

    fn webhook_for(&self, chain: &ChainSettings) -> Option<String> {
        chain
            .slack_webhook
            .as_deref()
            .filter(|w| !w.is_empty())
            .or_else(|| Some(self.slack.webhook.as_str()).filter(|w| !w.is_empty()))
            .map(str::to_string)
    }
}
