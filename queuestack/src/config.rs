//! Configuration management

use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub broker: BrokerConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Public base URL used in queue URLs, e.g. `http://sqs.local:4566`
    #[serde(default)]
    pub hostname: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            hostname: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_account_id")]
    pub account_id: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Queues to create at startup
    #[serde(default)]
    pub queues: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            account_id: default_account_id(),
            region: default_region(),
            sweep_interval_ms: default_sweep_interval_ms(),
            queues: Vec::new(),
        }
    }
}

fn default_port() -> u16 {
    4566
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_account_id() -> String {
    "000000000000".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

impl Config {
    /// Load configuration from an optional file and the environment
    ///
    /// Without an explicit path, `queuestack.toml` in the working directory is
    /// read if present. Environment variables use `QUEUESTACK_` plus the key
    /// path joined by `__`, e.g. `QUEUESTACK_BROKER__REGION`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("queuestack").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("QUEUESTACK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("broker.queues"),
            )
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }

    /// Base URL baked into queue URLs
    pub fn base_url(&self) -> String {
        if let Some(hostname) = &self.server.hostname {
            return hostname.trim_end_matches('/').to_string();
        }
        let host = match self.server.host.as_str() {
            "0.0.0.0" | "::" => "localhost",
            other => other,
        };
        format!("http://{}:{}", host, self.server.port)
    }
}
