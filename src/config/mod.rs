use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub coordinator: CoordinatorConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Stable identifier for this host; falls back to $HOSTNAME
    pub host_id: Option<String>,
    pub heartbeat_interval: i64,
    /// Number of hosts serving each tenant group
    pub tenants_per_group: i64,
    /// Maximum due jobs fetched per tenant per coordination cycle
    pub poll_limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Lock lease length; a stale lock is reclaimable after this many seconds
    pub max_execution_time_secs: i64,
    /// How long completed records are retained before the janitor purges them
    pub completed_retention_secs: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./cron-fleet.db".to_string(),
            max_connections: Some(10),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host_id: None,
            heartbeat_interval: 60,
            tenants_per_group: 2,
            poll_limit: 100,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_execution_time_secs: 600,
            completed_retention_secs: 86400,
        }
    }
}

impl Config {
    /// Load from the given TOML file, writing the defaults out on first run
    pub fn load(config_file: &str) -> Result<Self> {
        if std::path::Path::new(config_file).exists() {
            let contents = std::fs::read_to_string(config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(config_file, contents)?;
            Ok(default_config)
        }
    }
}

impl CoordinatorConfig {
    /// Resolve the identifier this host reports in heartbeats
    pub fn resolved_host_id(&self) -> String {
        self.host_id
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string())
    }
}
