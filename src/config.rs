use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding durable document snapshots
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Replica garbage-collection mode
    #[serde(default = "default_gc")]
    pub gc: bool,

    /// Seconds between periodic persistence sweeps
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,

    /// Seconds between per-connection liveness probes
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Document name used when the upgrade request carries none
    #[serde(default = "default_doc_name")]
    pub default_doc: String,

    /// Whether to mirror the primary text field to a sibling .txt file
    #[serde(default = "default_text_mirror")]
    pub text_mirror: bool,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            gc: default_gc(),
            persist_interval_secs: default_persist_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            default_doc: default_doc_name(),
            text_mirror: default_text_mirror(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1234
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_gc() -> bool {
    true
}

fn default_persist_interval_secs() -> u64 {
    30
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_doc_name() -> String {
    "default".to_string()
}

fn default_text_mirror() -> bool {
    true
}
