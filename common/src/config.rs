// common/src/config.rs
use config::{Config as ConfigFile, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Central configuration for both services
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub worker_addr: String,
    pub relay_addr: String,

    /// Origins allowed to reach the worker through a relay. Entries ending
    /// in `*` match by prefix.
    pub allowed_origins: Vec<String>,

    /// Path of the worker's persistent key-value store file.
    pub storage_path: String,

    pub timing: TimingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Worker-link heartbeat period (seconds).
    pub heartbeat_interval_secs: u64,
    /// Critical-file sweep period (seconds).
    pub sweep_interval_secs: u64,
    /// Fixed sweep batch size, bounding message payload size.
    pub sweep_batch_size: usize,
    /// Deadline for any single cross-context call (seconds).
    pub request_timeout_secs: u64,
    /// Reconnection backoff cap (seconds).
    pub reconnect_max_backoff_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_addr: "127.0.0.1:8090".to_string(),
            relay_addr: "127.0.0.1:8091".to_string(),
            allowed_origins: vec![
                "http://localhost:*".to_string(),
                "https://mata.app".to_string(),
            ],
            storage_path: "./mata-worker-store.json".to_string(),
            timing: TimingConfig::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            sweep_interval_secs: 30,
            sweep_batch_size: 3,
            request_timeout_secs: 5,
            reconnect_max_backoff_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        // Get the run mode, defaulting to "development"
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        // Locate the config directory
        let config_dir = env::var("CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                // Check if we're in the project root or a subcrate
                let mut path = PathBuf::from("./config");
                if !path.exists() {
                    path = PathBuf::from("../config");
                }
                path
            });

        tracing::info!("Loading configuration from {}", config_dir.display());
        tracing::info!("Using run mode: {}", run_mode);

        let config = ConfigFile::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", run_mode))).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load from environment variables directly (backward compatibility)
    pub fn from_env() -> Self {
        match Self::load() {
            Ok(config) => {
                tracing::info!("Configuration loaded from files and environment");
                config
            }
            Err(e) => {
                tracing::warn!("Failed to load configuration from files: {}", e);
                tracing::info!("Falling back to environment variables only");

                let defaults = Config::default();

                let worker_addr = env::var("WORKER_ADDR").unwrap_or(defaults.worker_addr);
                let relay_addr = env::var("RELAY_ADDR").unwrap_or(defaults.relay_addr);

                let allowed_origins = env::var("ALLOWED_ORIGINS")
                    .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or(defaults.allowed_origins);

                let storage_path = env::var("STORAGE_PATH").unwrap_or(defaults.storage_path);

                let timing = TimingConfig {
                    heartbeat_interval_secs: env_u64(
                        "HEARTBEAT_INTERVAL_SECS",
                        defaults.timing.heartbeat_interval_secs,
                    ),
                    sweep_interval_secs: env_u64(
                        "SWEEP_INTERVAL_SECS",
                        defaults.timing.sweep_interval_secs,
                    ),
                    sweep_batch_size: env_u64(
                        "SWEEP_BATCH_SIZE",
                        defaults.timing.sweep_batch_size as u64,
                    ) as usize,
                    request_timeout_secs: env_u64(
                        "REQUEST_TIMEOUT_SECS",
                        defaults.timing.request_timeout_secs,
                    ),
                    reconnect_max_backoff_secs: env_u64(
                        "RECONNECT_MAX_BACKOFF_SECS",
                        defaults.timing.reconnect_max_backoff_secs,
                    ),
                };

                Self {
                    worker_addr,
                    relay_addr,
                    allowed_origins,
                    storage_path,
                    timing,
                }
            }
        }
    }

    /// Whether a page origin is on the allow-list. Entries ending in `*`
    /// match by prefix; everything else matches exactly.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => origin.starts_with(prefix),
                None => origin == pattern,
            }
        })
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_allow_list_supports_exact_and_prefix() {
        let config = Config {
            allowed_origins: vec![
                "https://mata.app".to_string(),
                "http://localhost:*".to_string(),
            ],
            ..Config::default()
        };
        assert!(config.origin_allowed("https://mata.app"));
        assert!(config.origin_allowed("http://localhost:5173"));
        assert!(!config.origin_allowed("https://mata.app.evil.example"));
        assert!(!config.origin_allowed("https://other.example"));
    }
}
