//! # Configuration Module
//!
//! Loads cluster settings from environment variables (and a `.env` file when
//! present) and turns them into the library's `PregelConfig` and
//! `StorageConfig`.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use pregel_core::{PregelConfig, StorageConfig};

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
/// Process-level configuration shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the server accepts clients on
    pub client_addr: String,

    /// Address the server accepts workers on
    pub worker_addr: String,

    /// Worker address a worker connects to
    pub server_addr: String,

    /// Root directory of the shared file store
    ///
    /// Every process of a networked cluster must see the same directory.
    pub store_dir: PathBuf,

    /// Compress vertex files with zstd
    pub store_compression: bool,

    pub max_supersteps: u64,

    /// Supersteps between checkpoints, 0 disables periodic checkpoints
    pub checkpoint_rate: u64,

    /// Seconds to wait for each worker reply
    pub ack_timeout_secs: u64,

    /// Runs of one request before it is reported as failed
    pub max_attempts: usize,

    /// Log level for the application
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = PregelConfig::default();
        Self {
            client_addr: "127.0.0.1:7070".to_string(),
            worker_addr: "127.0.0.1:7071".to_string(),
            server_addr: "127.0.0.1:7071".to_string(),
            store_dir: PathBuf::from("pregel-data"),
            store_compression: false,
            max_supersteps: defaults.max_supersteps,
            checkpoint_rate: defaults.checkpoint_rate,
            ack_timeout_secs: defaults.ack_timeout.as_secs(),
            max_attempts: defaults.max_attempts,
            log_level: "info".to_string(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; malformed numbers are errors.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Ok(val) = env::var("PREGEL_CLIENT_ADDR") {
            config.client_addr = val;
        }

        if let Ok(val) = env::var("PREGEL_WORKER_ADDR") {
            config.worker_addr = val;
        }

        if let Ok(val) = env::var("PREGEL_SERVER_ADDR") {
            config.server_addr = val;
        }

        if let Ok(val) = env::var("PREGEL_STORE_DIR") {
            config.store_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("PREGEL_STORE_COMPRESSION") {
            config.store_compression = val
                .parse()
                .context("PREGEL_STORE_COMPRESSION must be true or false")?;
        }

        if let Ok(val) = env::var("PREGEL_MAX_SUPERSTEPS") {
            config.max_supersteps = val
                .parse()
                .context("PREGEL_MAX_SUPERSTEPS must be a valid positive integer")?;
        }

        if let Ok(val) = env::var("PREGEL_CHECKPOINT_RATE") {
            config.checkpoint_rate = val
                .parse()
                .context("PREGEL_CHECKPOINT_RATE must be a valid non-negative integer")?;
        }

        if let Ok(val) = env::var("PREGEL_ACK_TIMEOUT_SECS") {
            config.ack_timeout_secs = val
                .parse()
                .context("PREGEL_ACK_TIMEOUT_SECS must be a valid positive integer")?;
        }

        if let Ok(val) = env::var("PREGEL_MAX_ATTEMPTS") {
            config.max_attempts = val
                .parse()
                .context("PREGEL_MAX_ATTEMPTS must be a valid positive integer")?;
        }

        if let Ok(val) = env::var("RUST_LOG") {
            config.log_level = val;
        }

        Ok(config)
    }

    /// Validate the configuration before anything binds or connects.
    pub fn validate(&self) -> Result<()> {
        if self.max_supersteps == 0 {
            anyhow::bail!("PREGEL_MAX_SUPERSTEPS must be at least 1");
        }

        if self.ack_timeout_secs == 0 {
            anyhow::bail!("PREGEL_ACK_TIMEOUT_SECS must be at least 1");
        }

        if self.max_attempts == 0 {
            anyhow::bail!("PREGEL_MAX_ATTEMPTS must be at least 1");
        }

        for (name, addr) in [
            ("PREGEL_CLIENT_ADDR", &self.client_addr),
            ("PREGEL_WORKER_ADDR", &self.worker_addr),
            ("PREGEL_SERVER_ADDR", &self.server_addr),
        ] {
            if addr.is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
        }

        if self.store_dir.as_os_str().is_empty() {
            anyhow::bail!("PREGEL_STORE_DIR cannot be empty");
        }

        Ok(())
    }

    /// Runtime settings for coordinators and workers
    pub fn pregel_config(&self) -> PregelConfig {
        PregelConfig::default()
            .with_max_supersteps(self.max_supersteps)
            .with_checkpoint_rate(self.checkpoint_rate)
            .with_ack_timeout(Duration::from_secs(self.ack_timeout_secs))
            .with_max_attempts(self.max_attempts)
    }

    /// The shared file store used by networked processes
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::File {
            path: self.store_dir.clone(),
            compression: self.store_compression,
        }
    }
}

// =============================================================================
// UNIT TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.client_addr, "127.0.0.1:7070");
        assert_eq!(config.worker_addr, config.server_addr);
        assert_eq!(config.max_supersteps, 20);
        assert_eq!(config.checkpoint_rate, 10);
        assert_eq!(config.ack_timeout_secs, 5);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_config_validation_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_supersteps() {
        let mut config = Config::default();
        config.max_supersteps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_attempts() {
        let mut config = Config::default();
        config.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_address() {
        let mut config = Config::default();
        config.server_addr.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pregel_config_mapping() {
        let mut config = Config::default();
        config.checkpoint_rate = 0;
        config.ack_timeout_secs = 9;
        config.max_attempts = 5;

        let pregel = config.pregel_config();
        assert!(!pregel.checkpointing_enabled());
        assert_eq!(pregel.ack_timeout, Duration::from_secs(9));
        assert_eq!(pregel.max_attempts, 5);
    }

    #[test]
    fn test_storage_config_is_file_store() {
        let config = Config::default();
        match config.storage_config() {
            StorageConfig::File { path, compression } => {
                assert_eq!(path, PathBuf::from("pregel-data"));
                assert!(!compression);
            }
            other => panic!("unexpected storage config: {:?}", other),
        }
    }
}
