//! pvbridge configuration types and loading

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::adapter::AdapterConfig;
use crate::coordinator::CoordinatorConfig;

/// Main pvbridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator queue sizing
    pub coordinator: CoordinatorConfig,

    /// Adapter tuning
    pub adapter: AdapterConfig,

    /// Shutdown behavior
    pub shutdown: ShutdownConfig,
}

/// Shutdown behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long components get to exit cooperatively before being aborted
    #[serde(rename = "grace-period-secs")]
    pub grace_period_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_period_secs: 5 }
    }
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.inbound_capacity == 0 {
            return Err(eyre!("coordinator.inbound-capacity must be at least 1"));
        }
        if self.coordinator.outbound_capacity == 0 {
            return Err(eyre!("coordinator.outbound-capacity must be at least 1"));
        }
        if self.adapter.flush_interval_ms == 0 {
            return Err(eyre!("adapter.flush-interval-ms must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .pvbridge.yml
        let local_config = PathBuf::from(".pvbridge.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/pvbridge/pvbridge.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("pvbridge").join("pvbridge.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.coordinator.inbound_capacity, 64);
        assert_eq!(config.shutdown.grace_period_secs, 5);
    }

    #[test]
    fn test_load_from_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "coordinator:\n  inbound-capacity: 8\nshutdown:\n  grace-period-secs: 1\n"
        )
        .unwrap();

        let path = file.path().to_path_buf();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.coordinator.inbound_capacity, 8);
        assert_eq!(config.coordinator.outbound_capacity, 16);
        assert_eq!(config.shutdown.grace_period_secs, 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = Config::default();
        config.coordinator.inbound_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_config_errors() {
        let path = PathBuf::from("/nonexistent/pvbridge.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
