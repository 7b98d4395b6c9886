//! Server configuration.
//!
//! The daemon's TOML file holds the engine configuration under `[engine]`
//! next to daemon-only settings: memory mode, the stats report interval and
//! the synthetic workload.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use tandem_common::config::EngineConfig;

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Run without a data directory.
    #[serde(default)]
    pub memory_mode: bool,

    /// Seconds between stats reports; 0 disables them.
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Synthetic workload.
    #[serde(default)]
    pub workload: WorkloadConfig,
}

/// Settings of the synthetic mixed workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Start the workload with the daemon.
    pub enabled: bool,
    /// Table the workload writes; created when missing.
    pub table: String,
    /// Writer tasks.
    pub writers: usize,
    /// Reader tasks.
    pub readers: usize,
    /// Row ids are drawn from `1..=key_space`.
    pub key_space: u64,
    /// Percentage of writes that are deletes.
    pub delete_percent: u8,
    /// Pause between operations of one task, in milliseconds.
    pub pause_ms: u64,
    /// Staleness readers accept for aggregates, in sequence numbers.
    pub max_lag: u64,
    /// Seed for the per-task random generators.
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            table: "workload".to_string(),
            writers: 4,
            readers: 2,
            key_space: 10_000,
            delete_percent: 5,
            pause_ms: 1,
            max_lag: 10_000,
            seed: 42,
        }
    }
}

fn default_report_interval() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            memory_mode: false,
            report_interval_secs: default_report_interval(),
            engine: EngineConfig::default(),
            workload: WorkloadConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Creates a default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Converts configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Returns the engine configuration the daemon opens.
    ///
    /// Memory mode drops the data directory.
    #[must_use]
    pub fn effective_engine(&self) -> EngineConfig {
        let mut engine = self.engine.clone();
        if self.memory_mode {
            engine.data_dir = None;
        }
        engine
    }

    /// Checks the whole configuration.
    pub fn validate(&self) -> Result<()> {
        self.effective_engine()
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid engine configuration: {e}"))?;
        let workload = &self.workload;
        if workload.enabled {
            anyhow::ensure!(workload.key_space > 0, "workload.key_space must be positive");
            anyhow::ensure!(workload.delete_percent <= 100, "workload.delete_percent must be at most 100");
            anyhow::ensure!(!workload.table.is_empty(), "workload.table must not be empty");
        }
        Ok(())
    }

    /// Creates a builder for configuration.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }
}

/// Builder for server configuration.
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data directory.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.engine.data_dir = Some(dir.into());
        self
    }

    /// Enables memory mode.
    #[must_use]
    pub fn memory_mode(mut self, enabled: bool) -> Self {
        self.config.memory_mode = enabled;
        self
    }

    /// Sets the report interval.
    #[must_use]
    pub fn report_interval_secs(mut self, secs: u64) -> Self {
        self.config.report_interval_secs = secs;
        self
    }

    /// Enables the synthetic workload.
    #[must_use]
    pub fn workload(mut self, enabled: bool) -> Self {
        self.config.workload.enabled = enabled;
        self
    }

    /// Replaces the engine configuration.
    #[must_use]
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.config.engine = engine;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(!config.memory_mode);
        assert_eq!(config.report_interval_secs, 10);
        assert!(!config.workload.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_mode_drops_data_dir() {
        let config = ServerConfig::builder()
            .data_dir("/var/lib/tandem")
            .memory_mode(true)
            .build();
        assert!(config.effective_engine().data_dir.is_none());
        let config = ServerConfig::builder().data_dir("/var/lib/tandem").build();
        assert_eq!(
            config.effective_engine().data_dir,
            Some(PathBuf::from("/var/lib/tandem"))
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            report_interval_secs = 3

            [engine.sync]
            batch_max_rows = 128

            [workload]
            enabled = true
            writers = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.report_interval_secs, 3);
        assert_eq!(config.engine.sync.batch_max_rows, 128);
        assert!(config.workload.enabled);
        assert_eq!(config.workload.writers, 1);
        assert_eq!(config.workload.readers, WorkloadConfig::default().readers);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tandemd.toml");
        let config = ServerConfig::builder()
            .report_interval_secs(0)
            .workload(true)
            .build();
        config.save(&path).unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.report_interval_secs, 0);
        assert_eq!(loaded.workload, config.workload);
    }

    #[test]
    fn test_invalid_workload_is_rejected() {
        let mut config = ServerConfig::builder().workload(true).build();
        config.workload.key_space = 0;
        assert!(config.validate().is_err());
    }
}
