//! Engine configuration structures.
//!
//! Every section deserializes with defaults, so a TOML file only needs the
//! keys it overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{TandemError, TandemResult};

/// Main engine configuration.
///
/// # Example
///
/// ```rust
/// use tandem_common::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert!(config.data_dir.is_none());
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory of the durable change log. `None` keeps the log in memory.
    pub data_dir: Option<PathBuf>,

    /// Row store configuration.
    pub row_store: RowStoreConfig,

    /// Change log configuration.
    pub change_log: ChangeLogConfig,

    /// Synchronizer configuration.
    pub sync: SyncConfig,

    /// Columnar store configuration.
    pub column_store: ColumnStoreConfig,

    /// Resource governor configuration.
    pub governor: GovernorConfig,

    /// Query router configuration.
    pub router: RouterConfig,
}

impl EngineConfig {
    /// Creates an in-memory configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Creates a configuration with a durable change log in `data_dir`.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Default::default()
        }
    }

    /// Creates a configuration tuned for tests: small batches, short waits.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            data_dir: None,
            row_store: RowStoreConfig {
                latch_timeout_ms: 200,
                ..Default::default()
            },
            change_log: ChangeLogConfig {
                sync_mode: LogSyncMode::Never,
                ..Default::default()
            },
            sync: SyncConfig {
                batch_max_rows: 64,
                batch_max_age_ms: 0,
                poll_interval_ms: 5,
                ..Default::default()
            },
            column_store: ColumnStoreConfig::default(),
            governor: GovernorConfig {
                max_parallelism: 4,
                admission_timeout_ms: 1_000,
                max_yield_ms: 5,
                ..Default::default()
            },
            router: RouterConfig::default(),
        }
    }

    /// Loads a configuration from a TOML file.
    pub fn from_file(path: &Path) -> TandemResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml(content: &str) -> TandemResult<Self> {
        toml::from_str(content).map_err(|e| TandemError::config(e.to_string()))
    }

    /// Serializes the configuration to TOML.
    pub fn to_toml(&self) -> TandemResult<String> {
        toml::to_string_pretty(self).map_err(|e| TandemError::config(e.to_string()))
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.row_store.rows_per_page == 0 {
            return Err("row_store.rows_per_page must be positive".to_string());
        }
        if self.row_store.max_versions_per_row == 0 {
            return Err("row_store.max_versions_per_row must be at least 1".to_string());
        }
        if self.change_log.segment_size < MIN_LOG_SEGMENT_SIZE {
            return Err(format!(
                "change_log.segment_size must be at least {} bytes",
                MIN_LOG_SEGMENT_SIZE
            ));
        }
        if self.change_log.initial_seq == 0 {
            return Err("change_log.initial_seq must be at least 1".to_string());
        }
        if self.sync.batch_max_rows == 0 || self.sync.read_batch == 0 {
            return Err("sync.batch_max_rows and sync.read_batch must be positive".to_string());
        }
        if self.sync.retry_budget == 0 {
            return Err("sync.retry_budget must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.column_store.dictionary_max_distinct_ratio) {
            return Err("column_store.dictionary_max_distinct_ratio must be in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.column_store.compaction_deleted_ratio) {
            return Err("column_store.compaction_deleted_ratio must be in [0, 1]".to_string());
        }
        if self.governor.max_parallelism < 2 {
            return Err("governor.max_parallelism must be at least 2".to_string());
        }
        if !(self.governor.analytical_share > 0.0 && self.governor.analytical_share < 1.0) {
            return Err("governor.analytical_share must be in (0, 1)".to_string());
        }
        if self.router.point_lookup_max_rows == 0 {
            return Err("router.point_lookup_max_rows must be positive".to_string());
        }
        Ok(())
    }
}

/// Row store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RowStoreConfig {
    /// Record slots per row page.
    /// Default: 256
    pub rows_per_page: usize,

    /// Maximum wait for a row latch in milliseconds.
    /// Default: 1000
    pub latch_timeout_ms: u64,

    /// Committed versions kept per row for point-in-time reads.
    /// Default: 8
    pub max_versions_per_row: usize,
}

impl Default for RowStoreConfig {
    fn default() -> Self {
        Self {
            rows_per_page: DEFAULT_ROWS_PER_PAGE,
            latch_timeout_ms: DEFAULT_LATCH_TIMEOUT_MS,
            max_versions_per_row: DEFAULT_MAX_VERSIONS_PER_ROW,
        }
    }
}

impl RowStoreConfig {
    /// Returns the latch timeout.
    #[must_use]
    pub fn latch_timeout(&self) -> Duration {
        Duration::from_millis(self.latch_timeout_ms)
    }

    /// Sets the latch timeout.
    #[must_use]
    pub fn with_latch_timeout(mut self, timeout: Duration) -> Self {
        self.latch_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the version retention bound.
    #[must_use]
    pub fn with_max_versions(mut self, versions: usize) -> Self {
        self.max_versions_per_row = versions;
        self
    }
}

/// When durable appends are flushed to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSyncMode {
    /// fsync after every append.
    EveryWrite,
    /// Leave flushing to the operating system.
    Never,
}

/// Change log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeLogConfig {
    /// Segment file size before rotation.
    /// Default: 64 MB
    pub segment_size: usize,

    /// Flush policy for durable appends.
    /// Default: every_write
    pub sync_mode: LogSyncMode,

    /// First sequence number assigned by a fresh log.
    /// Default: 1
    pub initial_seq: u64,

    /// Entries older than this many sequence numbers behind the newest entry
    /// may be discarded even if a cursor has not acknowledged them.
    /// Default: none (only cursor acknowledgements release entries)
    pub retention_horizon: Option<u64>,

    /// Delete segment files whose entries retention has released. A segment
    /// is only deleted once a row snapshot in the data directory covers it;
    /// superseded row versions in purged segments are gone for `get_as_of`.
    /// Default: false
    pub purge_segments: bool,

    /// Interval between row snapshots taken by the background checkpointer
    /// when `purge_segments` is set. Zero disables periodic snapshots.
    /// Default: 30000
    pub checkpoint_interval_ms: u64,
}

impl Default for ChangeLogConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_LOG_SEGMENT_SIZE,
            sync_mode: LogSyncMode::EveryWrite,
            initial_seq: 1,
            retention_horizon: None,
            purge_segments: false,
            checkpoint_interval_ms: DEFAULT_CHECKPOINT_INTERVAL_MS,
        }
    }
}

impl ChangeLogConfig {
    /// Sets the first sequence number of a fresh log.
    #[must_use]
    pub fn with_initial_seq(mut self, seq: u64) -> Self {
        self.initial_seq = seq;
        self
    }

    /// Sets the segment size.
    #[must_use]
    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the sync mode.
    #[must_use]
    pub fn with_sync_mode(mut self, mode: LogSyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Sets the retention horizon.
    #[must_use]
    pub fn with_retention_horizon(mut self, horizon: u64) -> Self {
        self.retention_horizon = Some(horizon);
        self
    }

    /// Enables deletion of released segment files.
    #[must_use]
    pub fn with_purge_segments(mut self, purge: bool) -> Self {
        self.purge_segments = purge;
        self
    }

    /// Sets the interval between background row snapshots.
    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Returns the interval between background row snapshots.
    #[must_use]
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }
}

/// Synchronizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Entries that seal an open batch.
    /// Default: 4096
    pub batch_max_rows: usize,

    /// Age in milliseconds after which an open batch is sealed.
    /// Default: 200
    pub batch_max_age_ms: u64,

    /// Entries read from the change log per pass.
    /// Default: 8192
    pub read_batch: usize,

    /// Consecutive failures before the lag alarm is raised.
    /// Default: 5
    pub retry_budget: u32,

    /// Background worker poll interval in milliseconds.
    /// Default: 10
    pub poll_interval_ms: u64,

    /// Merge small or mostly-deleted chunk groups after publishing.
    /// Default: true
    pub compaction: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_max_rows: DEFAULT_BATCH_MAX_ROWS,
            batch_max_age_ms: DEFAULT_BATCH_MAX_AGE_MS,
            read_batch: DEFAULT_SYNC_READ_BATCH,
            retry_budget: DEFAULT_SYNC_RETRY_BUDGET,
            poll_interval_ms: 10,
            compaction: true,
        }
    }
}

impl SyncConfig {
    /// Returns the batch age bound.
    #[must_use]
    pub fn batch_max_age(&self) -> Duration {
        Duration::from_millis(self.batch_max_age_ms)
    }

    /// Returns the worker poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Sets the batch row bound.
    #[must_use]
    pub fn with_batch_max_rows(mut self, rows: usize) -> Self {
        self.batch_max_rows = rows;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }
}

/// Columnar store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnStoreConfig {
    /// Distinct/rows ratio at or below which a column is dictionary encoded.
    /// Default: 0.5
    pub dictionary_max_distinct_ratio: f64,

    /// Average run length at or above which a column is run-length encoded.
    /// Default: 4.0
    pub rle_min_average_run: f64,

    /// Live rows below which a chunk group is a compaction candidate.
    /// Default: 1024
    pub compaction_small_group_rows: usize,

    /// Deleted ratio above which a chunk group is a compaction candidate.
    /// Default: 0.5
    pub compaction_deleted_ratio: f64,
}

impl Default for ColumnStoreConfig {
    fn default() -> Self {
        Self {
            dictionary_max_distinct_ratio: DICTIONARY_MAX_DISTINCT_RATIO,
            rle_min_average_run: RLE_MIN_AVERAGE_RUN,
            compaction_small_group_rows: COMPACTION_SMALL_GROUP_ROWS,
            compaction_deleted_ratio: COMPACTION_DELETED_RATIO,
        }
    }
}

/// Resource governor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Total slots shared by both workload classes.
    /// Default: 16
    pub max_parallelism: usize,

    /// Fraction of slots reserved for analytical work.
    /// Default: 0.25
    pub analytical_share: f64,

    /// Longest admission wait in milliseconds.
    /// Default: 5000
    pub admission_timeout_ms: u64,

    /// Waiting requests allowed per class before new ones are rejected.
    /// Default: 1024
    pub max_queued: usize,

    /// Longest single cooperative yield of an analytical scan in milliseconds.
    /// Default: 50
    pub max_yield_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            analytical_share: DEFAULT_ANALYTICAL_SHARE,
            admission_timeout_ms: DEFAULT_ADMISSION_TIMEOUT_MS,
            max_queued: DEFAULT_MAX_QUEUED,
            max_yield_ms: DEFAULT_MAX_YIELD_MS,
        }
    }
}

impl GovernorConfig {
    /// Returns `(transactional_slots, analytical_slots)`.
    ///
    /// Each pool gets at least one slot.
    #[must_use]
    pub fn slots(&self) -> (usize, usize) {
        let total = self.max_parallelism.max(2);
        let analytical = ((total as f64 * self.analytical_share).round() as usize).clamp(1, total - 1);
        (total - analytical, analytical)
    }

    /// Returns the admission timeout.
    #[must_use]
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    /// Returns the yield bound.
    #[must_use]
    pub fn max_yield(&self) -> Duration {
        Duration::from_millis(self.max_yield_ms)
    }

    /// Sets the total parallelism.
    #[must_use]
    pub fn with_max_parallelism(mut self, slots: usize) -> Self {
        self.max_parallelism = slots;
        self
    }

    /// Sets the analytical share.
    #[must_use]
    pub fn with_analytical_share(mut self, share: f64) -> Self {
        self.analytical_share = share;
        self
    }

    /// Sets the admission timeout.
    #[must_use]
    pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the queue bound.
    #[must_use]
    pub fn with_max_queued(mut self, max: usize) -> Self {
        self.max_queued = max;
        self
    }

    /// Sets the yield bound.
    #[must_use]
    pub fn with_max_yield(mut self, bound: Duration) -> Self {
        self.max_yield_ms = bound.as_millis() as u64;
        self
    }
}

/// Query router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Key count at or below which a key query is served by the row store.
    /// Default: 64
    pub point_lookup_max_rows: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            point_lookup_max_rows: DEFAULT_POINT_LOOKUP_MAX_ROWS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.governor.analytical_share = 1.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.change_log.initial_seq = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.change_log.segment_size = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_governor_slots() {
        let config = GovernorConfig::default();
        assert_eq!(config.slots(), (12, 4));

        let tiny = GovernorConfig::default()
            .with_max_parallelism(2)
            .with_analytical_share(0.9);
        assert_eq!(tiny.slots(), (1, 1));
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml(
            r#"
            data_dir = "/var/lib/tandem"

            [change_log]
            initial_seq = 501001
            sync_mode = "never"

            [governor]
            analytical_share = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/tandem")));
        assert_eq!(config.change_log.initial_seq, 501_001);
        assert_eq!(config.change_log.sync_mode, LogSyncMode::Never);
        assert_eq!(config.governor.max_parallelism, DEFAULT_MAX_PARALLELISM);
        assert_eq!(config.row_store.rows_per_page, DEFAULT_ROWS_PER_PAGE);
    }

    #[test]
    fn test_toml_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tandem.toml");
        let config = EngineConfig::with_data_dir(dir.path());
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.data_dir, config.data_dir);
        assert_eq!(loaded.sync.batch_max_rows, config.sync.batch_max_rows);
    }
}
