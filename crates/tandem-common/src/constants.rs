//! System-wide constants for TandemDB.
//!
//! Defaults used by the configuration structures and the on-disk formats.

// =============================================================================
// Row Store Constants
// =============================================================================

/// Number of record slots in a row page.
pub const DEFAULT_ROWS_PER_PAGE: usize = 256;

/// Default bound on how long a writer waits for a row latch (milliseconds).
pub const DEFAULT_LATCH_TIMEOUT_MS: u64 = 1_000;

/// Committed versions retained per row for point-in-time reads.
pub const DEFAULT_MAX_VERSIONS_PER_ROW: usize = 8;

/// Number of independent latch table shards.
///
/// Each shard has its own mutex and condition variable, so writers on rows
/// hashing to different shards never contend on the latch bookkeeping.
pub const LATCH_SHARDS: usize = 64;

// =============================================================================
// Change Log Constants
// =============================================================================

/// Default change log segment size (64 MB).
pub const DEFAULT_LOG_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

/// Minimum change log segment size (64 KB).
pub const MIN_LOG_SEGMENT_SIZE: usize = 64 * 1024;

/// Maximum size of one encoded change entry (4 MB).
pub const MAX_CHANGE_ENTRY_SIZE: usize = 4 * 1024 * 1024;

/// Size of the frame header preceding each durable change entry.
///
/// Layout: seq (8) + payload length (4) + crc32 (4).
pub const LOG_FRAME_HEADER_SIZE: usize = 16;

/// Magic number at the start of every change log segment file ("TNDM").
pub const LOG_SEGMENT_MAGIC: u32 = 0x544E_444D;

/// Change log on-disk format version.
pub const LOG_FORMAT_VERSION: u32 = 1;

/// Default interval (milliseconds) between row snapshots that allow segment purging.
pub const DEFAULT_CHECKPOINT_INTERVAL_MS: u64 = 30_000;

// =============================================================================
// Synchronizer Constants
// =============================================================================

/// Default number of change entries that seal a batch.
pub const DEFAULT_BATCH_MAX_ROWS: usize = 4_096;

/// Default age (milliseconds) after which an open batch is sealed.
pub const DEFAULT_BATCH_MAX_AGE_MS: u64 = 200;

/// Default number of entries pulled from the change log per synchronizer pass.
pub const DEFAULT_SYNC_READ_BATCH: usize = 8_192;

/// Default consecutive encode/publish failures before raising the lag alarm.
pub const DEFAULT_SYNC_RETRY_BUDGET: u32 = 5;

// =============================================================================
// Columnar Store Constants
// =============================================================================

/// Name of the pseudo column exposing the row key to columnar scans.
pub const ROW_ID_COLUMN: &str = "_row_id";

/// Name of the pseudo column exposing the commit sequence number.
pub const SEQ_COLUMN: &str = "_seq";

/// Distinct-value ratio at or below which a column is dictionary encoded.
pub const DICTIONARY_MAX_DISTINCT_RATIO: f64 = 0.5;

/// Average run length at or above which a column is run-length encoded.
pub const RLE_MIN_AVERAGE_RUN: f64 = 4.0;

/// Chunk groups holding fewer live rows than this are compaction candidates.
pub const COMPACTION_SMALL_GROUP_ROWS: usize = 1_024;

/// Deleted-row ratio above which a chunk group is a compaction candidate.
pub const COMPACTION_DELETED_RATIO: f64 = 0.5;

/// Relative accuracy of the percentile sketch buckets (1%).
pub const SKETCH_RELATIVE_ACCURACY: f64 = 0.01;

// =============================================================================
// Governor and Router Constants
// =============================================================================

/// Default total parallelism shared by both workload classes.
pub const DEFAULT_MAX_PARALLELISM: usize = 16;

/// Default share of parallelism reserved for analytical work.
pub const DEFAULT_ANALYTICAL_SHARE: f64 = 0.25;

/// Default admission wait bound (milliseconds).
pub const DEFAULT_ADMISSION_TIMEOUT_MS: u64 = 5_000;

/// Default maximum number of requests queued per workload class.
pub const DEFAULT_MAX_QUEUED: usize = 1_024;

/// Default longest single cooperative yield of an analytical scan (milliseconds).
pub const DEFAULT_MAX_YIELD_MS: u64 = 50;

/// Default key count at or below which a key lookup is served by the row store.
pub const DEFAULT_POINT_LOOKUP_MAX_ROWS: usize = 64;
