//! Durable change log storage.
//!
//! Owns the segment files of one log directory. Recovery verifies every
//! frame, requires the recovered sequence numbers to be contiguous and
//! truncates a damaged tail of the newest segment. Damage anywhere else is
//! reported as corruption.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use tandem_common::config::{ChangeLogConfig, LogSyncMode};
use tandem_common::types::SeqNo;
use tandem_common::{TandemError, TandemResult};

use crate::entry::ChangeEntry;
use crate::frame::frame_len;
use crate::segment::{list_segments, scan_segment, ActiveSegment, SEGMENT_HEADER_SIZE};

/// A segment that no longer receives appends.
#[derive(Debug, Clone)]
struct SealedSegment {
    path: PathBuf,
    first_seq: SeqNo,
    last_seq: SeqNo,
}

/// Segment-file backed storage for change entries.
pub struct DurableLog {
    dir: PathBuf,
    segment_size: usize,
    sync_mode: LogSyncMode,
    active: Option<ActiveSegment>,
    sealed: Vec<SealedSegment>,
}

impl DurableLog {
    /// Opens (or creates) the log in `dir` and returns the recovered entries.
    pub fn open(dir: &Path, config: &ChangeLogConfig) -> TandemResult<(Self, Vec<ChangeEntry>)> {
        std::fs::create_dir_all(dir)?;
        let segments = list_segments(dir)?;
        let count = segments.len();

        let mut recovered: Vec<ChangeEntry> = Vec::new();
        let mut sealed = Vec::new();
        let mut active = None;

        for (index, (named_seq, path)) in segments.into_iter().enumerate() {
            let scan = scan_segment(&path)?;
            if scan.first_seq != named_seq {
                return Err(TandemError::corruption(format!(
                    "segment {} declares first sequence {}",
                    path.display(),
                    scan.first_seq
                )));
            }

            let mut expected = recovered.last().map_or(scan.first_seq, |e| e.seq.next());
            if expected != scan.first_seq {
                return Err(TandemError::corruption(format!(
                    "segment {} starts at {}, expected {}",
                    path.display(),
                    scan.first_seq,
                    expected
                )));
            }
            for entry in &scan.entries {
                if entry.seq != expected {
                    return Err(TandemError::corruption(format!(
                        "segment {} holds sequence {} where {} was expected",
                        path.display(),
                        entry.seq,
                        expected
                    )));
                }
                expected = expected.next();
            }

            let is_last = index + 1 == count;
            if let Some(damage) = &scan.damage {
                if !is_last {
                    return Err(TandemError::corruption(format!(
                        "segment {}: {}",
                        path.display(),
                        damage
                    )));
                }
                warn!(path = %path.display(), damage = %damage, "Recovered change log with damaged tail");
            }

            debug!(
                path = %path.display(),
                entries = scan.entries.len(),
                "Scanned change log segment"
            );

            if is_last {
                active = Some(ActiveSegment::reopen(path, &scan)?);
            } else {
                let last_seq = scan
                    .entries
                    .last()
                    .map_or(scan.first_seq.prev(), |e| e.seq);
                sealed.push(SealedSegment {
                    path,
                    first_seq: scan.first_seq,
                    last_seq,
                });
            }
            recovered.extend(scan.entries);
        }

        if !recovered.is_empty() {
            info!(
                dir = %dir.display(),
                entries = recovered.len(),
                first = %recovered[0].seq,
                last = %recovered[recovered.len() - 1].seq,
                "Recovered change log"
            );
        }

        Ok((
            Self {
                dir: dir.to_path_buf(),
                segment_size: config.segment_size,
                sync_mode: config.sync_mode,
                active,
                sealed,
            },
            recovered,
        ))
    }

    /// Appends an entry, rotating to a new segment when the active one is full.
    ///
    /// The entry is on disk (and synced under `EveryWrite`) when this returns.
    pub fn append(&mut self, entry: &ChangeEntry) -> TandemResult<()> {
        let needed = frame_len(entry) as u64;
        let rotate = match &self.active {
            None => true,
            Some(segment) => {
                !segment.is_empty() && segment.size() + needed > self.segment_size as u64
            }
        };
        if rotate {
            self.rotate(entry.seq)?;
        }
        let segment = self
            .active
            .as_mut()
            .ok_or_else(|| TandemError::internal("no active change log segment"))?;
        segment.append(entry)?;
        if self.sync_mode == LogSyncMode::EveryWrite {
            segment.sync()?;
        }
        Ok(())
    }

    fn rotate(&mut self, first_seq: SeqNo) -> TandemResult<()> {
        if let Some(previous) = self.active.take() {
            previous.sync()?;
            self.sealed.push(SealedSegment {
                path: previous.path().to_path_buf(),
                first_seq: previous.first_seq(),
                last_seq: previous.last_seq(),
            });
        }
        let segment = ActiveSegment::create(&self.dir, first_seq)?;
        debug!(path = %segment.path().display(), "Opened change log segment");
        self.active = Some(segment);
        Ok(())
    }

    /// Returns the first sequence number of the active segment, if any.
    ///
    /// Names the next sequence number when recovery found no entries.
    #[must_use]
    pub fn next_seq_hint(&self) -> Option<SeqNo> {
        self.active.as_ref().map(ActiveSegment::first_seq)
    }

    /// Deletes sealed segments whose entries are all at or below `seq`.
    ///
    /// Returns the number of deleted segments. The active segment is kept.
    pub fn purge_through(&mut self, seq: SeqNo) -> TandemResult<usize> {
        let mut purged = 0;
        while let Some(oldest) = self.sealed.first() {
            if oldest.last_seq > seq {
                break;
            }
            std::fs::remove_file(&oldest.path)?;
            info!(
                path = %oldest.path.display(),
                first = %oldest.first_seq,
                last = %oldest.last_seq,
                "Purged change log segment"
            );
            self.sealed.remove(0);
            purged += 1;
        }
        Ok(purged)
    }

    /// Flushes the active segment.
    pub fn sync(&self) -> TandemResult<()> {
        match &self.active {
            Some(segment) => segment.sync(),
            None => Ok(()),
        }
    }

    /// Returns the number of segment files.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.sealed.len() + usize::from(self.active.is_some())
    }

    /// Returns the total size of all segment files in bytes.
    #[must_use]
    pub fn disk_usage(&self) -> u64 {
        let sealed: u64 = self
            .sealed
            .iter()
            .filter_map(|s| std::fs::metadata(&s.path).ok())
            .map(|m| m.len())
            .sum();
        sealed
            + self
                .active
                .as_ref()
                .map_or(0, |a| a.size().max(SEGMENT_HEADER_SIZE as u64))
    }

    /// Returns the log directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ChangeDraft;
    use std::fs::OpenOptions;
    use tandem_common::constants::MIN_LOG_SEGMENT_SIZE;
    use tandem_common::types::{RowId, TableId, Timestamp, TxnId, Value};

    fn entry(seq: u64, payload: usize) -> ChangeEntry {
        ChangeDraft::upsert(
            TableId::new(1),
            RowId::new(seq),
            TxnId::new(1),
            None,
            vec![Value::text("x".repeat(payload))],
        )
        .into_entry(SeqNo::new(seq), Timestamp::from_micros(seq))
    }

    fn small_segments() -> ChangeLogConfig {
        ChangeLogConfig::default()
            .with_segment_size(MIN_LOG_SEGMENT_SIZE)
            .with_sync_mode(LogSyncMode::Never)
    }

    #[test]
    fn test_recover_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut log, recovered) = DurableLog::open(dir.path(), &small_segments()).unwrap();
            assert!(recovered.is_empty());
            for seq in 1..=10 {
                log.append(&entry(seq, 16)).unwrap();
            }
        }
        let (log, recovered) = DurableLog::open(dir.path(), &small_segments()).unwrap();
        assert_eq!(recovered.len(), 10);
        assert_eq!(recovered[9].seq, SeqNo::new(10));
        assert_eq!(log.segment_count(), 1);
    }

    #[test]
    fn test_rotation_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let (mut log, _) = DurableLog::open(dir.path(), &small_segments()).unwrap();
        // ~8 KB entries rotate every handful of appends.
        for seq in 1..=40 {
            log.append(&entry(seq, 8 * 1024)).unwrap();
        }
        let segments = log.segment_count();
        assert!(segments > 3);

        let purged = log.purge_through(SeqNo::new(20)).unwrap();
        assert!(purged >= 1);
        assert_eq!(log.segment_count(), segments - purged);

        let (_, recovered) = DurableLog::open(dir.path(), &small_segments()).unwrap();
        assert!(recovered[0].seq <= SeqNo::new(21));
        assert_eq!(recovered.last().unwrap().seq, SeqNo::new(40));
    }

    #[test]
    fn test_torn_tail_truncated() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut log, _) = DurableLog::open(dir.path(), &small_segments()).unwrap();
            for seq in 1..=3 {
                log.append(&entry(seq, 16)).unwrap();
            }
        }
        let (_, path) = list_segments(dir.path()).unwrap().pop().unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();
        drop(file);

        let (mut log, recovered) = DurableLog::open(dir.path(), &small_segments()).unwrap();
        assert_eq!(recovered.len(), 2);
        log.append(&entry(3, 16)).unwrap();
        drop(log);

        let (_, recovered) = DurableLog::open(dir.path(), &small_segments()).unwrap();
        assert_eq!(recovered.len(), 3);
    }

    #[test]
    fn test_damage_in_sealed_segment_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut log, _) = DurableLog::open(dir.path(), &small_segments()).unwrap();
            for seq in 1..=40 {
                log.append(&entry(seq, 8 * 1024)).unwrap();
            }
        }
        let (_, first) = list_segments(dir.path()).unwrap().remove(0);
        let len = std::fs::metadata(&first).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&first)
            .unwrap()
            .set_len(len - 1)
            .unwrap();

        let err = DurableLog::open(dir.path(), &small_segments()).err().unwrap();
        assert_eq!(err.code(), tandem_common::ErrorCode::Corruption);
    }
}
