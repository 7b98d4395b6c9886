//! Change log segment files.
//!
//! A segment starts with a 16-byte header (magic, format version, first
//! sequence number) followed by frames. Segment files are named after the
//! first sequence number they hold, so lexical order is sequence order.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};
use tracing::warn;

use tandem_common::constants::{LOG_FORMAT_VERSION, LOG_SEGMENT_MAGIC};
use tandem_common::types::SeqNo;
use tandem_common::{TandemError, TandemResult};

use crate::entry::ChangeEntry;
use crate::frame::{decode_frame, encode_frame, FrameRead};

/// Size of the segment header.
pub const SEGMENT_HEADER_SIZE: usize = 16;

const FILE_PREFIX: &str = "changelog_";
const FILE_SUFFIX: &str = ".log";

/// Returns the file name of the segment starting at `first_seq`.
#[must_use]
pub fn segment_file_name(first_seq: SeqNo) -> String {
    format!("{}{:016x}{}", FILE_PREFIX, first_seq.as_u64(), FILE_SUFFIX)
}

/// Parses the first sequence number out of a segment file name.
#[must_use]
pub fn parse_segment_file_name(path: &Path) -> Option<SeqNo> {
    let name = path.file_name()?.to_str()?;
    let hex = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok().map(SeqNo::new)
}

/// Lists segment files in `dir`, ordered by first sequence number.
pub fn list_segments(dir: &Path) -> TandemResult<Vec<(SeqNo, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(first_seq) = parse_segment_file_name(&path) {
            segments.push((first_seq, path));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

fn encode_header(first_seq: SeqNo) -> [u8; SEGMENT_HEADER_SIZE] {
    let mut header = [0u8; SEGMENT_HEADER_SIZE];
    let mut buf = &mut header[..];
    buf.put_u32_le(LOG_SEGMENT_MAGIC);
    buf.put_u32_le(LOG_FORMAT_VERSION);
    buf.put_u64_le(first_seq.as_u64());
    header
}

fn decode_header(data: &[u8], path: &Path) -> TandemResult<SeqNo> {
    if data.len() < SEGMENT_HEADER_SIZE {
        return Err(TandemError::corruption(format!(
            "segment {} is shorter than its header",
            path.display()
        )));
    }
    let mut buf = &data[..SEGMENT_HEADER_SIZE];
    let magic = buf.get_u32_le();
    if magic != LOG_SEGMENT_MAGIC {
        return Err(TandemError::corruption(format!(
            "segment {} has magic {:#010x}, expected {:#010x}",
            path.display(),
            magic,
            LOG_SEGMENT_MAGIC
        )));
    }
    let version = buf.get_u32_le();
    if version != LOG_FORMAT_VERSION {
        return Err(TandemError::corruption(format!(
            "segment {} has format version {}, expected {}",
            path.display(),
            version,
            LOG_FORMAT_VERSION
        )));
    }
    Ok(SeqNo::new(buf.get_u64_le()))
}

/// Contents recovered from one segment file.
#[derive(Debug)]
pub struct SegmentScan {
    /// First sequence number declared by the header.
    pub first_seq: SeqNo,
    /// Verified entries in file order.
    pub entries: Vec<ChangeEntry>,
    /// Length of the verified prefix of the file.
    pub valid_len: u64,
    /// Why scanning stopped before the end of the file, if it did.
    pub damage: Option<String>,
}

/// Reads and verifies every frame of a segment.
///
/// Scanning stops at the first incomplete or corrupt frame; whether that is a
/// torn tail or real corruption is the caller's decision.
pub fn scan_segment(path: &Path) -> TandemResult<SegmentScan> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    let first_seq = decode_header(&data, path)?;

    let mut offset = SEGMENT_HEADER_SIZE;
    let mut entries = Vec::new();
    let mut damage = None;
    while offset < data.len() {
        match decode_frame(&data[offset..]) {
            FrameRead::Frame { seq, payload, len } => {
                let entry = ChangeEntry::decode_payload(seq, &mut payload.clone())?;
                entries.push(entry);
                offset += len;
            }
            FrameRead::Incomplete => {
                damage = Some(format!(
                    "incomplete frame at offset {} of {}",
                    offset,
                    data.len()
                ));
                break;
            }
            FrameRead::Corrupt(reason) => {
                damage = Some(format!("{} at offset {}", reason, offset));
                break;
            }
        }
    }

    Ok(SegmentScan {
        first_seq,
        entries,
        valid_len: offset as u64,
        damage,
    })
}

/// The segment currently receiving appends.
pub struct ActiveSegment {
    path: PathBuf,
    file: File,
    first_seq: SeqNo,
    last_seq: SeqNo,
    size: u64,
    scratch: Vec<u8>,
}

impl ActiveSegment {
    /// Creates a new, empty segment for entries starting at `first_seq`.
    pub fn create(dir: &Path, first_seq: SeqNo) -> TandemResult<Self> {
        let path = dir.join(segment_file_name(first_seq));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&encode_header(first_seq))?;
        file.sync_all()?;
        Ok(Self {
            path,
            file,
            first_seq,
            last_seq: first_seq.prev(),
            size: SEGMENT_HEADER_SIZE as u64,
            scratch: Vec::new(),
        })
    }

    /// Reopens a scanned segment for appending, cutting off a damaged tail.
    pub fn reopen(path: PathBuf, scan: &SegmentScan) -> TandemResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len > scan.valid_len {
            warn!(
                path = %path.display(),
                from = len,
                to = scan.valid_len,
                "Truncating torn change log tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(scan.valid_len))?;
        let last_seq = scan
            .entries
            .last()
            .map_or(scan.first_seq.prev(), |e| e.seq);
        Ok(Self {
            path,
            file,
            first_seq: scan.first_seq,
            last_seq,
            size: scan.valid_len,
            scratch: Vec::new(),
        })
    }

    /// Appends one framed entry. The write is complete when this returns.
    pub fn append(&mut self, entry: &ChangeEntry) -> TandemResult<usize> {
        self.scratch.clear();
        encode_frame(entry, &mut self.scratch);
        if let Err(e) = self.file.write_all(&self.scratch) {
            // Cut off whatever part of the frame reached the file.
            let _ = self.file.set_len(self.size);
            let _ = self.file.seek(SeekFrom::Start(self.size));
            return Err(e.into());
        }
        self.size += self.scratch.len() as u64;
        self.last_seq = entry.seq;
        Ok(self.scratch.len())
    }

    /// Flushes the segment to stable storage.
    pub fn sync(&self) -> TandemResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Returns the segment path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the first sequence number the segment was created for.
    #[must_use]
    pub fn first_seq(&self) -> SeqNo {
        self.first_seq
    }

    /// Returns the last appended sequence number.
    #[must_use]
    pub fn last_seq(&self) -> SeqNo {
        self.last_seq
    }

    /// Returns the current file size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns true if no frame was appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size <= SEGMENT_HEADER_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ChangeDraft;
    use tandem_common::types::{RowId, TableId, Timestamp, TxnId, Value};

    fn entry(seq: u64) -> ChangeEntry {
        ChangeDraft::upsert(
            TableId::new(1),
            RowId::new(seq),
            TxnId::new(1),
            None,
            vec![Value::Int64(seq as i64)],
        )
        .into_entry(SeqNo::new(seq), Timestamp::from_micros(seq))
    }

    #[test]
    fn test_segment_file_names() {
        let name = segment_file_name(SeqNo::new(501_001));
        assert_eq!(name, "changelog_000000000007a509.log");
        assert_eq!(
            parse_segment_file_name(Path::new(&name)),
            Some(SeqNo::new(501_001))
        );
        assert_eq!(parse_segment_file_name(Path::new("other.log")), None);
    }

    #[test]
    fn test_append_and_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = ActiveSegment::create(dir.path(), SeqNo::new(10)).unwrap();
        assert!(segment.is_empty());
        for seq in 10..15 {
            segment.append(&entry(seq)).unwrap();
        }
        segment.sync().unwrap();
        assert_eq!(segment.last_seq(), SeqNo::new(14));

        let scan = scan_segment(segment.path()).unwrap();
        assert_eq!(scan.first_seq, SeqNo::new(10));
        assert_eq!(scan.entries.len(), 5);
        assert_eq!(scan.valid_len, segment.size());
        assert!(scan.damage.is_none());
    }

    #[test]
    fn test_reopen_truncates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut segment = ActiveSegment::create(dir.path(), SeqNo::new(1)).unwrap();
            segment.append(&entry(1)).unwrap();
            segment.append(&entry(2)).unwrap();
            segment.path().to_path_buf()
        };
        let full = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 3).unwrap();

        let scan = scan_segment(&path).unwrap();
        assert_eq!(scan.entries.len(), 1);
        assert!(scan.damage.is_some());

        let mut segment = ActiveSegment::reopen(path.clone(), &scan).unwrap();
        assert_eq!(segment.last_seq(), SeqNo::new(1));
        segment.append(&entry(2)).unwrap();
        let rescan = scan_segment(&path).unwrap();
        assert_eq!(rescan.entries.len(), 2);
        assert!(rescan.damage.is_none());
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(segment_file_name(SeqNo::new(1)));
        std::fs::write(&path, [0u8; 32]).unwrap();
        assert!(scan_segment(&path).is_err());
    }
}
