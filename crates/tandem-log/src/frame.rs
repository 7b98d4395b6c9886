//! Durable frame codec.
//!
//! Frames carry one encoded change entry each. A reader distinguishes a
//! frame that ends past the available bytes (a torn tail) from one whose
//! checksum does not match.

use bytes::{Buf, BufMut, Bytes};

use tandem_common::constants::{LOG_FRAME_HEADER_SIZE, MAX_CHANGE_ENTRY_SIZE};
use tandem_common::types::SeqNo;

use crate::entry::ChangeEntry;

/// Result of decoding one frame from a byte slice.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead {
    /// A complete, verified frame.
    Frame {
        /// Sequence number from the header.
        seq: SeqNo,
        /// Verified payload.
        payload: Bytes,
        /// Bytes consumed, header included.
        len: usize,
    },
    /// The slice ends inside the frame.
    Incomplete,
    /// The frame is malformed.
    Corrupt(String),
}

/// Computes the frame checksum.
#[must_use]
pub fn frame_checksum(seq: SeqNo, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&seq.as_u64().to_le_bytes());
    hasher.update(&(payload.len() as u32).to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Appends a framed entry to `buf`.
pub fn encode_frame(entry: &ChangeEntry, buf: &mut impl BufMut) {
    let mut payload = Vec::with_capacity(entry.payload_len());
    entry.encode_payload(&mut payload);
    buf.put_u64_le(entry.seq.as_u64());
    buf.put_u32_le(payload.len() as u32);
    buf.put_u32_le(frame_checksum(entry.seq, &payload));
    buf.put_slice(&payload);
}

/// Returns the framed size of an entry.
#[must_use]
pub fn frame_len(entry: &ChangeEntry) -> usize {
    LOG_FRAME_HEADER_SIZE + entry.payload_len()
}

/// Decodes the frame at the start of `data`.
#[must_use]
pub fn decode_frame(data: &[u8]) -> FrameRead {
    if data.len() < LOG_FRAME_HEADER_SIZE {
        return FrameRead::Incomplete;
    }
    let mut header = &data[..LOG_FRAME_HEADER_SIZE];
    let seq = SeqNo::new(header.get_u64_le());
    let length = header.get_u32_le() as usize;
    let stored = header.get_u32_le();

    if length > MAX_CHANGE_ENTRY_SIZE {
        return FrameRead::Corrupt(format!(
            "frame {} declares {} payload bytes, above the {} limit",
            seq, length, MAX_CHANGE_ENTRY_SIZE
        ));
    }
    let end = LOG_FRAME_HEADER_SIZE + length;
    if data.len() < end {
        return FrameRead::Incomplete;
    }
    let payload = &data[LOG_FRAME_HEADER_SIZE..end];
    let computed = frame_checksum(seq, payload);
    if computed != stored {
        return FrameRead::Corrupt(format!(
            "frame {} checksum mismatch: stored {:#010x}, computed {:#010x}",
            seq, stored, computed
        ));
    }
    FrameRead::Frame {
        seq,
        payload: Bytes::copy_from_slice(payload),
        len: end,
    }
}
