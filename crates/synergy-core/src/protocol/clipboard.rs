//! Clipboard payload marshalling and chunk reassembly.
//!
//! An assembled clipboard payload is a map from format ids to blobs:
//! ```text
//! [count:4] then per format: [format:4][size:4][bytes:size]
//! ```
//! Payloads travel as `DCLP` chunks: one `Start` declaring the total size,
//! any number of `Data` slices, one `End`.  [`ClipboardAssembler`] rebuilds
//! the payload on the receiving side and discards the slot on any deviation
//! from that pattern.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::protocol::messages::ClipboardChunk;

/// Largest data slice placed in a single `Data` chunk when sending.
pub const CHUNK_SIZE: usize = 512 * 1024;

// ── Formats ───────────────────────────────────────────────────────────────────

/// Clipboard data formats, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum ClipboardFormat {
    /// UTF-8 text.
    Text = 0,
    /// HTML fragment.
    Html = 1,
    /// Platform-neutral bitmap.
    Bitmap = 2,
}

impl TryFrom<u32> for ClipboardFormat {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ClipboardFormat::Text),
            1 => Ok(ClipboardFormat::Html),
            2 => Ok(ClipboardFormat::Bitmap),
            _ => Err(()),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Per-slot clipboard failures.  These discard the slot's staged data and are
/// otherwise absorbed: the session continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClipboardError {
    /// A chunk arrived out of order for the slot (e.g. `Data` before `Start`).
    #[error("unexpected {got} chunk while {state}")]
    UnexpectedChunk {
        got: &'static str,
        state: &'static str,
    },

    /// Staged data exceeded the size declared by `Start`.
    #[error("staged {staged} bytes exceeds declared total {declared}")]
    Overflow { declared: u32, staged: usize },

    /// `End` arrived before the declared total was staged.
    #[error("transfer ended with {staged} of {declared} declared bytes")]
    SizeMismatch { declared: u32, staged: usize },

    /// The assembled payload's format map is malformed.
    #[error("malformed clipboard payload: {0}")]
    MalformedPayload(String),
}

// ── Format map ────────────────────────────────────────────────────────────────

/// Assembled clipboard contents: format id → blob.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClipboardData {
    formats: BTreeMap<ClipboardFormat, Vec<u8>>,
}

impl ClipboardData {
    pub fn new() -> ClipboardData {
        ClipboardData::default()
    }

    /// Convenience constructor for plain text.
    pub fn from_text(text: &str) -> ClipboardData {
        let mut data = ClipboardData::new();
        data.set(ClipboardFormat::Text, text.as_bytes().to_vec());
        data
    }

    pub fn set(&mut self, format: ClipboardFormat, blob: Vec<u8>) {
        self.formats.insert(format, blob);
    }

    pub fn get(&self, format: ClipboardFormat) -> Option<&[u8]> {
        self.formats.get(&format).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Serializes the format map into the wire payload.
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.formats.len() as u32).to_be_bytes());
        for (format, blob) in &self.formats {
            buf.extend_from_slice(&(*format as u32).to_be_bytes());
            buf.extend_from_slice(&(blob.len() as u32).to_be_bytes());
            buf.extend_from_slice(blob);
        }
        buf
    }

    /// Parses a wire payload back into a format map.  Unknown format ids are
    /// skipped; structural damage is an error.
    pub fn unmarshal(payload: &[u8]) -> Result<ClipboardData, ClipboardError> {
        let mut data = ClipboardData::new();
        let mut off = 0usize;
        let read_u32 = |buf: &[u8], off: usize| -> Result<u32, ClipboardError> {
            buf.get(off..off + 4)
                .map(|b| u32::from_be_bytes(b.try_into().expect("slice length checked")))
                .ok_or_else(|| {
                    ClipboardError::MalformedPayload(format!("truncated at offset {off}"))
                })
        };
        let count = read_u32(payload, off)?;
        off += 4;
        for _ in 0..count {
            let format_id = read_u32(payload, off)?;
            let size = read_u32(payload, off + 4)? as usize;
            off += 8;
            let blob = payload.get(off..off + size).ok_or_else(|| {
                ClipboardError::MalformedPayload(format!(
                    "format {format_id} declares {size} bytes past end of payload"
                ))
            })?;
            off += size;
            if let Ok(format) = ClipboardFormat::try_from(format_id) {
                data.set(format, blob.to_vec());
            }
        }
        if off != payload.len() {
            return Err(ClipboardError::MalformedPayload(format!(
                "{} trailing bytes",
                payload.len() - off
            )));
        }
        Ok(data)
    }
}

// ── Chunking ──────────────────────────────────────────────────────────────────

/// Splits an assembled payload into the chunk sequence to send.
pub fn chunk_payload(payload: &[u8]) -> Vec<ClipboardChunk> {
    let mut chunks = Vec::with_capacity(2 + payload.len() / CHUNK_SIZE);
    chunks.push(ClipboardChunk::Start {
        total: payload.len() as u32,
    });
    for slice in payload.chunks(CHUNK_SIZE) {
        chunks.push(ClipboardChunk::Data(slice.to_vec()));
    }
    chunks.push(ClipboardChunk::End);
    chunks
}

/// Reassembles one slot's chunk stream.
///
/// Created fresh per transfer; any protocol deviation returns an error and
/// the caller drops the assembler (and with it the staged data).
#[derive(Debug, Default)]
pub struct ClipboardAssembler {
    declared: Option<u32>,
    staged: Vec<u8>,
}

impl ClipboardAssembler {
    pub fn new() -> ClipboardAssembler {
        ClipboardAssembler::default()
    }

    /// Whether a transfer is in progress.
    pub fn in_progress(&self) -> bool {
        self.declared.is_some()
    }

    /// Feeds one chunk.  Returns the complete payload when `End` closes a
    /// consistent transfer.
    pub fn push(&mut self, chunk: ClipboardChunk) -> Result<Option<Vec<u8>>, ClipboardError> {
        match chunk {
            ClipboardChunk::Start { total } => {
                if self.declared.is_some() {
                    return Err(ClipboardError::UnexpectedChunk {
                        got: "start",
                        state: "mid-transfer",
                    });
                }
                self.declared = Some(total);
                self.staged = Vec::with_capacity(total.min(crate::protocol::codec::MAX_MESSAGE_SIZE) as usize);
                Ok(None)
            }
            ClipboardChunk::Data(data) => {
                let declared = self.declared.ok_or(ClipboardError::UnexpectedChunk {
                    got: "data",
                    state: "idle",
                })?;
                if self.staged.len() + data.len() > declared as usize {
                    return Err(ClipboardError::Overflow {
                        declared,
                        staged: self.staged.len() + data.len(),
                    });
                }
                self.staged.extend_from_slice(&data);
                Ok(None)
            }
            ClipboardChunk::End => {
                let declared = self.declared.ok_or(ClipboardError::UnexpectedChunk {
                    got: "end",
                    state: "idle",
                })?;
                if self.staged.len() != declared as usize {
                    return Err(ClipboardError::SizeMismatch {
                        declared,
                        staged: self.staged.len(),
                    });
                }
                self.declared = None;
                Ok(Some(std::mem::take(&mut self.staged)))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_unmarshal_round_trips_multiple_formats() {
        let mut data = ClipboardData::new();
        data.set(ClipboardFormat::Text, b"hello".to_vec());
        data.set(ClipboardFormat::Html, b"<b>hello</b>".to_vec());

        let restored = ClipboardData::unmarshal(&data.marshal()).expect("unmarshal");
        assert_eq!(restored, data);
    }

    #[test]
    fn test_unmarshal_skips_unknown_formats() {
        // count=1, format=99, size=2, bytes
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&99u32.to_be_bytes());
        payload.extend_from_slice(&2u32.to_be_bytes());
        payload.extend_from_slice(&[1, 2]);

        let data = ClipboardData::unmarshal(&payload).expect("unmarshal");
        assert!(data.is_empty());
    }

    #[test]
    fn test_unmarshal_rejects_truncated_blob() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&10u32.to_be_bytes());
        payload.extend_from_slice(&[0; 3]);

        assert!(matches!(
            ClipboardData::unmarshal(&payload),
            Err(ClipboardError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_chunk_payload_brackets_data_with_start_and_end() {
        let payload = vec![0x42; 10];
        let chunks = chunk_payload(&payload);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], ClipboardChunk::Start { total: 10 });
        assert_eq!(chunks[1], ClipboardChunk::Data(payload.clone()));
        assert_eq!(chunks[2], ClipboardChunk::End);
    }

    #[test]
    fn test_chunk_payload_splits_large_payloads() {
        let payload = vec![0; CHUNK_SIZE + 1];
        let chunks = chunk_payload(&payload);
        // Start + two Data slices + End.
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_chunk_payload_of_empty_payload_has_no_data_chunks() {
        let chunks = chunk_payload(&[]);
        assert_eq!(
            chunks,
            vec![ClipboardChunk::Start { total: 0 }, ClipboardChunk::End]
        );
    }

    #[test]
    fn test_assembler_reassembles_split_transfer() {
        // START(5000) → DATA(2000) → DATA(2000) → DATA(1000) → END
        let mut asm = ClipboardAssembler::new();
        assert_eq!(asm.push(ClipboardChunk::Start { total: 5000 }), Ok(None));
        assert_eq!(asm.push(ClipboardChunk::Data(vec![1; 2000])), Ok(None));
        assert_eq!(asm.push(ClipboardChunk::Data(vec![2; 2000])), Ok(None));
        assert_eq!(asm.push(ClipboardChunk::Data(vec![3; 1000])), Ok(None));

        let payload = asm.push(ClipboardChunk::End).expect("end").expect("payload");
        assert_eq!(payload.len(), 5000);
        assert_eq!(payload[0], 1);
        assert_eq!(payload[4999], 3);
        assert!(!asm.in_progress());
    }

    #[test]
    fn test_assembler_rejects_short_transfer_at_end() {
        // Declared 5000 but only 4500 staged: the slot is discarded.
        let mut asm = ClipboardAssembler::new();
        asm.push(ClipboardChunk::Start { total: 5000 }).unwrap();
        asm.push(ClipboardChunk::Data(vec![0; 2000])).unwrap();
        asm.push(ClipboardChunk::Data(vec![0; 2000])).unwrap();
        asm.push(ClipboardChunk::Data(vec![0; 500])).unwrap();

        assert_eq!(
            asm.push(ClipboardChunk::End),
            Err(ClipboardError::SizeMismatch {
                declared: 5000,
                staged: 4500
            })
        );
    }

    #[test]
    fn test_assembler_rejects_overflowing_data() {
        let mut asm = ClipboardAssembler::new();
        asm.push(ClipboardChunk::Start { total: 10 }).unwrap();
        assert!(matches!(
            asm.push(ClipboardChunk::Data(vec![0; 11])),
            Err(ClipboardError::Overflow { .. })
        ));
    }

    #[test]
    fn test_assembler_rejects_data_before_start() {
        let mut asm = ClipboardAssembler::new();
        assert!(matches!(
            asm.push(ClipboardChunk::Data(vec![0; 4])),
            Err(ClipboardError::UnexpectedChunk { got: "data", .. })
        ));
    }

    #[test]
    fn test_assembler_rejects_double_start() {
        let mut asm = ClipboardAssembler::new();
        asm.push(ClipboardChunk::Start { total: 4 }).unwrap();
        assert!(matches!(
            asm.push(ClipboardChunk::Start { total: 4 }),
            Err(ClipboardError::UnexpectedChunk { got: "start", .. })
        ));
    }

    #[test]
    fn test_assembler_round_trips_marshalled_clipboard() {
        let data = ClipboardData::from_text("copied across screens");
        let payload = data.marshal();

        let mut asm = ClipboardAssembler::new();
        let mut result = None;
        for chunk in chunk_payload(&payload) {
            result = asm.push(chunk).expect("chunk accepted");
        }
        let restored = ClipboardData::unmarshal(&result.expect("payload")).expect("unmarshal");
        assert_eq!(restored, data);
    }
}
