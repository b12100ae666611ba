//! Per-slot clipboard bookkeeping for the client session.
//!
//! Each of the two clipboard ids tracks who owns it (us or the server), a
//! dirty flag for data not yet pushed to the server, the slot's sequence
//! number, and – while a transfer is inbound – the chunk assembler staging
//! it.

use tracing::warn;

use synergy_core::protocol::clipboard::{ClipboardAssembler, ClipboardError};
use synergy_core::protocol::messages::{ClipboardChunk, ClipboardId};

#[derive(Debug, Default)]
pub struct ClipboardSlot {
    /// A local application owns this clipboard's contents.
    pub grabbed_locally: bool,
    /// Local contents have not been sent to the server yet.
    pub dirty: bool,
    /// Sequence number of the last accepted grab or transfer.
    pub seq: u32,
    assembler: Option<ClipboardAssembler>,
}

impl ClipboardSlot {
    /// Accepts `seq` if it is not older than the slot's watermark.  Clipboard
    /// sequence numbers reuse the enter sequence, so equality is valid here
    /// (unlike the strictly-increasing enter filter).
    pub fn accept_seq(&mut self, seq: u32) -> bool {
        if seq < self.seq {
            return false;
        }
        self.seq = seq;
        true
    }

    /// Records that the server side grabbed this clipboard.
    pub fn grabbed_remotely(&mut self) {
        self.grabbed_locally = false;
        self.dirty = false;
        self.abort();
    }

    /// Records that a local application grabbed this clipboard.
    pub fn grabbed(&mut self) {
        self.grabbed_locally = true;
        self.dirty = true;
    }

    /// Stages one inbound chunk.  Returns the assembled payload on `End`.
    /// Any deviation discards the staging and the error is absorbed by the
    /// caller.
    pub fn stage(&mut self, chunk: ClipboardChunk) -> Result<Option<Vec<u8>>, ClipboardError> {
        let assembler = self.assembler.get_or_insert_with(ClipboardAssembler::new);
        match assembler.push(chunk) {
            Ok(Some(payload)) => {
                self.assembler = None;
                Ok(Some(payload))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.assembler = None;
                Err(e)
            }
        }
    }

    /// Drops any in-flight staging.
    pub fn abort(&mut self) {
        if self.assembler.take().is_some() {
            warn!("discarding partial clipboard transfer");
        }
    }

    /// Resets the slot for a new session.
    pub fn reset(&mut self) {
        self.grabbed_locally = false;
        self.dirty = false;
        self.seq = 0;
        self.assembler = None;
    }
}

/// Both slots, indexed by [`ClipboardId`].
#[derive(Debug, Default)]
pub struct ClipboardSlots {
    slots: [ClipboardSlot; 2],
}

impl ClipboardSlots {
    pub fn get_mut(&mut self, id: ClipboardId) -> &mut ClipboardSlot {
        &mut self.slots[id as usize]
    }

    pub fn get(&self, id: ClipboardId) -> &ClipboardSlot {
        &self.slots[id as usize]
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
    }

    /// Ids of slots we own with unsent data.
    pub fn dirty_local(&self) -> Vec<ClipboardId> {
        ClipboardId::ALL
            .into_iter()
            .filter(|id| {
                let slot = self.get(*id);
                slot.grabbed_locally && slot.dirty
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_seq_allows_equal_rejects_older() {
        let mut slot = ClipboardSlot::default();
        assert!(slot.accept_seq(5));
        assert!(slot.accept_seq(5));
        assert!(!slot.accept_seq(4));
        assert!(slot.accept_seq(6));
    }

    #[test]
    fn test_stage_full_transfer_returns_payload() {
        let mut slot = ClipboardSlot::default();
        assert_eq!(slot.stage(ClipboardChunk::Start { total: 3 }), Ok(None));
        assert_eq!(slot.stage(ClipboardChunk::Data(vec![1, 2, 3])), Ok(None));
        assert_eq!(
            slot.stage(ClipboardChunk::End),
            Ok(Some(vec![1, 2, 3]))
        );
    }

    #[test]
    fn test_stage_error_discards_staging_and_recovers_on_next_start() {
        let mut slot = ClipboardSlot::default();
        slot.stage(ClipboardChunk::Start { total: 10 }).unwrap();
        slot.stage(ClipboardChunk::Data(vec![0; 4])).unwrap();
        assert!(slot.stage(ClipboardChunk::End).is_err());

        // A fresh transfer starts cleanly after the discard.
        assert_eq!(slot.stage(ClipboardChunk::Start { total: 1 }), Ok(None));
        assert_eq!(slot.stage(ClipboardChunk::Data(vec![9])), Ok(None));
        assert_eq!(slot.stage(ClipboardChunk::End), Ok(Some(vec![9])));
    }

    #[test]
    fn test_remote_grab_clears_local_ownership() {
        let mut slot = ClipboardSlot::default();
        slot.grabbed();
        assert!(slot.grabbed_locally && slot.dirty);
        slot.grabbed_remotely();
        assert!(!slot.grabbed_locally && !slot.dirty);
    }

    #[test]
    fn test_dirty_local_lists_only_owned_dirty_slots() {
        let mut slots = ClipboardSlots::default();
        slots.get_mut(ClipboardId::Clipboard).grabbed();
        assert_eq!(slots.dirty_local(), vec![ClipboardId::Clipboard]);

        slots.get_mut(ClipboardId::Clipboard).dirty = false;
        assert!(slots.dirty_local().is_empty());
    }
}
