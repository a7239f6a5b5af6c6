//! Byte-layout constants for authoritative row slots and cache slots (§3,
//! §6). This is the one place slot offsets are computed; every component
//! goes through it rather than doing its own pointer arithmetic (§9).

use crate::Rank;

/// Fixed width of the lock word (when locking is enabled).
pub const LOCK_WORD_SIZE: usize = 4;
/// Fixed width of one metadata field (`age`, `row_id`, `table_id` are each
/// a `u64`).
pub const METADATA_FIELD_SIZE: usize = 8;
/// `age`, `row_id`, `table_id`.
pub const METADATA_SIZE: usize = METADATA_FIELD_SIZE * 3;
/// Width of one prefetch-request word (a minimum-age value). Matches the
/// lock word's 32-bit width since both go through the same
/// `compare_and_swap`/`fetch_add` primitives (§9).
pub const PREFETCH_WORD_SIZE: usize = 4;

/// Computes slot sizes and field offsets from the resolved [`crate::Config`].
/// `L = sizeof(lock_word)` when locking is enabled, else `0`; `M =
/// sizeof(metadata_tag)`; `P = row_size`; the rows region additionally
/// carries `N` prefetch-request words (§6 "Persisted state layout").
#[derive(Debug, Clone, Copy)]
pub struct SlotLayout {
    pub lock_word_size: usize,
    pub row_size: usize,
    pub peer_count: Rank,
}

impl SlotLayout {
    pub fn new(locking: bool, row_size: u64, peer_count: Rank) -> Self {
        SlotLayout {
            lock_word_size: if locking { LOCK_WORD_SIZE } else { 0 },
            row_size: row_size as usize,
            peer_count,
        }
    }

    /// Offset of the metadata tag within a slot, past the lock word.
    pub fn metadata_offset(&self) -> usize {
        self.lock_word_size
    }

    /// Offset of the payload within a slot.
    pub fn payload_offset(&self) -> usize {
        self.lock_word_size + METADATA_SIZE
    }

    /// Offset of `requester`'s prefetch-request word within an
    /// authoritative row slot (§4.6 step 2).
    pub fn prefetch_word_offset(&self, requester: Rank) -> usize {
        self.payload_offset() + self.row_size + requester as usize * PREFETCH_WORD_SIZE
    }

    /// Total byte size of one authoritative row slot: lock + metadata +
    /// payload + one prefetch word per peer.
    pub fn row_slot_size(&self) -> usize {
        self.lock_word_size + METADATA_SIZE + self.row_size + self.peer_count as usize * PREFETCH_WORD_SIZE
    }

    /// Total byte size of one cache slot: lock + metadata + payload, with
    /// no prefetch-request array.
    pub fn cache_slot_size(&self) -> usize {
        self.lock_word_size + METADATA_SIZE + self.row_size
    }

    /// Byte offset of row slot `local_offset` (in row units) within the
    /// rows region.
    pub fn row_byte_offset(&self, local_offset: u64) -> usize {
        local_offset as usize * self.row_slot_size()
    }

    /// Byte offset of cache slot `slot_index` within the cache region.
    pub fn cache_byte_offset(&self, slot_index: usize) -> usize {
        slot_index * self.cache_slot_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locking_disabled_elides_the_lock_word() {
        let locked = SlotLayout::new(true, 8, 3);
        let unlocked = SlotLayout::new(false, 8, 3);
        assert_eq!(locked.metadata_offset(), LOCK_WORD_SIZE);
        assert_eq!(unlocked.metadata_offset(), 0);
        assert_eq!(locked.row_slot_size() - unlocked.row_slot_size(), LOCK_WORD_SIZE);
    }

    #[test]
    fn prefetch_words_are_packed_after_the_payload() {
        let layout = SlotLayout::new(true, 16, 4);
        assert_eq!(layout.prefetch_word_offset(0), layout.payload_offset() + 16);
        assert_eq!(
            layout.prefetch_word_offset(2),
            layout.payload_offset() + 16 + 2 * PREFETCH_WORD_SIZE
        );
        assert_eq!(
            layout.row_slot_size(),
            layout.prefetch_word_offset(3) + PREFETCH_WORD_SIZE
        );
    }
}
