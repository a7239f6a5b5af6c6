//! The placement map (§4.1): a pure function from `(table_id, row_id)` to
//! an owning rank and a local row offset, under block-striped round-robin
//! assignment.

use crate::{Rank, RowId, TableId};

/// `global_index = table_id * table_size + row_id`, the dense numbering
/// blocks are carved out of.
pub fn global_index(table_id: TableId, row_id: RowId, table_size: u64) -> u64 {
    table_id * table_size + row_id
}

/// Computes `(owner_rank, local_offset)` for a global row index, given the
/// sharding block size and peer count. `local_offset` is in row units; the
/// caller multiplies by the full slot size to get a byte offset (§4.1).
pub fn place(global_index: u64, block_size: u64, peer_count: u32) -> (Rank, u64) {
    debug_assert!(block_size > 0);
    debug_assert!(peer_count > 0);

    let n = peer_count as u64;
    let abs_block = global_index / block_size;
    let owner_rank = (abs_block % n) as u32;
    let offset_block = abs_block / n;
    let offset_inner = global_index - abs_block * block_size;
    let local_offset = offset_block * block_size + offset_inner;
    (owner_rank, local_offset)
}

/// Number of authoritative rows owned by `rank` out of `total_rows` global
/// indices, under the given block size and peer count. Accounts for a
/// partial tail block exactly once, per §4.1 and the boundary cases in §8.
pub fn authoritative_row_count(rank: Rank, total_rows: u64, block_size: u64, peer_count: u32) -> u64 {
    debug_assert!(block_size > 0);
    debug_assert!(peer_count > 0);

    let n = peer_count as u64;
    let full_blocks = total_rows / block_size;
    let remainder = total_rows % block_size;

    let blocks_for_rank = if (rank as u64) < full_blocks {
        (full_blocks - rank as u64 - 1) / n + 1
    } else {
        0
    };
    let mut count = blocks_for_rank * block_size;

    if remainder > 0 && full_blocks % n == rank as u64 {
        count += remainder;
    }
    count
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    #[quickcheck]
    fn qc_row_counts_always_sum_to_total(block_size: u64, peer_count: u8) -> bool {
        let block_size = block_size % 16 + 1;
        let peer_count = (peer_count % 7) as u32 + 1;
        let table_amount = 3u64;
        let table_size = 5u64;
        let total = table_amount * table_size;
        let sum: u64 = (0..peer_count)
            .map(|r| authoritative_row_count(r, total, block_size, peer_count))
            .sum();
        sum == total
    }

    #[quickcheck]
    fn qc_place_local_offset_is_within_owners_row_count(
        global_index: u64,
        block_size: u64,
        peer_count: u8,
    ) -> bool {
        let total_rows = 64u64;
        let global_index = global_index % total_rows;
        let block_size = block_size % 16 + 1;
        let peer_count = (peer_count % 7) as u32 + 1;
        let (owner, local_offset) = place(global_index, block_size, peer_count);
        local_offset < authoritative_row_count(owner, total_rows, block_size, peer_count)
    }

    #[test]
    fn placement_law_worked_example() {
        // N=3, table_size=4, block_size=2, global index 7 = (table_id=1, row_id=3).
        let idx = global_index(1, 3, 4);
        assert_eq!(idx, 7);
        assert_eq!(place(idx, 2, 3), (0, 3));
    }

    #[test]
    fn fine_grained_striping_every_row_different_owner() {
        for i in 0..12u64 {
            let (owner, _) = place(i, 1, 3);
            assert_eq!(owner, (i % 3) as u32);
        }
    }

    #[test]
    fn table_per_peer_degenerates_to_whole_tables() {
        let table_size = 4u64;
        // block_size = table_size: every row of a table maps to the same owner.
        let owners: Vec<_> = (0..table_size)
            .map(|row| place(global_index(2, row, table_size), table_size, 3).0)
            .collect();
        assert!(owners.iter().all(|&o| o == owners[0]));
    }

    #[test]
    fn row_counts_sum_to_total_rows() {
        let table_amount = 3u64;
        let table_size = 4u64;
        let total = table_amount * table_size;
        for block_size in [1u64, 2, 3, 4, 5, 12] {
            for peer_count in [1u32, 2, 3, 5] {
                let sum: u64 = (0..peer_count)
                    .map(|r| authoritative_row_count(r, total, block_size, peer_count))
                    .sum();
                assert_eq!(sum, total, "block_size={block_size} peer_count={peer_count}");
            }
        }
    }

    #[test]
    fn every_index_maps_to_a_slot_within_its_owners_row_count() {
        let table_amount = 3u64;
        let table_size = 4u64;
        let total = table_amount * table_size;
        for block_size in [1u64, 2, 3, 4, 7] {
            let peer_count = 3u32;
            let mut seen = vec![std::collections::HashSet::new(); peer_count as usize];
            for idx in 0..total {
                let (owner, offset) = place(idx, block_size, peer_count);
                assert!(
                    seen[owner as usize].insert(offset),
                    "duplicate local_offset {offset} on rank {owner} (block_size={block_size})"
                );
            }
            for r in 0..peer_count {
                let expected = authoritative_row_count(r, total, block_size, peer_count);
                assert_eq!(seen[r as usize].len() as u64, expected);
            }
        }
    }
}
