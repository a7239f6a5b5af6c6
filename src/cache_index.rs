//! The cache index (§4.2): maps `(row_id, table_id)` to a slot in the local
//! cache region via a user-selectable hash.

use std::fmt;
use std::sync::Arc;

use crate::{RowId, TableId};

/// A cache-slot hash. The two predefined variants mirror the `row-major`
/// and `column-major` hashes named in §4.2; `Custom` accepts any pure
/// function captured at initialise time (§9: hooks are first-class
/// injected strategies, never raw callbacks threaded through every call).
#[derive(Clone)]
pub enum CacheHash {
    RowMajor,
    ColumnMajor,
    Custom(Arc<dyn Fn(RowId, TableId) -> u64 + Send + Sync>),
}

impl fmt::Debug for CacheHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheHash::RowMajor => write!(f, "CacheHash::RowMajor"),
            CacheHash::ColumnMajor => write!(f, "CacheHash::ColumnMajor"),
            CacheHash::Custom(_) => write!(f, "CacheHash::Custom(..)"),
        }
    }
}

impl CacheHash {
    /// Hashes `(row_id, table_id)` to an unbounded value; the caller
    /// reduces modulo the cache size to get a slot index.
    pub fn hash(&self, row_id: RowId, table_id: TableId, table_size: u64, table_amount: u64) -> u64 {
        match self {
            CacheHash::RowMajor => row_major(row_id, table_id, table_size),
            CacheHash::ColumnMajor => column_major(row_id, table_id, table_amount),
            CacheHash::Custom(f) => f(row_id, table_id),
        }
    }
}

/// `table_id * table_size + row_id` — rows of the same table land in
/// contiguous cache slots.
pub fn row_major(row_id: RowId, table_id: TableId, table_size: u64) -> u64 {
    table_id * table_size + row_id
}

/// `row_id * table_amount + table_id` — the same row across tables lands in
/// contiguous cache slots.
pub fn column_major(row_id: RowId, table_id: TableId, table_amount: u64) -> u64 {
    row_id * table_amount + table_id
}

/// Reduces a hash value to a concrete slot index. A cache hit requires the
/// slot's stored metadata to equal `(row_id, table_id)`; collisions are
/// resolved by overwrite (§4.2) — there is no eviction policy.
pub fn slot_index(hash: u64, cache_size: u64) -> usize {
    debug_assert!(cache_size > 0);
    (hash % cache_size) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_groups_same_table_contiguously() {
        assert_eq!(row_major(0, 2, 4), 8);
        assert_eq!(row_major(3, 2, 4), 11);
    }

    #[test]
    fn column_major_groups_same_row_contiguously() {
        assert_eq!(column_major(2, 0, 3), 6);
        assert_eq!(column_major(2, 2, 3), 8);
    }

    #[test]
    fn custom_hash_is_invoked() {
        let hash = CacheHash::Custom(Arc::new(|r: RowId, t: TableId| r + t));
        assert_eq!(hash.hash(2, 3, 99, 99), 5);
    }

    #[test]
    fn cache_size_one_always_collides() {
        for (r, t) in [(0u64, 0u64), (1, 0), (0, 1), (7, 9)] {
            assert_eq!(slot_index(row_major(r, t, 4), 1), 0);
        }
    }
}
