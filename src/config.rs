//! Process-wide configuration and geometry (§3, §4.8), resolved once at
//! `initialise`.

use crate::cache_index::CacheHash;
use crate::Rank;

/// Resolves a size that may depend on the caller's rank and the peer
/// count — e.g. a table size chosen differently per benchmark shard.
/// Captured at initialise time only, never stored for later reuse (§9).
pub type SizeDeterminer = Box<dyn Fn(Rank, Rank) -> u64 + Send + Sync>;

/// Controls block-striped placement (§4.1). `block_size = 0` resolves to
/// `table_size` at initialise (whole tables per peer); `1` gives
/// fine-grained round-robin striping.
pub struct ShardingOptions {
    pub block_size: u64,
}

impl Default for ShardingOptions {
    fn default() -> Self {
        ShardingOptions { block_size: 0 }
    }
}

/// Controls the local cache (§4.2). `size = 0` resolves to `table_size` at
/// initialise — enough to hold one full table's worth of rows.
pub struct CachingOptions {
    pub hash: CacheHash,
    pub size: u64,
}

impl Default for CachingOptions {
    fn default() -> Self {
        CachingOptions {
            hash: CacheHash::RowMajor,
            size: 0,
        }
    }
}

/// The resolved, immutable configuration shared by every operation on a
/// [`crate::Store`]. All peers must agree on every field except
/// `max_threads`, which is local.
pub struct Config {
    pub table_amount: u64,
    pub table_size: u64,
    pub row_size: u64,
    pub block_size: u64,
    pub cache_size: u64,
    pub cache_hash: CacheHash,
    pub offset_slack: bool,
    pub locking: bool,
    /// Diagnostic cap on mismatched read retries (§4.5, §7). `None` means
    /// the read loop never gives up — the contractual default.
    pub max_read_retries: Option<u32>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("table_amount", &self.table_amount)
            .field("table_size", &self.table_size)
            .field("row_size", &self.row_size)
            .field("block_size", &self.block_size)
            .field("cache_size", &self.cache_size)
            .field("cache_hash", &self.cache_hash)
            .field("offset_slack", &self.offset_slack)
            .field("locking", &self.locking)
            .field("max_read_retries", &self.max_read_retries)
            .finish()
    }
}

impl Config {
    pub fn total_rows(&self) -> u64 {
        self.table_amount * self.table_size
    }
}

/// Inputs to [`crate::Store::initialise`]. Any of `table_amount`,
/// `table_size`, `row_size` may be left `0` and instead resolved through the
/// matching `*_determiner` callback (§4.8, §6); failure to resolve either
/// way is `Error::InvalidArgument`.
#[derive(Default)]
pub struct InitOptions {
    pub table_amount: u64,
    pub table_size: u64,
    pub row_size: u64,
    pub sharding: ShardingOptions,
    pub caching: CachingOptions,
    pub offset_slack_default_true: Option<bool>,
    pub locking: Option<bool>,
    pub max_read_retries: Option<u32>,
    pub table_amount_determiner: Option<SizeDeterminer>,
    pub table_size_determiner: Option<SizeDeterminer>,
    pub row_size_determiner: Option<SizeDeterminer>,
}

impl InitOptions {
    pub fn offset_slack(&self) -> bool {
        self.offset_slack_default_true.unwrap_or(true)
    }

    pub fn locking(&self) -> bool {
        self.locking.unwrap_or(true)
    }

    /// Resolves an explicit-or-determined size, returning
    /// `Error::InvalidArgument` if neither the value nor the determiner
    /// produces a nonzero result.
    pub(crate) fn resolve_size(
        explicit: u64,
        determiner: &Option<SizeDeterminer>,
        rank: Rank,
        peer_count: Rank,
        name: &str,
    ) -> crate::Result<u64> {
        if explicit != 0 {
            return Ok(explicit);
        }
        if let Some(f) = determiner {
            let resolved = f(rank, peer_count);
            if resolved != 0 {
                return Ok(resolved);
            }
        }
        Err(crate::Error::InvalidArgument(format!(
            "{name} is 0 and no determiner produced a nonzero value"
        )))
    }
}
