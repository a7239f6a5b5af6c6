//! The write path (§4.4), read path (§4.5), prefetch requester (§4.6),
//! prefetch fulfiller (§4.7), and clock/lifecycle operations (§4.8), tied
//! together behind a single [`Store`].

use crate::cache_index;
use crate::config::{Config, InitOptions};
use crate::error::{Error, Result};
use crate::info::PeerInfo;
use crate::layout::SlotLayout;
use crate::lock;
use crate::placement;
use crate::transport::{atomic_read_and_clear, Region, Transport, NOTIFY_ROW_WRITTEN};
use crate::{Age, Rank, RowId, Slack, TableId};

/// The metadata tag carried alongside every row payload (§3): the age it
/// was last produced at, plus the identity used to detect cache collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowMetadata {
    pub age: Age,
    pub row_id: RowId,
    pub table_id: TableId,
}

impl RowMetadata {
    fn decode(buf: &[u8]) -> Self {
        RowMetadata {
            age: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            row_id: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            table_id: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        }
    }

    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.age.to_le_bytes());
        buf[8..16].copy_from_slice(&self.row_id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.table_id.to_le_bytes());
    }

    fn matches(&self, row_id: RowId, table_id: TableId) -> bool {
        self.row_id == row_id && self.table_id == table_id
    }
}

/// The staleness predicate (§4.9): the minimum age a reader will accept.
pub fn compute_min_age(current: Age, slack: Slack, offset_slack: bool) -> Age {
    let threshold = slack + u64::from(offset_slack);
    if current <= threshold {
        1
    } else {
        current - slack - u64::from(offset_slack)
    }
}

/// A single peer's handle into the distributed cache: owns its local cache
/// and its shard of the authoritative store, and drives the protocol over
/// an injected [`Transport`].
pub struct Store<T: Transport> {
    transport: T,
    info: PeerInfo,
    layout: SlotLayout,
}

impl<T: Transport> Store<T> {
    /// Bootstraps peer count and rank from `transport`, resolves any
    /// deferred sizes, allocates the Rows (if this peer owns any rows) and
    /// Cache regions, and synchronises via a full barrier (§4.8).
    pub fn initialise(transport: T, opts: InitOptions) -> Result<Self> {
        let rank = transport.rank();
        let peer_count = transport.peer_count();
        if peer_count == 0 {
            return Err(Error::InvalidArgument("peer_count must be nonzero".into()));
        }

        let table_amount = InitOptions::resolve_size(
            opts.table_amount,
            &opts.table_amount_determiner,
            rank,
            peer_count,
            "table_amount",
        )?;
        let table_size = InitOptions::resolve_size(
            opts.table_size,
            &opts.table_size_determiner,
            rank,
            peer_count,
            "table_size",
        )?;
        let row_size = InitOptions::resolve_size(
            opts.row_size,
            &opts.row_size_determiner,
            rank,
            peer_count,
            "row_size",
        )?;

        let block_size = if opts.sharding.block_size == 0 {
            table_size
        } else {
            opts.sharding.block_size
        };
        let cache_size = if opts.caching.size == 0 { table_size } else { opts.caching.size };
        let locking = opts.locking();
        let offset_slack = opts.offset_slack();

        let max_threads = 1u32;
        lock::check_reader_overflow(max_threads, peer_count)?;

        let layout = SlotLayout::new(locking, row_size, peer_count);
        let config = Config {
            table_amount,
            table_size,
            row_size,
            block_size,
            cache_size,
            cache_hash: opts.caching.hash,
            offset_slack,
            locking,
            max_read_retries: opts.max_read_retries,
        };

        let total_rows = config.total_rows();
        let local_rows = placement::authoritative_row_count(rank, total_rows, block_size, peer_count);

        transport.allocate(Region::Rows, local_rows as usize * layout.row_slot_size())?;
        transport.allocate(Region::Cache, cache_size as usize * layout.cache_slot_size())?;
        transport.barrier()?;

        tracing::debug!(
            rank,
            peer_count,
            table_amount,
            table_size,
            row_size,
            block_size,
            cache_size,
            local_rows,
            "initialised ssp-cache store"
        );

        Ok(Store {
            transport,
            info: PeerInfo::new(rank, peer_count, config),
            layout,
        })
    }

    pub fn get_info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn set_max_threads(&self, max_threads: u32) -> Result<()> {
        if max_threads == 0 {
            return Err(Error::InvalidArgument("max_threads must be nonzero".into()));
        }
        lock::check_reader_overflow(max_threads, self.info.peer_count)?;
        self.info.set_max_threads(max_threads);
        Ok(())
    }

    /// Increments this peer's age by one. Has no cross-peer effect (§4.8).
    pub fn clock(&self) -> Result<Age> {
        let age = self.info.tick();
        tracing::trace!(rank = self.info.rank, age, "clock tick");
        Ok(age)
    }

    pub fn terminate(&self) -> Result<()> {
        self.transport.queue_wait()?;
        self.transport.barrier()
    }

    fn validate_ids(&self, row_id: RowId, table_id: TableId) -> Result<()> {
        let c = &self.info.config;
        if row_id >= c.table_size || table_id >= c.table_amount {
            return Err(Error::InvalidArgument(format!(
                "row_id {row_id}, table_id {table_id} out of range for {} tables of {} rows",
                c.table_amount, c.table_size
            )));
        }
        Ok(())
    }

    fn cache_slot(&self, row_id: RowId, table_id: TableId) -> usize {
        let c = &self.info.config;
        let hash = c.cache_hash.hash(row_id, table_id, c.table_size, c.table_amount);
        cache_index::slot_index(hash, c.cache_size)
    }

    fn owner_and_offset(&self, row_id: RowId, table_id: TableId) -> (Rank, usize) {
        let c = &self.info.config;
        let gi = placement::global_index(table_id, row_id, c.table_size);
        let (owner, local_offset) = placement::place(gi, c.block_size, self.info.peer_count);
        (owner, self.layout.row_byte_offset(local_offset))
    }

    fn with_lock<F, R>(&self, region: Region, rank: Rank, slot_offset: usize, write: bool, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        if !self.info.config.locking {
            return f();
        }
        if write {
            lock::acquire_write(&self.transport, region, rank, slot_offset)?;
            let result = f();
            lock::release_write(&self.transport, region, rank, slot_offset)?;
            result
        } else {
            lock::acquire_read(&self.transport, region, rank, slot_offset)?;
            let result = f();
            lock::release_read(&self.transport, region, rank, slot_offset)?;
            result
        }
    }

    /// Stages `payload` in the local cache, then pushes it to the owning
    /// peer's authoritative slot with a `ROW_WRITTEN` notification (§4.4).
    pub fn write(&self, row_id: RowId, table_id: TableId, payload: &[u8]) -> Result<()> {
        self.validate_ids(row_id, table_id)?;
        if payload.len() != self.info.config.row_size as usize {
            return Err(Error::InvalidArgument(format!(
                "payload is {} bytes, expected {}",
                payload.len(),
                self.info.config.row_size
            )));
        }

        let (owner, row_offset) = self.owner_and_offset(row_id, table_id);
        let cache_slot = self.cache_slot(row_id, table_id);
        let cache_offset = self.layout.cache_byte_offset(cache_slot);
        let rank = self.info.rank;

        let age = self.info.age();
        let meta = RowMetadata { age, row_id, table_id };
        let mut slot_bytes = vec![0u8; 24 + payload.len()];
        meta.encode_into(&mut slot_bytes[0..24]);
        slot_bytes[24..].copy_from_slice(payload);

        self.with_lock(Region::Cache, rank, cache_offset, true, || {
            self.transport
                .write_remote(Region::Cache, rank, cache_offset + self.layout.metadata_offset(), &slot_bytes)
        })?;

        tracing::trace!(rank, row_id, table_id, age, owner, "staged write in local cache");

        self.with_lock(Region::Cache, rank, cache_offset, false, || {
            self.with_lock(Region::Rows, owner, row_offset, true, || {
                self.transport.write_remote_notify(
                    Region::Rows,
                    owner,
                    row_offset + self.layout.metadata_offset(),
                    &slot_bytes,
                    NOTIFY_ROW_WRITTEN,
                )
            })
        })?;

        self.transport.queue_wait()
    }

    /// Polls the local cache, pulling a fresh copy from the owner until the
    /// freshness predicate holds (§4.5).
    pub fn read(&self, row_id: RowId, table_id: TableId, slack: Slack, out: &mut [u8]) -> Result<RowMetadata> {
        let age = self.info.age();
        if age == 0 {
            return Err(Error::NotInitialised);
        }
        self.validate_ids(row_id, table_id)?;
        if out.len() != self.info.config.row_size as usize {
            return Err(Error::InvalidArgument(format!(
                "output buffer is {} bytes, expected {}",
                out.len(),
                self.info.config.row_size
            )));
        }

        let min_age = compute_min_age(age, slack, self.info.config.offset_slack);
        let (owner, row_offset) = self.owner_and_offset(row_id, table_id);
        let cache_slot = self.cache_slot(row_id, table_id);
        let cache_offset = self.layout.cache_byte_offset(cache_slot);
        let rank = self.info.rank;
        let row_size = self.info.config.row_size as usize;

        let mut retries: u32 = 0;
        loop {
            let mut meta_buf = [0u8; 24];
            self.transport
                .read_remote(Region::Cache, rank, cache_offset + self.layout.metadata_offset(), &mut meta_buf)?;
            let meta = RowMetadata::decode(&meta_buf);
            if meta.matches(row_id, table_id) && meta.age >= min_age {
                break;
            }

            if let Some(max_retries) = self.info.config.max_read_retries {
                if retries >= max_retries {
                    return Err(Error::Timeout(retries));
                }
            }
            retries += 1;

            let mut pulled = vec![0u8; 24 + row_size];
            self.with_lock(Region::Cache, rank, cache_offset, true, || {
                self.with_lock(Region::Rows, owner, row_offset, false, || {
                    self.transport.read_remote(
                        Region::Rows,
                        owner,
                        row_offset + self.layout.metadata_offset(),
                        &mut pulled,
                    )
                })?;
                self.transport
                    .write_remote(Region::Cache, rank, cache_offset + self.layout.metadata_offset(), &pulled)?;
                self.transport.queue_wait()
            })?;
        }

        let mut result_meta = None;
        self.with_lock(Region::Cache, rank, cache_offset, false, || {
            let mut buf = vec![0u8; 24 + row_size];
            self.transport
                .read_remote(Region::Cache, rank, cache_offset + self.layout.metadata_offset(), &mut buf)?;
            let meta = RowMetadata::decode(&buf[0..24]);
            out.copy_from_slice(&buf[24..]);
            result_meta = Some(meta);
            Ok(())
        })?;

        let meta = result_meta.expect("copy-out always runs inside with_lock's closure");
        tracing::trace!(rank, row_id, table_id, age = meta.age, retries, "read satisfied");
        Ok(meta)
    }

    fn post_one_prefetch(&self, row_id: RowId, table_id: TableId, slack: Slack) -> Result<()> {
        let (owner, row_offset) = self.owner_and_offset(row_id, table_id);
        if owner == self.info.rank {
            return Ok(()); // Already authoritative here; nothing to request.
        }
        let min_age = compute_min_age(self.info.age(), slack, self.info.config.offset_slack);
        // Prefetch words are 32-bit, like the lock word (§9); ages beyond
        // u32::MAX saturate rather than wrap.
        let min_age_word = u32::try_from(min_age).unwrap_or(u32::MAX);
        let staged = self.info.stage_scratch(min_age_word);
        let word_offset = row_offset + self.layout.prefetch_word_offset(self.info.rank);
        self.transport.write_remote(Region::Rows, owner, word_offset, &staged)
    }

    /// Posts a minimum-age prefetch request for each `(row, table)` pair
    /// (§4.6).
    pub fn prefetch(&self, rows: &[RowId], tables: &[TableId], slack: Slack) -> Result<()> {
        if self.info.age() == 0 {
            return Err(Error::NotInitialised);
        }
        if rows.len() != tables.len() {
            return Err(Error::InvalidArgument(
                "row_vec and table_vec must have equal length".into(),
            ));
        }
        for (&row_id, &table_id) in rows.iter().zip(tables) {
            self.validate_ids(row_id, table_id)?;
            self.post_one_prefetch(row_id, table_id, slack)?;
        }
        self.transport.queue_wait()
    }

    /// Posts a prefetch request for every `(table, row)` pair (§4.6).
    pub fn prefetch_all(&self, slack: Slack) -> Result<()> {
        if self.info.age() == 0 {
            return Err(Error::NotInitialised);
        }
        let c = &self.info.config;
        for table_id in 0..c.table_amount {
            for row_id in 0..c.table_size {
                self.post_one_prefetch(row_id, table_id, slack)?;
            }
        }
        self.transport.queue_wait()
    }

    /// Scans this peer's own authoritative rows for satisfied prefetch
    /// requests and pushes them into the requester's cache (§4.7).
    pub fn fulfill_prefetches(&self) -> Result<()> {
        if !self.transport.notify_test_reset(NOTIFY_ROW_WRITTEN)? {
            return Ok(()); // No writes since the last sweep.
        }

        let c = &self.info.config;
        let total_rows = c.total_rows();
        let local_rows = placement::authoritative_row_count(self.info.rank, total_rows, c.block_size, self.info.peer_count);
        let row_size = c.row_size as usize;

        for local_offset in 0..local_rows {
            let row_offset = self.layout.row_byte_offset(local_offset);

            for requester in 0..self.info.peer_count {
                let word_offset = row_offset + self.layout.prefetch_word_offset(requester);
                let min_age = atomic_read_and_clear(&self.transport, Region::Rows, self.info.rank, word_offset)? as Age;
                if min_age == 0 {
                    continue; // No outstanding request from this requester.
                }

                let mut row_bytes = vec![0u8; 24 + row_size];
                self.with_lock(Region::Rows, self.info.rank, row_offset, false, || {
                    self.transport.read_remote(
                        Region::Rows,
                        self.info.rank,
                        row_offset + self.layout.metadata_offset(),
                        &mut row_bytes,
                    )
                })?;
                let meta = RowMetadata::decode(&row_bytes[0..24]);

                if meta.age < min_age {
                    // Dropped: the requester will re-issue on its next stale read (§4.7, §7).
                    continue;
                }

                let dest_slot = {
                    let hash = c.cache_hash.hash(meta.row_id, meta.table_id, c.table_size, c.table_amount);
                    cache_index::slot_index(hash, c.cache_size)
                };
                let dest_offset = self.layout.cache_byte_offset(dest_slot);

                self.with_lock(Region::Rows, self.info.rank, row_offset, false, || {
                    self.with_lock(Region::Cache, requester, dest_offset, true, || {
                        self.transport.write_remote(
                            Region::Cache,
                            requester,
                            dest_offset + self.layout.metadata_offset(),
                            &row_bytes,
                        )
                    })
                })?;

                tracing::trace!(
                    owner = self.info.rank,
                    requester,
                    row_id = meta.row_id,
                    table_id = meta.table_id,
                    age = meta.age,
                    "fulfilled prefetch"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    #[quickcheck]
    fn qc_min_age_is_monotonically_non_increasing_in_slack(current: u64, slack_a: u8, slack_b: u8) -> bool {
        let current = current % 1000;
        let slack_a = (slack_a % 50) as u64;
        let slack_b = (slack_b % 50) as u64;
        let (lo, hi) = if slack_a <= slack_b { (slack_a, slack_b) } else { (slack_b, slack_a) };
        compute_min_age(current, lo, true) >= compute_min_age(current, hi, true)
    }

    #[quickcheck]
    fn qc_min_age_never_exceeds_current(current: u64, slack: u8, offset_slack: bool) -> bool {
        let current = current % 1000;
        let slack = (slack % 50) as u64;
        compute_min_age(current, slack, offset_slack) <= current.max(1)
    }

    #[test]
    fn min_age_matches_worked_examples() {
        // §4.9 and the literal scenarios in spec.md §8.
        assert_eq!(compute_min_age(1, 0, true), 1);
        assert_eq!(compute_min_age(5, 0, false), 5);
        assert_eq!(compute_min_age(7, 1, true), 5);
        assert_eq!(compute_min_age(8, 1, true), 6);
        assert_eq!(compute_min_age(4, 2, true), 1);
    }

    #[test]
    fn min_age_floor_is_one() {
        for current in 0..5 {
            assert_eq!(compute_min_age(current, 10, true), 1);
        }
    }
}
