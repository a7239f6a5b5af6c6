//! The transport seam (§1, §5, §9): the one-sided communication substrate
//! is an external collaborator, out of scope to implement for real, but its
//! interface to the core is fully specified here. [`local`] ships the one
//! concrete implementation this crate owns: an in-process simulation of
//! several cooperating peers, used by tests.

use crate::error::Result;
use crate::Rank;

pub mod local;

/// One of the two remote-addressable memory regions a peer exposes.
/// The Info region (§2) is never remote-addressed — only the owning peer
/// touches it — so it has no `Region` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Rows,
    Cache,
}

/// Level-triggered notification meaning "new rows may have appeared on me
/// since last sweep" (§4.4, §4.7). Non-addressed: the value is
/// arbitrary-but-nonzero.
pub const NOTIFY_ROW_WRITTEN: u32 = 1;

/// The one-sided communication substrate's interface to the core.
///
/// Every method is synchronous from the caller's point of view: a write
/// returns once it is published to the local queue, a read returns once its
/// data has arrived. [`Transport::queue_wait`] drains outstanding
/// operations so staging buffers can be safely reused (§5).
pub trait Transport: Send + Sync {
    fn rank(&self) -> Rank;
    fn peer_count(&self) -> u32;

    /// (Re)sizes `region` on this peer to `bytes`, zero-initialised. Called
    /// once per region during `initialise` (§4.8).
    fn allocate(&self, region: Region, bytes: usize) -> Result<()>;

    /// Reads `out.len()` bytes from `src_rank`'s `region` at `offset`.
    fn read_remote(&self, region: Region, src_rank: Rank, offset: usize, out: &mut [u8]) -> Result<()>;

    /// Writes `data` into `dst_rank`'s `region` at `offset`.
    fn write_remote(&self, region: Region, dst_rank: Rank, offset: usize, data: &[u8]) -> Result<()>;

    /// Writes `data` into `dst_rank`'s `region` at `offset`, then raises
    /// `notify_id` as a level-triggered flag on that rank (§4.4).
    fn write_remote_notify(
        &self,
        region: Region,
        dst_rank: Rank,
        offset: usize,
        data: &[u8],
        notify_id: u32,
    ) -> Result<()>;

    /// Atomic compare-and-swap over the 32-bit word at `(region, rank,
    /// offset)`. Returns the value observed before the swap; the caller
    /// compares it against `expect` to learn whether the swap took effect.
    fn compare_and_swap(&self, region: Region, rank: Rank, offset: usize, expect: u32, new: u32) -> Result<u32>;

    /// Atomic fetch-and-add over the 32-bit word at `(region, rank,
    /// offset)`. Returns the value observed before the add.
    fn fetch_add(&self, region: Region, rank: Rank, offset: usize, delta: i32) -> Result<u32>;

    /// Drains this peer's local queue of outstanding one-sided operations.
    fn queue_wait(&self) -> Result<()>;

    /// Non-blocking test of `notify_id` on this peer; clears it if set.
    fn notify_test_reset(&self, notify_id: u32) -> Result<bool>;

    /// Collective barrier across all peers.
    fn barrier(&self) -> Result<()>;
}

/// Atomically reads-and-clears the word at `(region, rank, offset)`,
/// implemented as a CAS-retry loop over the two primitives transports
/// actually expose (§9: the source's non-atomic load/test/zero sequence is
/// replaced here by a single atomic swap built from `compare_and_swap`).
pub fn atomic_read_and_clear(t: &dyn Transport, region: Region, rank: Rank, offset: usize) -> Result<u32> {
    let mut buf = [0u8; 4];
    t.read_remote(region, rank, offset, &mut buf)?;
    let mut current = u32::from_le_bytes(buf);
    loop {
        if current == 0 {
            return Ok(0);
        }
        let observed = t.compare_and_swap(region, rank, offset, current, 0)?;
        if observed == current {
            return Ok(observed);
        }
        current = observed;
    }
}
