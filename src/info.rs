//! The info region (§2, §3): per-peer scalar state, backing
//! [`crate::Store::get_info`]. Modeled as a peer-local owned record reached
//! through a handle rather than a raw shared pointer (§9) — nothing here is
//! remote-addressable; only the owning peer ever touches it.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::config::Config;
use crate::Rank;

/// Per-peer scalar state: rank, peer count, current age, table geometry,
/// and the local scratch word used as the source of inline remote writes
/// (e.g. the minimum-age value staged before a prefetch request, §4.6 step
/// 3). Only the owning peer ever writes `scratch`; remote peers only ever
/// read the copy already committed to their own rows region, so there is no
/// race to guard here despite the word being mutated outside a lock.
#[derive(Debug)]
pub struct PeerInfo {
    pub rank: Rank,
    pub peer_count: u32,
    age: AtomicU64,
    max_threads: AtomicU32,
    scratch: AtomicU32,
    pub config: Config,
}

impl PeerInfo {
    pub(crate) fn new(rank: Rank, peer_count: u32, config: Config) -> Self {
        PeerInfo {
            rank,
            peer_count,
            age: AtomicU64::new(0),
            max_threads: AtomicU32::new(1),
            scratch: AtomicU32::new(0),
            config,
        }
    }

    /// The current age. Never decreases.
    pub fn age(&self) -> u64 {
        self.age.load(Ordering::SeqCst)
    }

    pub(crate) fn tick(&self) -> u64 {
        self.age.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn max_threads(&self) -> u32 {
        self.max_threads.load(Ordering::SeqCst)
    }

    pub(crate) fn set_max_threads(&self, value: u32) {
        self.max_threads.store(value, Ordering::SeqCst);
    }

    /// Stages `value` into the scratch word and returns the bytes to send as
    /// a remote write (§4.6 step 3). The word itself is never
    /// remote-addressed; only its value is shipped out.
    pub(crate) fn stage_scratch(&self, value: u32) -> [u8; 4] {
        self.scratch.store(value, Ordering::SeqCst);
        value.to_le_bytes()
    }
}
