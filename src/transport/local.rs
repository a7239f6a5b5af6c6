//! An in-process simulation of several cooperating peers, standing in for
//! the real one-sided substrate in tests. Modeled after the teacher's
//! `BitswapRequestManager` (`node/forest_libp2p/bitswap/src/request_manager.rs`):
//! `parking_lot` locks guard shared, per-peer state instead of an actual
//! network round-trip.
//!
//! Every region byte buffer is protected by a single `parking_lot::Mutex`,
//! including the four bytes that represent the slot's lock word — the
//! atomic primitives below are implemented as short critical sections over
//! that mutex rather than true lock-free atomics. Observable behavior is
//! identical to a real implementation; only the underlying mechanism
//! differs, which is an acceptable simplification for a transport whose
//! entire purpose is to make the core's protocol testable in one process.

use std::sync::Arc;

use ahash::HashSet;
use parking_lot::Mutex;

use super::{Region, Transport};
use crate::error::{Error, Result};
use crate::Rank;

struct PeerMemory {
    rows: Mutex<Vec<u8>>,
    cache: Mutex<Vec<u8>>,
    notifications: Mutex<HashSet<u32>>,
}

impl PeerMemory {
    fn new() -> Self {
        PeerMemory {
            rows: Mutex::new(Vec::new()),
            cache: Mutex::new(Vec::new()),
            notifications: Mutex::new(HashSet::default()),
        }
    }

    fn buffer(&self, region: Region) -> &Mutex<Vec<u8>> {
        match region {
            Region::Rows => &self.rows,
            Region::Cache => &self.cache,
        }
    }
}

/// The shared simulated cluster. Construct once, then hand out one
/// [`LocalTransport`] handle per rank with [`LocalCluster::peer`].
pub struct LocalCluster {
    peers: Vec<PeerMemory>,
}

impl LocalCluster {
    pub fn new(peer_count: u32) -> Arc<Self> {
        assert!(peer_count > 0, "a cluster needs at least one peer");
        Arc::new(LocalCluster {
            peers: (0..peer_count).map(|_| PeerMemory::new()).collect(),
        })
    }

    pub fn peer_count(&self) -> u32 {
        self.peers.len() as u32
    }

    pub fn peer(self: &Arc<Self>, rank: Rank) -> LocalTransport {
        assert!((rank as usize) < self.peers.len());
        LocalTransport {
            cluster: self.clone(),
            rank,
        }
    }
}

/// A handle into a [`LocalCluster`] for one simulated peer.
#[derive(Clone)]
pub struct LocalTransport {
    cluster: Arc<LocalCluster>,
    rank: Rank,
}

fn bounds_check(buf: &[u8], offset: usize, len: usize) -> Result<()> {
    let in_bounds = match offset.checked_add(len) {
        Some(end) => end <= buf.len(),
        None => false,
    };
    if !in_bounds {
        return Err(Error::Transport(format!(
            "out-of-bounds access at offset {offset}, len {len}, region size {}",
            buf.len()
        )));
    }
    Ok(())
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn peer_count(&self) -> u32 {
        self.cluster.peer_count()
    }

    fn allocate(&self, region: Region, bytes: usize) -> Result<()> {
        let peer = &self.cluster.peers[self.rank as usize];
        let mut buf = peer.buffer(region).lock();
        buf.clear();
        buf.resize(bytes, 0);
        Ok(())
    }

    fn read_remote(&self, region: Region, src_rank: Rank, offset: usize, out: &mut [u8]) -> Result<()> {
        let peer = &self.cluster.peers[src_rank as usize];
        let buf = peer.buffer(region).lock();
        bounds_check(&buf, offset, out.len())?;
        out.copy_from_slice(&buf[offset..offset + out.len()]);
        Ok(())
    }

    fn write_remote(&self, region: Region, dst_rank: Rank, offset: usize, data: &[u8]) -> Result<()> {
        let peer = &self.cluster.peers[dst_rank as usize];
        let mut buf = peer.buffer(region).lock();
        bounds_check(&buf, offset, data.len())?;
        buf[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn write_remote_notify(
        &self,
        region: Region,
        dst_rank: Rank,
        offset: usize,
        data: &[u8],
        notify_id: u32,
    ) -> Result<()> {
        self.write_remote(region, dst_rank, offset, data)?;
        let peer = &self.cluster.peers[dst_rank as usize];
        peer.notifications.lock().insert(notify_id);
        Ok(())
    }

    fn compare_and_swap(&self, region: Region, rank: Rank, offset: usize, expect: u32, new: u32) -> Result<u32> {
        let peer = &self.cluster.peers[rank as usize];
        let mut buf = peer.buffer(region).lock();
        bounds_check(&buf, offset, 4)?;
        let current = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        if current == expect {
            buf[offset..offset + 4].copy_from_slice(&new.to_le_bytes());
        }
        Ok(current)
    }

    fn fetch_add(&self, region: Region, rank: Rank, offset: usize, delta: i32) -> Result<u32> {
        let peer = &self.cluster.peers[rank as usize];
        let mut buf = peer.buffer(region).lock();
        bounds_check(&buf, offset, 4)?;
        let current = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        let updated = (current as i64 + delta as i64) as u32;
        buf[offset..offset + 4].copy_from_slice(&updated.to_le_bytes());
        Ok(current)
    }

    fn queue_wait(&self) -> Result<()> {
        // All operations above complete synchronously under their mutex;
        // there is no outstanding work to drain in this simulation.
        Ok(())
    }

    fn notify_test_reset(&self, notify_id: u32) -> Result<bool> {
        let peer = &self.cluster.peers[self.rank as usize];
        Ok(peer.notifications.lock().remove(&notify_id))
    }

    fn barrier(&self) -> Result<()> {
        // The simulated peers share a process and execute cooperatively;
        // there is no asynchronous rendezvous to perform.
        Ok(())
    }
}
