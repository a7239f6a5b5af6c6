//! The per-row reader/writer lock, encoded as a single atomic word
//! co-located with every slot (§4.3). High bit is the writer flag; the
//! remaining bits are the reader count.

use crate::error::Result;
use crate::transport::{Region, Transport};
use crate::Rank;

/// High bit of the lock word: a writer currently holds the slot.
pub const WRITER_BIT: u32 = 1 << 31;
/// Mask over the reader-count bits.
pub const READER_MASK: u32 = WRITER_BIT - 1;
/// Largest reader count the word can represent.
pub const READER_MAX: u32 = READER_MASK;

static_assertions::const_assert_eq!(WRITER_BIT | READER_MASK, u32::MAX);
static_assertions::const_assert_eq!(WRITER_BIT & READER_MASK, 0);

pub fn is_write_locked(word: u32) -> bool {
    word & WRITER_BIT != 0
}

pub fn reader_count(word: u32) -> u32 {
    word & READER_MASK
}

/// Checks that `max_threads * peer_count` readers can never overflow the
/// reader-count bits. Violating this must be reported at configuration
/// time, per §4.3 and §4.8.
pub fn check_reader_overflow(max_threads: u32, peer_count: u32) -> Result<()> {
    let total = (max_threads as u64).saturating_mul(peer_count as u64);
    if total > READER_MAX as u64 {
        return Err(crate::Error::ResourceOverflow {
            max_threads,
            peer_count,
            max: READER_MAX,
        });
    }
    Ok(())
}

/// Acquires the read lock on the word at `(region, rank, offset)`, per the
/// three-step algorithm in §4.3. Retries are bounded only by the condition
/// (CAS success), never by an iteration cap.
pub fn acquire_read(t: &dyn Transport, region: Region, rank: Rank, offset: usize) -> Result<()> {
    loop {
        let observed = t.compare_and_swap(region, rank, offset, 0, 1)?;
        if observed == 0 {
            return Ok(()); // CAS(0 -> 1) succeeded: acquired as the first reader.
        }
        if is_write_locked(observed) {
            continue; // A writer holds it; retry the CAS.
        }
        let fetched = t.fetch_add(region, rank, offset, 1)?;
        if is_write_locked(fetched) {
            // A writer raced in between fetch_add's read and our observation.
            // Undo our increment and retry from the top.
            t.fetch_add(region, rank, offset, -1)?;
            continue;
        }
        return Ok(());
    }
}

pub fn release_read(t: &dyn Transport, region: Region, rank: Rank, offset: usize) -> Result<()> {
    t.fetch_add(region, rank, offset, -1)?;
    Ok(())
}

/// Acquires the write lock, retrying the CAS while the word is nonzero.
pub fn acquire_write(t: &dyn Transport, region: Region, rank: Rank, offset: usize) -> Result<()> {
    loop {
        let observed = t.compare_and_swap(region, rank, offset, 0, WRITER_BIT)?;
        if observed == 0 {
            return Ok(());
        }
    }
}

/// Releases the write lock. Per §4.3 this is not a local store: the word
/// lives on the owner, so it is a remote write followed by a queue drain to
/// serialise against the next operation that reuses the slot.
pub fn release_write(t: &dyn Transport, region: Region, rank: Rank, offset: usize) -> Result<()> {
    t.write_remote(region, rank, offset, &0u32.to_le_bytes())?;
    t.queue_wait()
}
