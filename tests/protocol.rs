//! End-to-end scenarios exercising a simulated multi-peer cluster, mirroring
//! the literal worked examples used to validate the write/read/prefetch
//! protocol.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ssp_cache::{CacheHash, CachingOptions, InitOptions, LocalCluster, ShardingOptions, Store};

const TABLE_AMOUNT: u64 = 3;
const TABLE_SIZE: u64 = 4;
const ROW_SIZE: u64 = 8;
const BLOCK_SIZE: u64 = 4;
const CACHE_SIZE: u64 = 12;

fn scenario_opts() -> InitOptions {
    InitOptions {
        table_amount: TABLE_AMOUNT,
        table_size: TABLE_SIZE,
        row_size: ROW_SIZE,
        sharding: ShardingOptions { block_size: BLOCK_SIZE },
        caching: CachingOptions {
            hash: CacheHash::RowMajor,
            size: CACHE_SIZE,
        },
        offset_slack_default_true: Some(true),
        ..Default::default()
    }
}

fn build_cluster(peer_count: u32) -> Vec<Store<ssp_cache::LocalTransport>> {
    let cluster = LocalCluster::new(peer_count);
    (0..peer_count)
        .map(|rank| Store::initialise(cluster.peer(rank), scenario_opts()).unwrap())
        .collect()
}

/// Installs a test-scoped `tracing` subscriber so the `trace!`/`debug!`
/// calls in the write/read/prefetch paths are actually exercised, rather
/// than just declared.
fn init_tracing() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{filter::LevelFilter, util::SubscriberInitExt as _};
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(LevelFilter::TRACE)
        .with_writer(std::io::stderr)
        .set_default()
}

#[test]
fn self_write_visibility() {
    let _guard = init_tracing();
    let peers = build_cluster(3);
    peers[0].clock().unwrap();

    let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
    peers[0].write(0, 0, &payload).unwrap();

    let mut out = [0u8; 8];
    let meta = peers[0].read(0, 0, 0, &mut out).unwrap();
    assert_eq!(out, payload);
    assert_eq!(meta.age, 1);
}

#[test]
fn cross_peer_stale_read_within_slack() {
    let peers = build_cluster(3);
    for _ in 0..5 {
        peers[0].clock().unwrap();
    }
    let x = [9u8; 8];
    peers[0].write(0, 0, &x).unwrap();

    for _ in 0..7 {
        peers[1].clock().unwrap();
    }
    let mut out = [0u8; 8];
    let meta = peers[1].read(0, 0, 1, &mut out).unwrap();
    assert_eq!(meta.age, 5);
    assert_eq!(out, x);
}

#[test]
fn cross_peer_blocked_until_fresh_enough() {
    let cluster = LocalCluster::new(3);
    let capped_opts = InitOptions {
        max_read_retries: Some(3),
        ..scenario_opts()
    };
    let writer = Store::initialise(cluster.peer(0), scenario_opts()).unwrap();
    let reader = Store::initialise(cluster.peer(1), capped_opts).unwrap();

    for _ in 0..5 {
        writer.clock().unwrap();
    }
    writer.write(0, 0, &[9u8; 8]).unwrap();

    for _ in 0..8 {
        reader.clock().unwrap();
    }

    // min_age = 8 - 1 - 1 = 6, but peer 0's current write is only age 5: a
    // bounded read must time out rather than spin forever.
    let mut out = [0u8; 8];
    let err = reader.read(0, 0, 1, &mut out).unwrap_err();
    assert!(matches!(err, ssp_cache::Error::Timeout(_)));

    // Once peer 0 advances far enough, the same reader is satisfied.
    for _ in 0..3 {
        writer.clock().unwrap();
    }
    writer.write(0, 0, &[7u8; 8]).unwrap();
    let meta = reader.read(0, 0, 1, &mut out).unwrap();
    assert!(meta.age >= 6);
    assert_eq!(out, [7u8; 8]);
}

#[test]
fn prefetch_fulfillment_pushes_row_into_requesters_cache() {
    let _guard = init_tracing();
    let peers = build_cluster(3);
    for _ in 0..3 {
        peers[0].clock().unwrap();
    }
    peers[0].write(0, 0, &[3u8; 8]).unwrap();

    for _ in 0..4 {
        peers[2].clock().unwrap();
    }
    // min_age = 4 - 2 - 1 = 1.
    peers[2].prefetch(&[0], &[0], 2).unwrap();

    peers[0].fulfill_prefetches().unwrap();

    // The fulfilled row is now cached locally; a slack=0 read must not spin.
    let mut out = [0u8; 8];
    let meta = peers[2].read(0, 0, 0, &mut out).unwrap();
    assert_eq!(meta.age, 3);
    assert_eq!(out, [3u8; 8]);
}

#[test]
fn prefetch_dropped_when_understale_is_silently_cleared() {
    let peers = build_cluster(3);
    for _ in 0..3 {
        peers[0].clock().unwrap();
    }
    peers[0].write(0, 0, &[5u8; 8]).unwrap();

    for _ in 0..11 {
        peers[2].clock().unwrap();
    }
    // min_age = 11 - 0 - 1 = 10, well past peer 0's stored age of 3.
    peers[2].prefetch(&[0], &[0], 0).unwrap();
    peers[0].fulfill_prefetches().unwrap();

    // The request word was consumed regardless of being dropped; a second
    // sweep must find nothing outstanding and do no further work.
    peers[0].fulfill_prefetches().unwrap();
}

#[test]
fn placement_law_worked_example_through_the_public_api() {
    assert_eq!(
        ssp_cache::place(ssp_cache::global_index(1, 3, 4), 2, 3),
        (0, 3)
    );
}

#[test]
fn repeated_write_without_clock_keeps_age_last_writer_wins() {
    let peers = build_cluster(1);
    peers[0].clock().unwrap();
    peers[0].write(0, 0, &[1u8; 8]).unwrap();
    peers[0].write(0, 0, &[2u8; 8]).unwrap();

    let mut out = [0u8; 8];
    let meta = peers[0].read(0, 0, 0, &mut out).unwrap();
    assert_eq!(meta.age, 1);
    assert_eq!(out, [2u8; 8]);
}

#[test]
fn prefetch_all_populates_every_row_a_peer_does_not_own() {
    // block_size == table_size: each whole table is owned by one rank,
    // table_id % 3. Table 2 is owned by peer 2 itself.
    let peers = build_cluster(3);
    for peer in &peers {
        peer.clock().unwrap();
        peer.clock().unwrap();
        peer.clock().unwrap();
    }
    for table in 0..TABLE_AMOUNT {
        for row in 0..TABLE_SIZE {
            let (owner, _) =
                ssp_cache::place(ssp_cache::global_index(table, row, TABLE_SIZE), BLOCK_SIZE, 3);
            peers[owner as usize].write(row, table, &[owner as u8; 8]).unwrap();
        }
    }

    // A generous slack keeps the age-3 writes above min_age without needing
    // peer 2 to advance further.
    let slack = 1;
    peers[2].prefetch_all(slack).unwrap();
    peers[0].fulfill_prefetches().unwrap();
    peers[1].fulfill_prefetches().unwrap();

    let mut out = [0u8; 8];
    for table in 0..TABLE_AMOUNT {
        for row in 0..TABLE_SIZE {
            let (owner, _) =
                ssp_cache::place(ssp_cache::global_index(table, row, TABLE_SIZE), BLOCK_SIZE, 3);
            if owner == 2 {
                continue;
            }
            let meta = peers[2].read(row, table, slack, &mut out).unwrap();
            assert_eq!(out, [owner as u8; 8]);
            assert_eq!(meta.row_id, row);
            assert_eq!(meta.table_id, table);
        }
    }
}

#[test]
fn random_self_writes_always_round_trip() {
    let peers = build_cluster(1);
    peers[0].clock().unwrap();

    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    for _ in 0..64 {
        let table = rng.gen_range(0..TABLE_AMOUNT);
        let row = rng.gen_range(0..TABLE_SIZE);
        let mut payload = [0u8; ROW_SIZE as usize];
        rng.fill(&mut payload);

        peers[0].write(row, table, &payload).unwrap();
        let mut out = [0u8; ROW_SIZE as usize];
        peers[0].read(row, table, 0, &mut out).unwrap();
        assert_eq!(out, payload);
    }
}
