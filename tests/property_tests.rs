//! Property-based tests for codex-store
//!
//! - Unlock idempotence and dirty accounting in the cache
//! - Player isolation
//! - Backend round-trip of arbitrary unlock sets
//! - Entry key parse/display agreement

use std::collections::BTreeSet;

use codex_store::cache::ProgressCache;
use codex_store::progress::{now_millis, PlayerKey, PlayerProgress, UnlockRecord};
use codex_store::registry::EntryKey;
use codex_store::storage::{JsonFileBackend, MemoryBackend, ProgressBackend};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn arb_namespace() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_.-]{0,11}"
}

fn arb_id() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9_./-]{0,15}"
}

fn arb_key() -> impl Strategy<Value = EntryKey> {
    (arb_namespace(), arb_id()).prop_map(|(ns, id)| EntryKey::new(ns, id).unwrap())
}

fn arb_keys(max: usize) -> impl Strategy<Value = Vec<EntryKey>> {
    proptest::collection::vec(arb_key(), 0..max)
}

fn arb_progress() -> impl Strategy<Value = PlayerProgress> {
    proptest::collection::btree_map(
        arb_key(),
        (0i64..4_000_000_000_000, proptest::option::of(0i64..1_000_000)),
        0..24,
    )
    .prop_map(|records| {
        let records: Vec<_> = records
            .into_iter()
            .map(|(key, (first, replay))| {
                let first_unlocked_at = chrono::DateTime::from_timestamp_millis(first).unwrap();
                let last_replayed_at = replay.map(|delta| {
                    chrono::DateTime::from_timestamp_millis(first + delta).unwrap()
                });
                (
                    key,
                    UnlockRecord {
                        first_unlocked_at,
                        last_replayed_at,
                    },
                )
            })
            .collect();
        PlayerProgress::from_records(records, now_millis())
    })
}

fn key_set(progress: &PlayerProgress) -> BTreeSet<String> {
    progress.keys().map(ToString::to_string).collect()
}

fn resident(cache: &mut ProgressCache) -> PlayerKey {
    let player = PlayerKey::new_random();
    cache.begin_load(player);
    cache.install(player, PlayerProgress::new()).unwrap();
    player
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the dirty version counts distinct new unlocks only
    #[test]
    fn prop_unlock_idempotent(keys in arb_keys(32)) {
        let mut cache = ProgressCache::new();
        let player = resident(&mut cache);

        let mut newly = 0u64;
        for key in keys.iter().chain(keys.iter()) {
            if cache.unlock(player, key, now_millis()).unwrap().is_new() {
                newly += 1;
            }
        }

        let distinct: BTreeSet<_> = keys.iter().map(ToString::to_string).collect();
        prop_assert_eq!(newly, distinct.len() as u64);
        prop_assert_eq!(cache.get(player).unwrap().len(), distinct.len());
        prop_assert_eq!(
            cache.marker(player).map(|m| m.version()).unwrap_or_default(),
            distinct.len() as u64
        );
    }

    /// Property: unlocking for one player never changes another
    #[test]
    fn prop_players_isolated(a in arb_keys(16), b in arb_keys(16)) {
        let mut cache = ProgressCache::new();
        let p1 = resident(&mut cache);
        let p2 = resident(&mut cache);

        for key in &a {
            cache.unlock(p1, key, now_millis()).unwrap();
        }
        for key in &b {
            cache.unlock(p2, key, now_millis()).unwrap();
        }

        let expect_a: BTreeSet<_> = a.iter().map(ToString::to_string).collect();
        let expect_b: BTreeSet<_> = b.iter().map(ToString::to_string).collect();
        prop_assert_eq!(key_set(cache.get(p1).unwrap()), expect_a);
        prop_assert_eq!(key_set(cache.get(p2).unwrap()), expect_b);
    }

    /// Property: acknowledging an older version never cleans a newer change
    #[test]
    fn prop_ack_never_skips_changes(keys in arb_keys(16), extra in arb_key()) {
        let mut cache = ProgressCache::new();
        let player = resident(&mut cache);
        for key in &keys {
            cache.unlock(player, key, now_millis()).unwrap();
        }
        let snapshot = cache.dirty_snapshot(player);
        let changed = cache.unlock(player, &extra, now_millis()).unwrap().is_new();

        if let Some(snapshot) = snapshot {
            cache.acknowledge(player, snapshot.version);
        }
        prop_assert_eq!(cache.is_dirty(player), changed);
    }

    /// Property: entry keys survive display -> parse
    #[test]
    fn prop_key_display_parse(key in arb_key()) {
        let parsed = EntryKey::parse(&key.to_string()).unwrap();
        prop_assert_eq!(parsed, key);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: memory and JSON backends return exactly what was saved
    #[test]
    fn prop_backend_roundtrip(progress in arb_progress()) {
        let player = PlayerKey::new_random();
        let dir = tempfile::tempdir().unwrap();
        let json = JsonFileBackend::open(dir.path()).unwrap();
        let memory = MemoryBackend::new();

        let (from_json, from_memory) = block_on(async {
            json.save_progress(player, &progress).await.unwrap();
            memory.save_progress(player, &progress).await.unwrap();
            (
                json.load_progress(player).await.unwrap().unwrap(),
                memory.load_progress(player).await.unwrap().unwrap(),
            )
        });

        prop_assert_eq!(&from_json, &progress);
        prop_assert_eq!(&from_memory, &progress);
    }
}

#[cfg(feature = "sqlite")]
proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Property: SQLite rows round-trip the unlock set with timestamps
    #[test]
    fn prop_sqlite_roundtrip(progress in arb_progress()) {
        use codex_store::storage::{PoolConfig, SqliteBackend};

        prop_assume!(!progress.is_empty());
        let player = PlayerKey::new_random();
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(dir.path().join("p.db"), PoolConfig::default()).unwrap();

        let loaded = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
            .block_on(async {
                backend.save_progress(player, &progress).await.unwrap();
                backend.load_progress(player).await.unwrap().unwrap()
            });

        prop_assert_eq!(key_set(&loaded), key_set(&progress));
        for (key, record) in progress.records() {
            prop_assert_eq!(loaded.record(key), Some(record));
        }
    }
}
