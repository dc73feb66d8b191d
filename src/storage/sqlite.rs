//! SQLite progress backend.
//!
//! One row per (player, namespace, entry). A save rewrites the player's
//! rows inside a single immediate transaction, so readers see either the
//! previous unlock set or the new one.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use tracing::{debug, warn};

use super::pool::ConnectionPool;
use super::{BatchResult, ProgressBackend};
use crate::config::PoolConfig;
use crate::progress::{PlayerKey, PlayerProgress, UnlockRecord};
use crate::registry::EntryKey;
use crate::{Error, Result};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS codex_unlocks (
    player_uuid       TEXT    NOT NULL,
    namespace         TEXT    NOT NULL,
    entry_id          TEXT    NOT NULL,
    first_unlocked_at INTEGER NOT NULL,
    last_replayed_at  INTEGER,
    PRIMARY KEY (player_uuid, namespace, entry_id)
);
CREATE INDEX IF NOT EXISTS idx_codex_unlocks_player
    ON codex_unlocks (player_uuid);
CREATE INDEX IF NOT EXISTS idx_codex_unlocks_player_namespace
    ON codex_unlocks (player_uuid, namespace);
";

/// Pooled SQLite backend.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: ConnectionPool,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `path` and its schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory, the pool, or the schema
    /// cannot be created.
    pub fn open<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::open(path, config)?;
        pool.try_acquire()?.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "SQLite schema ready");

        Ok(Self { pool })
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl ProgressBackend for SqliteBackend {
    async fn load_progress(&self, player: PlayerKey) -> Result<Option<PlayerProgress>> {
        self.pool
            .with_connection(move |conn| read_player(conn, player))
            .await
    }

    async fn save_progress(&self, player: PlayerKey, progress: &PlayerProgress) -> Result<()> {
        let progress = progress.clone();
        self.pool
            .with_connection(move |conn| write_player(conn, player, &progress))
            .await
    }

    async fn delete_progress(&self, player: PlayerKey) -> Result<()> {
        self.pool
            .with_connection(move |conn| {
                conn.execute(
                    "DELETE FROM codex_unlocks WHERE player_uuid = ?1",
                    params![player.to_string()],
                )?;
                Ok(())
            })
            .await
    }

    async fn save_batch(&self, batch: Vec<(PlayerKey, PlayerProgress)>) -> BatchResult {
        let players: Vec<PlayerKey> = batch.iter().map(|(player, _)| *player).collect();
        let outcome = self
            .pool
            .with_connection(move |conn| {
                Ok(batch
                    .into_iter()
                    .map(|(player, progress)| (player, write_player(conn, player, &progress)))
                    .collect::<BatchResult>())
            })
            .await;

        match outcome {
            Ok(results) => results,
            // Could not even get a connection: every item failed the same way
            Err(e) => {
                warn!(error = %e, size = players.len(), "Batch save could not start");
                players
                    .into_iter()
                    .map(|player| {
                        let err = match &e {
                            Error::PoolTimeout(ms) => Error::PoolTimeout(*ms),
                            other => Error::Storage(other.to_string()),
                        };
                        (player, Err(err))
                    })
                    .collect()
            }
        }
    }
}

fn read_player(conn: &Connection, player: PlayerKey) -> Result<Option<PlayerProgress>> {
    let mut stmt = conn.prepare_cached(
        "SELECT namespace, entry_id, first_unlocked_at, last_replayed_at
         FROM codex_unlocks WHERE player_uuid = ?1",
    )?;
    let rows = stmt.query_map(params![player.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, Option<i64>>(3)?,
        ))
    })?;

    let mut records = Vec::new();
    let mut last_modified: Option<DateTime<Utc>> = None;
    for row in rows {
        let (namespace, id, first, replayed) = row?;
        let key = EntryKey::new(namespace, id)
            .map_err(|e| Error::Storage(format!("corrupt row for player {player}: {e}")))?;
        let record = UnlockRecord {
            first_unlocked_at: from_millis(first)?,
            last_replayed_at: replayed.map(from_millis).transpose()?,
        };
        let touched = record.last_replayed_at.unwrap_or(record.first_unlocked_at);
        last_modified = Some(last_modified.map_or(touched, |lm| lm.max(touched)));
        records.push((key, record));
    }

    Ok(last_modified.map(|lm| PlayerProgress::from_records(records, lm)))
}

fn write_player(conn: &mut Connection, player: PlayerKey, progress: &PlayerProgress) -> Result<()> {
    let uuid = player.to_string();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "DELETE FROM codex_unlocks WHERE player_uuid = ?1",
        params![uuid],
    )?;
    {
        let mut insert = tx.prepare_cached(
            "INSERT INTO codex_unlocks
                 (player_uuid, namespace, entry_id, first_unlocked_at, last_replayed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (key, record) in progress.records() {
            insert.execute(params![
                uuid,
                key.namespace(),
                key.id(),
                record.first_unlocked_at.timestamp_millis(),
                record.last_replayed_at.map(|at| at.timestamp_millis()),
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Storage(format!("timestamp out of range: {millis}")))
}
