//! Player progress records
//!
//! [`PlayerProgress`] is the unit the cache holds and the storage backends
//! persist: the set of unlocked entry keys for one player, each with its
//! unlock (and last replay) timestamp.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::EntryKey;
use crate::{Error, Result};

/// Current time truncated to millisecond precision, the resolution every
/// backend persists.
#[must_use]
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Stable player identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerKey(Uuid);

impl PlayerKey {
    /// Wrap a UUID.
    #[must_use]
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Random key (tests, tooling).
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PlayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for PlayerKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::Config(format!("invalid player uuid '{s}': {e}")))
    }
}

impl From<Uuid> for PlayerKey {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Timestamps kept for one unlocked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRecord {
    /// When the entry was first unlocked
    pub first_unlocked_at: DateTime<Utc>,
    /// When the entry was last replayed, if ever
    pub last_replayed_at: Option<DateTime<Utc>>,
}

impl UnlockRecord {
    /// Record for a fresh unlock at `at`.
    #[must_use]
    pub const fn at(at: DateTime<Utc>) -> Self {
        Self {
            first_unlocked_at: at,
            last_replayed_at: None,
        }
    }
}

/// Unlock state of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProgress {
    unlocked: HashMap<EntryKey, UnlockRecord>,
    last_modified: DateTime<Utc>,
}

impl PlayerProgress {
    /// No unlocks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            unlocked: HashMap::new(),
            last_modified: now_millis(),
        }
    }

    /// Rebuild from stored records.
    #[must_use]
    pub fn from_records(
        records: impl IntoIterator<Item = (EntryKey, UnlockRecord)>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            unlocked: records.into_iter().collect(),
            last_modified,
        }
    }

    /// O(1) membership check.
    #[must_use]
    pub fn is_unlocked(&self, key: &EntryKey) -> bool {
        self.unlocked.contains_key(key)
    }

    /// Record for an unlocked entry.
    #[must_use]
    pub fn record(&self, key: &EntryKey) -> Option<&UnlockRecord> {
        self.unlocked.get(key)
    }

    /// Iterate unlocked keys with their records (arbitrary order).
    pub fn records(&self) -> impl Iterator<Item = (&EntryKey, &UnlockRecord)> {
        self.unlocked.iter()
    }

    /// Iterate unlocked keys (arbitrary order).
    pub fn keys(&self) -> impl Iterator<Item = &EntryKey> {
        self.unlocked.keys()
    }

    /// Unlocked keys in one namespace (arbitrary order).
    pub fn keys_in<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a EntryKey> + 'a {
        self.unlocked
            .keys()
            .filter(move |key| key.namespace() == namespace)
    }

    /// Number of unlocked entries (orphans included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.unlocked.len()
    }

    /// True if nothing is unlocked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unlocked.is_empty()
    }

    /// Last time the set changed.
    #[must_use]
    pub const fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Add `key`; returns `false` (and changes nothing) if already present.
    pub(crate) fn insert(&mut self, key: EntryKey, at: DateTime<Utc>) -> bool {
        if self.unlocked.contains_key(&key) {
            return false;
        }
        self.unlocked.insert(key, UnlockRecord::at(at));
        self.last_modified = at;
        true
    }

    /// Stamp a replay on an unlocked entry; returns `false` if locked.
    pub(crate) fn mark_replay(&mut self, key: &EntryKey, at: DateTime<Utc>) -> bool {
        match self.unlocked.get_mut(key) {
            Some(record) => {
                record.last_replayed_at = Some(at);
                self.last_modified = at;
                true
            }
            None => false,
        }
    }

    /// Remove everything; returns how many entries were dropped.
    pub(crate) fn clear(&mut self, at: DateTime<Utc>) -> usize {
        let removed = self.unlocked.len();
        if removed > 0 {
            self.unlocked.clear();
            self.last_modified = at;
        }
        removed
    }
}

impl Default for PlayerProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// A single unlock transition, surfaced to the caller when applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockEvent {
    /// Player who unlocked the entry
    pub player: PlayerKey,
    /// Entry that was unlocked
    pub entry: EntryKey,
    /// When it happened
    pub at: DateTime<Utc>,
}

/// Outcome of an unlock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockResult {
    /// The entry was already unlocked; nothing changed
    AlreadyUnlocked,
    /// The entry is now unlocked
    NewlyUnlocked(UnlockEvent),
}

impl UnlockResult {
    /// True for [`UnlockResult::NewlyUnlocked`].
    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::NewlyUnlocked(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> EntryKey {
        EntryKey::parse(raw).unwrap()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut progress = PlayerProgress::new();
        let now = Utc::now();
        assert!(progress.insert(key("notes:a"), now));
        assert!(!progress.insert(key("notes:a"), now));
        assert_eq!(progress.len(), 1);
        assert_eq!(progress.record(&key("notes:a")).unwrap().first_unlocked_at, now);
    }

    #[test]
    fn test_mark_replay_requires_unlock() {
        let mut progress = PlayerProgress::new();
        let now = Utc::now();
        assert!(!progress.mark_replay(&key("notes:a"), now));

        progress.insert(key("notes:a"), now);
        assert!(progress.mark_replay(&key("notes:a"), now));
        assert_eq!(
            progress.record(&key("notes:a")).unwrap().last_replayed_at,
            Some(now)
        );
    }

    #[test]
    fn test_keys_in_namespace() {
        let mut progress = PlayerProgress::new();
        let now = Utc::now();
        progress.insert(key("notes:a"), now);
        progress.insert(key("notes:b"), now);
        progress.insert(key("relics:bell"), now);
        assert_eq!(progress.keys_in("notes").count(), 2);
        assert_eq!(progress.keys_in("relics").count(), 1);
        assert_eq!(progress.keys_in("maps").count(), 0);
    }

    #[test]
    fn test_clear_reports_removed() {
        let mut progress = PlayerProgress::new();
        let now = Utc::now();
        assert_eq!(progress.clear(now), 0);
        progress.insert(key("notes:a"), now);
        assert_eq!(progress.clear(now), 1);
        assert!(progress.is_empty());
    }

    #[test]
    fn test_player_key_parse_display() {
        let raw = "0f8fad5b-d9cb-469f-a165-70867728950e";
        let player: PlayerKey = raw.parse().unwrap();
        assert_eq!(player.to_string(), raw);
        assert!("not-a-uuid".parse::<PlayerKey>().is_err());
    }
}
