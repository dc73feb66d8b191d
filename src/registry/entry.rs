//! Entry and Category - immutable catalog records

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::EntryKey;

/// Display metadata for an entry.
///
/// Opaque to the store: menus and placeholder templates read it, the
/// progress store only carries it along.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    /// Display name (may contain markup understood by the renderer)
    pub name: String,
    /// Icon identifier (e.g. an item material)
    pub icon: Option<String>,
    /// Lore / description lines
    pub lore: Vec<String>,
    /// Free-form renderer-specific values
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One collectable definition in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    key: EntryKey,
    category: String,
    display: DisplayMetadata,
    unlock_condition: Option<String>,
    show_when_locked: bool,
    allow_replay: bool,
}

impl Entry {
    /// Create an entry in `key`'s namespace category with default flags.
    #[must_use]
    pub fn new(key: EntryKey, display: DisplayMetadata) -> Self {
        Self {
            category: key.namespace().to_string(),
            key,
            display,
            unlock_condition: None,
            show_when_locked: true,
            allow_replay: false,
        }
    }

    /// Builder for optional fields.
    #[must_use]
    pub fn builder(key: EntryKey) -> EntryBuilder {
        EntryBuilder::new(key)
    }

    /// Stable key.
    #[must_use]
    pub const fn key(&self) -> &EntryKey {
        &self.key
    }

    /// Category label (defaults to the namespace).
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Display metadata.
    #[must_use]
    pub const fn display(&self) -> &DisplayMetadata {
        &self.display
    }

    /// Opaque reference to the gameplay predicate that unlocks this entry.
    #[must_use]
    pub fn unlock_condition(&self) -> Option<&str> {
        self.unlock_condition.as_deref()
    }

    /// Whether menus list the entry before it is unlocked.
    #[must_use]
    pub const fn show_when_locked(&self) -> bool {
        self.show_when_locked
    }

    /// Whether an unlocked entry may be triggered again.
    #[must_use]
    pub const fn allow_replay(&self) -> bool {
        self.allow_replay
    }
}

/// Builder for [`Entry`].
#[derive(Debug)]
pub struct EntryBuilder {
    entry: Entry,
}

impl EntryBuilder {
    /// Start from defaults for `key`.
    #[must_use]
    pub fn new(key: EntryKey) -> Self {
        Self {
            entry: Entry::new(key, DisplayMetadata::default()),
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.entry.display.name = name.into();
        self
    }

    /// Replace all display metadata.
    #[must_use]
    pub fn display(mut self, display: DisplayMetadata) -> Self {
        self.entry.display = display;
        self
    }

    /// Override the category label.
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.entry.category = category.into();
        self
    }

    /// Set the unlock predicate reference.
    #[must_use]
    pub fn unlock_condition(mut self, condition: impl Into<String>) -> Self {
        self.entry.unlock_condition = Some(condition.into());
        self
    }

    /// Set `show_when_locked`.
    #[must_use]
    pub const fn show_when_locked(mut self, show: bool) -> Self {
        self.entry.show_when_locked = show;
        self
    }

    /// Set `allow_replay`.
    #[must_use]
    pub const fn allow_replay(mut self, allow: bool) -> Self {
        self.entry.allow_replay = allow;
        self
    }

    /// Build the entry.
    #[must_use]
    pub fn build(self) -> Entry {
        self.entry
    }
}

/// A category (repository) of entries sharing a namespace.
#[derive(Debug, Clone)]
pub struct Category {
    pub(super) namespace: String,
    pub(super) display_name: String,
    pub(super) show_when_locked: bool,
    pub(super) entries: Vec<Arc<Entry>>,
}

impl Category {
    /// Namespace shared by every entry key in the category.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Human readable name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Category-level default for locked entries.
    #[must_use]
    pub const fn show_when_locked(&self) -> bool {
        self.show_when_locked
    }

    /// Entries in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[Arc<Entry>] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the category declares no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_defaults() {
        let key = EntryKey::parse("notes:first").unwrap();
        let entry = Entry::new(key.clone(), DisplayMetadata::default());
        assert_eq!(entry.key(), &key);
        assert_eq!(entry.category(), "notes");
        assert!(entry.show_when_locked());
        assert!(!entry.allow_replay());
        assert_eq!(entry.unlock_condition(), None);
    }

    #[test]
    fn test_builder() {
        let entry = Entry::builder(EntryKey::parse("relics:bell").unwrap())
            .name("Old Bell")
            .category("tower")
            .unlock_condition("region:bell_tower")
            .allow_replay(true)
            .show_when_locked(false)
            .build();
        assert_eq!(entry.display().name, "Old Bell");
        assert_eq!(entry.category(), "tower");
        assert_eq!(entry.unlock_condition(), Some("region:bell_tower"));
        assert!(entry.allow_replay());
        assert!(!entry.show_when_locked());
    }
}
