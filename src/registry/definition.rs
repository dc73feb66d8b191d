//! Catalog definitions as read from configuration
//!
//! One YAML file declares one category:
//!
//! ```yaml
//! namespace: notes
//! display_name: "Lost Notes"
//! show_when_locked: true
//! entries:
//!   mysterious_note:
//!     display_name: "<gold>Mysterious Note"
//!     unlock_condition: "region:old_library"
//!     allow_replay: true
//!   torn_page:
//!     display_name: "Torn Page"
//! ```
//!
//! Entry order in the `entries` mapping is the order menus render.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const fn default_true() -> bool {
    true
}

/// Parsed definition of one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDefinition {
    /// Namespace shared by the category's entry keys
    pub namespace: String,
    /// Human readable name (defaults to the namespace)
    pub display_name: Option<String>,
    /// Disabled categories are skipped at load
    pub enabled: bool,
    /// Default for entries that do not set `show_when_locked`
    pub show_when_locked: bool,
    /// Entries in declaration order
    pub entries: Vec<EntryDefinition>,
}

impl CategoryDefinition {
    /// Empty, enabled category.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            display_name: None,
            enabled: true,
            show_when_locked: true,
            entries: Vec::new(),
        }
    }

    /// Append an entry definition.
    #[must_use]
    pub fn with_entry(mut self, entry: EntryDefinition) -> Self {
        self.entries.push(entry);
        self
    }

    /// Parse a category from YAML text.
    ///
    /// # Errors
    ///
    /// Returns a YAML error for malformed documents and [`Error::Config`]
    /// when an entry id is not a string.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: CategoryFile = serde_yaml::from_str(text)?;

        let mut entries = Vec::with_capacity(file.entries.len());
        for (id, body) in file.entries {
            let id = id.as_str().map(str::to_string).ok_or_else(|| {
                Error::Config(format!(
                    "category '{}': entry ids must be strings, got {id:?}",
                    file.namespace
                ))
            })?;
            let body: EntryBody = if body.is_null() {
                EntryBody::default()
            } else {
                serde_yaml::from_value(body)?
            };
            entries.push(body.into_definition(id));
        }

        Ok(Self {
            namespace: file.namespace,
            display_name: file.display_name,
            enabled: file.enabled,
            show_when_locked: file.show_when_locked,
            entries,
        })
    }
}

/// Parsed definition of one entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryDefinition {
    /// Id within the category namespace
    pub id: String,
    /// Display name (defaults to the id)
    pub display_name: Option<String>,
    /// Category label override
    pub category: Option<String>,
    /// Opaque unlock predicate reference
    pub unlock_condition: Option<String>,
    /// Overrides the category default when set
    pub show_when_locked: Option<bool>,
    /// Whether the entry can be replayed once unlocked
    pub allow_replay: bool,
    /// Icon identifier
    pub icon: Option<String>,
    /// Lore lines
    pub lore: Vec<String>,
    /// Renderer-specific extras
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EntryDefinition {
    /// Definition with only an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

#[derive(Deserialize)]
struct CategoryFile {
    namespace: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_true")]
    show_when_locked: bool,
    #[serde(default)]
    entries: serde_yaml::Mapping,
}

#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EntryBody {
    display_name: Option<String>,
    category: Option<String>,
    unlock_condition: Option<String>,
    show_when_locked: Option<bool>,
    allow_replay: bool,
    icon: Option<String>,
    lore: Vec<String>,
    extra: BTreeMap<String, serde_json::Value>,
}

impl EntryBody {
    fn into_definition(self, id: String) -> EntryDefinition {
        EntryDefinition {
            id,
            display_name: self.display_name,
            category: self.category,
            unlock_condition: self.unlock_condition,
            show_when_locked: self.show_when_locked,
            allow_replay: self.allow_replay,
            icon: self.icon,
            lore: self.lore,
            extra: self.extra,
        }
    }
}
