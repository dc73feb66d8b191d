//! Entry Registry - the immutable catalog of collectable entries
//!
//! A [`Registry`] is built once from parsed [`CategoryDefinition`]s and never
//! mutated afterwards. Readers share it through a [`RegistryHandle`], which
//! swaps in a freshly built registry atomically on reload: a reader holding
//! a snapshot keeps seeing the old catalog in full, never a mix.
//!
//! ```rust
//! use codex_store::registry::{CategoryDefinition, EntryDefinition, EntryKey, Registry};
//!
//! let notes = CategoryDefinition::new("notes")
//!     .with_entry(EntryDefinition::new("first"))
//!     .with_entry(EntryDefinition::new("second"));
//! let registry = Registry::load(vec![notes])?;
//!
//! let key = EntryKey::parse("notes:second")?;
//! assert!(registry.get(&key).is_some());
//! assert_eq!(registry.len(), 2);
//! # Ok::<(), codex_store::Error>(())
//! ```

mod definition;
mod entry;
mod key;

pub use definition::{CategoryDefinition, EntryDefinition};
pub use entry::{Category, DisplayMetadata, Entry, EntryBuilder};
pub use key::EntryKey;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::{Error, Result};

/// Immutable catalog of entries, ordered by declaration.
#[derive(Debug, Default)]
pub struct Registry {
    categories: Vec<Category>,
    entries: Vec<Arc<Entry>>,
    by_key: HashMap<EntryKey, usize>,
    by_namespace: HashMap<String, usize>,
}

impl Registry {
    /// Empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a registry from parsed definitions.
    ///
    /// Disabled categories are skipped. Entry order is category order, then
    /// declaration order within each category.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] for malformed namespaces or ids and
    /// [`Error::DuplicateEntry`] when a namespace or key is declared twice.
    pub fn load(definitions: Vec<CategoryDefinition>) -> Result<Self> {
        let mut registry = Self::default();

        for def in definitions {
            if !def.enabled {
                info!(namespace = %def.namespace, "Skipping disabled category");
                continue;
            }
            if !key::valid_namespace(&def.namespace) {
                return Err(Error::InvalidKey(format!("{}:", def.namespace)));
            }
            if registry.by_namespace.contains_key(&def.namespace) {
                return Err(Error::DuplicateEntry(format!(
                    "namespace '{}' declared more than once",
                    def.namespace
                )));
            }

            let mut entries = Vec::with_capacity(def.entries.len());
            for entry_def in def.entries {
                let key = EntryKey::new(def.namespace.as_str(), entry_def.id.as_str())?;
                if registry.by_key.contains_key(&key) {
                    return Err(Error::DuplicateEntry(key.to_string()));
                }

                let entry = Arc::new(build_entry(key.clone(), entry_def, def.show_when_locked));
                registry.by_key.insert(key, registry.entries.len());
                registry.entries.push(Arc::clone(&entry));
                entries.push(entry);
            }

            registry
                .by_namespace
                .insert(def.namespace.clone(), registry.categories.len());
            registry.categories.push(Category {
                display_name: def.display_name.unwrap_or_else(|| def.namespace.clone()),
                namespace: def.namespace,
                show_when_locked: def.show_when_locked,
                entries,
            });
        }

        Ok(registry)
    }

    /// Load every `*.yml` / `*.yaml` file in `dir`, in file-name order.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be read, a YAML error for
    /// a malformed file, or any error from [`Registry::load`].
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files = Vec::new();
        for dirent in std::fs::read_dir(dir)? {
            let path = dirent?.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            if path.is_file() && is_yaml {
                files.push(path);
            }
        }
        files.sort();

        let mut definitions = Vec::with_capacity(files.len());
        for path in &files {
            let text = std::fs::read_to_string(path)?;
            let def = CategoryDefinition::from_yaml(&text).map_err(|e| {
                Error::Config(format!("{}: {e}", path.display()))
            })?;
            definitions.push(def);
        }

        let registry = Self::load(definitions)?;
        info!(
            dir = %dir.display(),
            categories = registry.categories.len(),
            entries = registry.entries.len(),
            "Loaded codex catalog"
        );
        Ok(registry)
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, key: &EntryKey) -> Option<&Arc<Entry>> {
        self.by_key.get(key).map(|&idx| &self.entries[idx])
    }

    /// True if `key` is in the catalog.
    #[must_use]
    pub fn contains(&self, key: &EntryKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// All entries in declaration order.
    #[must_use]
    pub fn all(&self) -> &[Arc<Entry>] {
        &self.entries
    }

    /// Look up a category by namespace.
    #[must_use]
    pub fn category(&self, namespace: &str) -> Option<&Category> {
        self.by_namespace
            .get(namespace)
            .map(|&idx| &self.categories[idx])
    }

    /// All categories in declaration order.
    #[must_use]
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the catalog has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build_entry(key: EntryKey, def: EntryDefinition, category_show: bool) -> Entry {
    let display = DisplayMetadata {
        name: def.display_name.unwrap_or_else(|| def.id.clone()),
        icon: def.icon,
        lore: def.lore,
        extra: def.extra,
    };
    let mut builder = Entry::builder(key)
        .display(display)
        .show_when_locked(def.show_when_locked.unwrap_or(category_show))
        .allow_replay(def.allow_replay);
    if let Some(category) = def.category {
        builder = builder.category(category);
    }
    if let Some(condition) = def.unlock_condition {
        builder = builder.unlock_condition(condition);
    }
    builder.build()
}

/// Shared, atomically swappable reference to the current [`Registry`].
pub struct RegistryHandle {
    current: ArcSwap<Registry>,
}

impl RegistryHandle {
    /// Wrap an initial registry.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            current: ArcSwap::from_pointee(registry),
        }
    }

    /// Snapshot of the current registry.
    ///
    /// The snapshot stays valid (and unchanged) across later swaps.
    #[must_use]
    pub fn load(&self) -> Arc<Registry> {
        self.current.load_full()
    }

    /// Replace the registry, returning the previous one.
    pub fn swap(&self, registry: Registry) -> Arc<Registry> {
        self.current.swap(Arc::new(registry))
    }

    /// Rebuild from a catalog directory and swap it in.
    ///
    /// On failure the current registry stays in place.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Registry::load_dir`].
    pub fn reload_from_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Arc<Registry>> {
        match Registry::load_dir(dir) {
            Ok(registry) => {
                self.swap(registry);
                Ok(self.load())
            }
            Err(e) => {
                warn!(error = %e, "Catalog reload failed, keeping previous registry");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.load();
        f.debug_struct("RegistryHandle")
            .field("entries", &current.len())
            .field("categories", &current.categories().len())
            .finish()
    }
}
