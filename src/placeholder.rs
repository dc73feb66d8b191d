//! Placeholder templating and codex placeholder expansion.
//!
//! [`PlaceholderService`] fills `{token}` templates from per-call locals
//! and registered global resolvers. [`CodexPlaceholders`] answers the
//! `unlocked_*` / `count_*` / `total_*` / `percent_*` lookups an external
//! placeholder integration forwards to the codex.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use regex::Regex;

use crate::config::PlaceholderConfig;
use crate::progress::PlayerKey;
use crate::registry::{Category, Entry, EntryKey};
use crate::storage::ProgressBackend;
use crate::store::ProgressStore;
use crate::Error;

/// Global token resolver; receives the player the template is rendered for.
pub type Resolver = Arc<dyn Fn(Option<PlayerKey>) -> String + Send + Sync>;

/// `{token}` template substitution.
///
/// Locals are applied first, then globals in registration order. Safe to
/// share between threads: rendering takes a read lock, registration a write
/// lock.
#[derive(Default)]
pub struct PlaceholderService {
    globals: RwLock<Vec<(String, Resolver)>>,
}

impl std::fmt::Debug for PlaceholderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaceholderService")
            .field("registered", &self.registered())
            .finish()
    }
}

impl PlaceholderService {
    /// Service with no globals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the resolver for `{key}`.
    pub fn register_dynamic<F>(&self, key: impl Into<String>, resolver: F)
    where
        F: Fn(Option<PlayerKey>) -> String + Send + Sync + 'static,
    {
        let key = key.into();
        let resolver: Resolver = Arc::new(resolver);
        let mut globals = self.globals.write().unwrap_or_else(PoisonError::into_inner);
        match globals.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = resolver,
            None => globals.push((key, resolver)),
        }
    }

    /// Remove the resolver for `{key}`, if any.
    pub fn unregister_dynamic(&self, key: &str) {
        self.globals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(k, _)| k != key);
    }

    /// Registered global keys, in registration order.
    #[must_use]
    pub fn registered(&self) -> Vec<String> {
        self.globals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Render `template`. Unknown tokens are left in place.
    #[must_use]
    pub fn apply(
        &self,
        template: &str,
        player: Option<PlayerKey>,
        locals: &HashMap<String, String>,
    ) -> String {
        let mut out = template.to_string();
        for (key, value) in locals {
            out = out.replace(&format!("{{{key}}}"), value);
        }

        let globals = self.globals.read().unwrap_or_else(PoisonError::into_inner);
        for (key, resolver) in globals.iter() {
            let token = format!("{{{key}}}");
            if out.contains(&token) {
                out = out.replace(&token, &resolver(player));
            }
        }
        out
    }
}

/// Display text with `<tag>` markup removed.
#[must_use]
pub fn plain_text(formatted: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"</?[a-zA-Z#!_:][^<>]*>").unwrap_or_else(|_| unreachable!()))
        .replace_all(formatted, "")
        .into_owned()
}

/// Standard tags for rendering templates about one entry.
#[must_use]
pub fn entry_tags(player: PlayerKey, entry: &Entry) -> HashMap<String, String> {
    let key = entry.key();
    let name = &entry.display().name;
    HashMap::from([
        ("namespace".to_string(), key.namespace().to_string()),
        ("repo_namespace".to_string(), key.namespace().to_string()),
        ("id".to_string(), key.id().to_string()),
        ("key".to_string(), key.to_string()),
        ("collectable_display".to_string(), name.clone()),
        ("collectable_name_formatted".to_string(), name.clone()),
        ("collectable_name_plain".to_string(), plain_text(name)),
        ("category".to_string(), entry.category().to_string()),
        ("allow_replay".to_string(), entry.allow_replay().to_string()),
        ("show_when_locked".to_string(), entry.show_when_locked().to_string()),
        ("player".to_string(), player.to_string()),
        ("uuid".to_string(), player.to_string()),
    ])
}

/// Add the owning category's display tags to `tags`.
pub fn append_category_tags(tags: &mut HashMap<String, String>, category: &Category) {
    tags.insert("repo_name_formatted".to_string(), category.display_name().to_string());
    tags.insert("repo_name_plain".to_string(), plain_text(category.display_name()));
}

/// Resolver for codex placeholder parameters.
#[derive(Debug, Clone)]
pub struct CodexPlaceholders {
    loading_text: String,
}

impl Default for CodexPlaceholders {
    fn default() -> Self {
        Self::from_config(&PlaceholderConfig::default())
    }
}

impl CodexPlaceholders {
    /// Resolver answering `loading_text` while a player's progress loads.
    #[must_use]
    pub fn new(loading_text: impl Into<String>) -> Self {
        Self {
            loading_text: loading_text.into(),
        }
    }

    /// Resolver from the `placeholder` config section.
    #[must_use]
    pub fn from_config(config: &PlaceholderConfig) -> Self {
        Self::new(config.loading_text.clone())
    }

    /// Resolve one parameter:
    ///
    /// | param | value |
    /// |---|---|
    /// | `unlocked_<ns:id>` | `true` / `false` |
    /// | `count_<ns>` | unlocked entries in the category |
    /// | `total_<ns>` | entries in the category |
    /// | `percent_<ns>` | whole-number completion |
    /// | `count`, `total`, `percent` | same, over the whole catalog |
    ///
    /// Returns `None` for unknown parameters, unknown entries or
    /// namespaces, and offline players.
    #[must_use]
    pub fn resolve<B: ProgressBackend>(
        &self,
        store: &ProgressStore<B>,
        player: PlayerKey,
        params: &str,
    ) -> Option<String> {
        let registry = store.registry();

        if let Some(raw) = params.strip_prefix("unlocked_") {
            let key = EntryKey::parse(raw).ok()?;
            registry.get(&key)?;
            return self.player_value(store.is_unlocked(player, &key));
        }
        if let Some(namespace) = params.strip_prefix("total_") {
            return registry.category(namespace).map(|c| c.len().to_string());
        }
        if let Some(namespace) = params.strip_prefix("count_") {
            registry.category(namespace)?;
            return self.player_value(store.progress(player, namespace).map(|p| p.unlocked));
        }
        if let Some(namespace) = params.strip_prefix("percent_") {
            registry.category(namespace)?;
            return self.player_value(store.progress(player, namespace).map(|p| p.percent()));
        }

        match params {
            "total" => Some(registry.len().to_string()),
            "count" => self.player_value(store.overall_progress(player).map(|p| p.unlocked)),
            "percent" => self.player_value(store.overall_progress(player).map(|p| p.percent())),
            _ => None,
        }
    }

    fn player_value<T: ToString>(&self, value: crate::Result<T>) -> Option<String> {
        match value {
            Ok(v) => Some(v.to_string()),
            Err(Error::NotReady(_)) => Some(self.loading_text.clone()),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CategoryDefinition, EntryDefinition, EntryKey, Registry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_locals_then_globals() {
        let service = PlaceholderService::new();
        service.register_dynamic("server", |_| "Overworld".to_string());
        service.register_dynamic("name", |_| "global".to_string());

        let locals = HashMap::from([("name".to_string(), "local".to_string())]);
        let out = service.apply("{name} on {server} {missing}", None, &locals);
        assert_eq!(out, "local on Overworld {missing}");
    }

    #[test]
    fn test_register_replaces_and_unregister_removes() {
        let service = PlaceholderService::new();
        service.register_dynamic("a", |_| "1".to_string());
        service.register_dynamic("b", |_| "2".to_string());
        service.register_dynamic("a", |_| "3".to_string());
        assert_eq!(service.registered(), ["a", "b"]);
        assert_eq!(service.apply("{a}{b}", None, &HashMap::new()), "32");

        service.unregister_dynamic("a");
        assert_eq!(service.registered(), ["b"]);
        assert_eq!(service.apply("{a}{b}", None, &HashMap::new()), "{a}2");
    }

    #[test]
    fn test_unused_global_not_resolved() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = PlaceholderService::new();
        let counter = Arc::clone(&calls);
        service.register_dynamic("expensive", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            "x".to_string()
        });
        let _ = service.apply("nothing here", None, &HashMap::new());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_global_receives_player() {
        let service = PlaceholderService::new();
        service.register_dynamic("who", |p| p.map_or_else(|| "nobody".into(), |p| p.to_string()));
        let player = PlayerKey::new_random();
        assert_eq!(
            service.apply("{who}", Some(player), &HashMap::new()),
            player.to_string()
        );
        assert_eq!(service.apply("{who}", None, &HashMap::new()), "nobody");
    }

    #[test]
    fn test_plain_text_strips_markup() {
        assert_eq!(plain_text("<gold>Old <bold>Bell</bold>"), "Old Bell");
        assert_eq!(plain_text("a < b and c > d"), "a < b and c > d");
    }

    #[test]
    fn test_entry_and_category_tags() {
        let mut def = EntryDefinition::new("bell");
        def.display_name = Some("<gold>Old Bell".into());
        def.allow_replay = true;
        let mut category = CategoryDefinition::new("relics").with_entry(def);
        category.display_name = Some("<aqua>Relics".into());
        let registry = Registry::load(vec![category]).unwrap();

        let key = EntryKey::parse("relics:bell").unwrap();
        let player = PlayerKey::new_random();
        let mut tags = entry_tags(player, registry.get(&key).unwrap());
        append_category_tags(&mut tags, registry.category("relics").unwrap());

        assert_eq!(tags["key"], "relics:bell");
        assert_eq!(tags["id"], "bell");
        assert_eq!(tags["collectable_name_plain"], "Old Bell");
        assert_eq!(tags["allow_replay"], "true");
        assert_eq!(tags["repo_name_plain"], "Relics");
        assert_eq!(tags["player"], player.to_string());
    }
}
