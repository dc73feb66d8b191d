//! Command and placeholder adapters driven against a live store

use std::sync::Arc;
use std::time::Duration;

use codex_store::command::{CodexCommand, CommandReply};
use codex_store::config::FlushConfig;
use codex_store::diagnostics::DiagnosticChannel;
use codex_store::placeholder::CodexPlaceholders;
use codex_store::progress::PlayerKey;
use codex_store::registry::{CategoryDefinition, EntryDefinition, Registry, RegistryHandle};
use codex_store::storage::MemoryBackend;
use codex_store::ProgressStore;

const WAIT: Duration = Duration::from_secs(5);

fn store() -> ProgressStore<MemoryBackend> {
    let registry = Registry::load(vec![
        CategoryDefinition::new("notes")
            .with_entry(EntryDefinition::new("first_page"))
            .with_entry(EntryDefinition::new("second_page"))
            .with_entry(EntryDefinition::new("third_page")),
        CategoryDefinition::new("relics").with_entry(EntryDefinition {
            allow_replay: true,
            ..EntryDefinition::new("bell")
        }),
    ])
    .unwrap();
    ProgressStore::new(
        Arc::new(RegistryHandle::new(registry)),
        MemoryBackend::new(),
        FlushConfig {
            interval_ms: 60_000,
            ..FlushConfig::default()
        },
        DiagnosticChannel::new(),
    )
    .unwrap()
}

fn online(store: &mut ProgressStore<MemoryBackend>) -> PlayerKey {
    let player = PlayerKey::new_random();
    store.on_player_connect(player);
    assert!(store.settle(WAIT));
    player
}

fn run(store: &mut ProgressStore<MemoryBackend>, line: &str) -> CommandReply {
    let args: Vec<&str> = line.split_whitespace().collect();
    CodexCommand::run(&args, store)
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_unlock_then_status_and_list() {
    let mut store = store();
    let player = online(&mut store);

    let reply = run(&mut store, &format!("unlock {player} notes:first_page"));
    assert!(reply.success);
    assert_eq!(reply.lines, vec![format!("Unlocked notes:first_page for {player}")]);

    let again = run(&mut store, &format!("unlock {player} notes:first_page"));
    assert!(again.success);
    assert!(again.lines[0].contains("already has"));

    let status = run(&mut store, &format!("status {player}"));
    assert!(status.success);
    assert_eq!(status.lines[0], format!("Codex for {player}: 1/4 (25%)"));
    assert!(status.lines.contains(&"  notes: 1/3 (33%)".to_string()));
    assert!(status.lines.contains(&"  relics: 0/1 (0%)".to_string()));
    assert_eq!(status.lines.last().unwrap(), "  persistence: pending save");

    let list = run(&mut store, &format!("list {player} notes"));
    assert!(list.success);
    assert_eq!(list.lines.len(), 2);
    assert!(list.lines[1].starts_with("  notes:first_page - "));
}

#[test]
fn test_flush_reports_and_clears_dirty() {
    let mut store = store();
    let player = online(&mut store);
    run(&mut store, &format!("unlock {player} notes:second_page"));

    let reply = run(&mut store, "flush");
    assert!(reply.success);
    assert_eq!(reply.lines, vec!["Flush requested for 1 dirty player(s)".to_string()]);
    assert!(store.settle(WAIT));
    assert!(!store.is_dirty(player));

    let status = run(&mut store, &format!("status {player} notes"));
    assert_eq!(status.lines, vec![
        "  notes: 1/3 (33%)".to_string(),
        "  persistence: saved".to_string(),
    ]);
}

#[test]
fn test_replay_rules() {
    let mut store = store();
    let player = online(&mut store);

    let locked = run(&mut store, &format!("replay {player} relics:bell"));
    assert!(!locked.success);
    assert_eq!(locked.lines, vec!["Entry relics:bell is not unlocked".to_string()]);

    run(&mut store, &format!("unlock {player} relics:bell"));
    assert!(run(&mut store, &format!("replay {player} relics:bell")).success);

    run(&mut store, &format!("unlock {player} notes:first_page"));
    let refused = run(&mut store, &format!("replay {player} notes:first_page"));
    assert!(!refused.success);
    assert!(refused.lines[0].contains("cannot be replayed"));
}

#[test]
fn test_reset_and_unknown_entry() {
    let mut store = store();
    let player = online(&mut store);
    run(&mut store, &format!("unlock {player} notes:first_page"));
    run(&mut store, &format!("unlock {player} relics:bell"));

    let unknown = run(&mut store, &format!("unlock {player} notes:missing"));
    assert!(!unknown.success);
    assert_eq!(unknown.lines, vec!["Unknown entry: notes:missing".to_string()]);

    let reset = run(&mut store, &format!("reset {player}"));
    assert!(reset.success);
    assert_eq!(reset.lines, vec![format!("Reset 2 unlock(s) for {player}")]);

    let list = run(&mut store, &format!("list {player}"));
    assert_eq!(list.lines, vec![format!("{player} has no unlocks")]);
}

#[test]
fn test_offline_and_loading_players() {
    let mut store = store();
    let offline = PlayerKey::new_random();
    let reply = run(&mut store, &format!("status {offline}"));
    assert!(!reply.success);
    assert_eq!(reply.lines, vec![format!("{offline} is not online")]);

    let loading = PlayerKey::new_random();
    store.on_player_connect(loading);
    let reply = run(&mut store, &format!("unlock {loading} notes:first_page"));
    assert!(!reply.success);
    assert!(reply.lines[0].contains("still loading"));
    let reply = run(&mut store, &format!("status {loading}"));
    assert!(reply.lines[0].contains("still loading"));

    let unknown_category = {
        let player = online(&mut store);
        run(&mut store, &format!("status {player} maps"))
    };
    assert_eq!(unknown_category.lines, vec!["Unknown category 'maps'".to_string()]);
}

#[test]
fn test_parse_failures_show_usage() {
    let mut store = store();
    let reply = run(&mut store, "teleport");
    assert!(!reply.success);
    assert_eq!(reply.lines[0], "Unknown sub-command 'teleport'");
    assert_eq!(reply.lines.len(), 1 + codex_store::command::USAGE.len());

    let reply = run(&mut store, "reset");
    assert_eq!(reply.lines, vec!["Usage: codex reset <player-uuid>".to_string()]);
}

#[test]
fn test_reload_swaps_catalog_from_configured_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("maps.yml"),
        "namespace: maps\nentries:\n  north: {}\n  south: {}\n",
    )
    .unwrap();
    let mut store = store().with_catalog_dir(dir.path());

    let reply = run(&mut store, "reload");
    assert!(reply.success);
    assert_eq!(reply.lines, vec!["Reloaded catalog: 2 entries in 1 categories".to_string()]);
    assert!(store.registry().category("maps").is_some());
    assert!(store.registry().category("notes").is_none());
}

#[test]
fn test_reload_failure_keeps_current_catalog() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad.yml"), "namespace: \"Not Valid\"\n").unwrap();
    let mut store = store();
    let before = store.registry();

    let reply = run(&mut store, &format!("reload {}", dir.path().display()));
    assert!(!reply.success);
    assert!(reply.lines[0].starts_with("Catalog reload failed, keeping the current catalog"));
    assert!(Arc::ptr_eq(&before, &store.registry()));

    // No configured directory
    let reply = run(&mut store, "reload");
    assert!(!reply.success);
    assert!(reply.lines[0].contains("no catalog directory configured"));
    assert_eq!(store.registry().len(), 4);
}

// ============================================================================
// Placeholders
// ============================================================================

#[test]
fn test_placeholders_for_ready_player() {
    let mut store = store();
    let player = online(&mut store);
    store
        .unlock(player, &"notes:first_page".parse().unwrap())
        .unwrap();
    let placeholders = CodexPlaceholders::default();

    let resolve = |params: &str| placeholders.resolve(&store, player, params);
    assert_eq!(resolve("unlocked_notes:first_page").as_deref(), Some("true"));
    assert_eq!(resolve("unlocked_notes:second_page").as_deref(), Some("false"));
    assert_eq!(resolve("count_notes").as_deref(), Some("1"));
    assert_eq!(resolve("total_notes").as_deref(), Some("3"));
    assert_eq!(resolve("percent_notes").as_deref(), Some("33"));
    assert_eq!(resolve("count").as_deref(), Some("1"));
    assert_eq!(resolve("total").as_deref(), Some("4"));
    assert_eq!(resolve("percent").as_deref(), Some("25"));
}

#[test]
fn test_placeholders_unknown_params() {
    let mut store = store();
    let player = online(&mut store);
    let placeholders = CodexPlaceholders::default();

    for params in [
        "unlocked_notes:missing",
        "unlocked_not a key",
        "count_maps",
        "percent_maps",
        "total_maps",
        "something_else",
    ] {
        assert_eq!(placeholders.resolve(&store, player, params), None, "{params}");
    }
}

#[test]
fn test_placeholders_loading_and_offline() {
    let mut store = store();
    let placeholders = CodexPlaceholders::new("...");

    let loading = PlayerKey::new_random();
    store.on_player_connect(loading);
    assert_eq!(
        placeholders.resolve(&store, loading, "count_notes").as_deref(),
        Some("...")
    );
    assert_eq!(
        placeholders
            .resolve(&store, loading, "unlocked_notes:first_page")
            .as_deref(),
        Some("...")
    );
    // Catalog-only values do not need the player
    assert_eq!(
        placeholders.resolve(&store, loading, "total").as_deref(),
        Some("4")
    );

    let offline = PlayerKey::new_random();
    assert_eq!(placeholders.resolve(&store, offline, "percent"), None);
}
