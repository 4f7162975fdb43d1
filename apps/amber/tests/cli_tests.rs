//! Tests for the CLI commands against real redb files.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use amber::cli::{
    Cli, Commands, cmd_clear, cmd_delete, cmd_init, cmd_keys, cmd_status, namespace_overview,
    show_value,
};
use amber_core::{
    Class, RedbBackend, Store, StoreConfig, TimerQueue, TypeRegistry, Value,
};
use clap::Parser;
use std::path::Path;
use tempfile::tempdir;

/// Write a small saved game into `namespace` through a real store.
fn seed(path: &Path, namespace: &str) {
    let timers = TimerQueue::system();
    let class = Class::builder("Save")
        .field("level", 1)
        .field("started", Value::date_from_millis(0).unwrap())
        .build();
    let store = Store::open(
        RedbBackend::open(path).unwrap(),
        TypeRegistry::new(timers),
        &class,
        StoreConfig::with_namespace(namespace),
    )
    .unwrap();
    store.state().set("level", 3).unwrap();
}

// =============================================================================
// ARGUMENT PARSING TESTS
// =============================================================================

#[test]
fn test_parse_show_with_globals() {
    let cli = Cli::try_parse_from(["amber", "-D", "x.redb", "-n", "save1", "show", "state"])
        .unwrap();
    assert_eq!(cli.database, Path::new("x.redb"));
    assert_eq!(cli.resolve_namespace().unwrap(), "save1");
    match cli.command {
        Some(Commands::Show { key }) => assert_eq!(key.as_deref(), Some("state")),
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn test_namespace_from_config_file() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("amber.toml");
    std::fs::write(&config, "namespace = \"from-file\"\n").unwrap();

    let path = config.to_string_lossy().to_string();
    let cli = Cli::try_parse_from(["amber", "--config", path.as_str(), "keys"]).unwrap();
    assert_eq!(cli.resolve_namespace().unwrap(), "from-file");

    let cli =
        Cli::try_parse_from(["amber", "--config", path.as_str(), "-n", "flag", "keys"]).unwrap();
    assert_eq!(cli.resolve_namespace().unwrap(), "flag");
}

#[test]
fn test_default_namespace() {
    let cli = Cli::try_parse_from(["amber"]).unwrap();
    assert!(cli.command.is_none());
    assert_eq!(cli.resolve_namespace().unwrap(), "amber");
}

// =============================================================================
// COMMAND TESTS
// =============================================================================

#[test]
fn test_show_keeps_type_envelopes() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("game.redb");
    seed(&db, "slot1");

    let state = show_value(&db, "slot1", Some("state")).unwrap();
    assert_eq!(state["$type"], "Save");
    assert_eq!(state["$payload"]["level"], 3);
    assert_eq!(state["$payload"]["started"]["$type"], "Date");

    let whole = show_value(&db, "slot1", None).unwrap();
    assert!(whole.get("state").is_some());
    assert!(show_value(&db, "slot1", Some("missing")).is_err());
}

#[test]
fn test_overview_lists_namespaces() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("game.redb");
    seed(&db, "slot1");
    seed(&db, "slot2");

    let overview = namespace_overview(&db).unwrap();
    assert_eq!(overview["slot1"], serde_json::json!(["state"]));
    assert_eq!(overview["slot2"], serde_json::json!(["state"]));
}

#[test]
fn test_delete_and_clear() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("game.redb");
    seed(&db, "slot1");
    seed(&db, "slot2");

    cmd_delete(&db, "slot1", "state", true).unwrap();
    assert_eq!(show_value(&db, "slot1", None).unwrap(), serde_json::json!({}));

    cmd_clear(&db, "slot2", true).unwrap();
    let overview = namespace_overview(&db).unwrap();
    assert!(overview.get("slot2").is_none());
}

#[test]
fn test_init_refuses_existing_without_force() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("game.redb");
    seed(&db, "slot1");

    assert!(cmd_init(&db, false).is_err());
    cmd_init(&db, true).unwrap();
    assert_eq!(namespace_overview(&db).unwrap(), serde_json::json!({}));
}

#[test]
fn test_missing_database_is_not_created() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("absent.redb");

    assert!(cmd_status(&db, true).is_err());
    assert!(show_value(&db, "slot1", None).is_err());
    assert!(cmd_keys(&db, "slot1", true).is_err());
    assert!(cmd_clear(&db, "slot1", true).is_err());
    assert!(!db.exists());

    cmd_init(&db, false).unwrap();
    assert!(db.exists());
    assert_eq!(namespace_overview(&db).unwrap(), serde_json::json!({}));
}
