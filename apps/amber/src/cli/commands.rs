//! # CLI Command Implementations
//!
//! Every command opens the database, reads or rewrites one namespace
//! through [`JsonStorage`], and prints the result.

use amber_core::{AmberError, BackingStore, JsonStorage, RedbBackend};
use serde_json::{Value as Json, json};
use std::path::Path;

// =============================================================================
// READ COMMANDS
// =============================================================================

/// Namespaces in the database with their entry names.
pub fn namespace_overview(db_path: &Path) -> Result<Json, AmberError> {
    // One open handle per file at a time.
    let names = open_existing(db_path)?.keys()?;
    let mut namespaces = serde_json::Map::new();
    for namespace in names {
        let keys = match open(db_path, &namespace)?.keys() {
            Ok(keys) => json!(keys),
            Err(e) => {
                tracing::warn!(%namespace, error = %e, "namespace is not readable");
                Json::Null
            }
        };
        namespaces.insert(namespace, keys);
    }
    Ok(Json::Object(namespaces))
}

/// One namespace, or one entry of it, as stored.
pub fn show_value(db_path: &Path, namespace: &str, key: Option<&str>) -> Result<Json, AmberError> {
    let storage = open(db_path, namespace)?;
    let mut raw = storage.raw()?;
    match key {
        None => Ok(Json::Object(raw)),
        Some(key) => raw.remove(key).ok_or_else(|| {
            AmberError::Config(format!("no entry `{key}` in namespace `{namespace}`"))
        }),
    }
}

/// Show database status.
pub fn cmd_status(db_path: &Path, json_mode: bool) -> Result<(), AmberError> {
    let overview = namespace_overview(db_path)?;

    if json_mode {
        let output = json!({
            "database": db_path.to_string_lossy(),
            "namespaces": overview,
        });
        print_json(&output);
        return Ok(());
    }

    println!("Amber Database Status");
    println!("=====================");
    println!("Database: {:?}", db_path);
    println!();
    match overview.as_object() {
        Some(namespaces) if !namespaces.is_empty() => {
            for (namespace, keys) in namespaces {
                match keys.as_array() {
                    Some(keys) => println!("  {:<20} {} entries", namespace, keys.len()),
                    None => println!("  {:<20} (unreadable)", namespace),
                }
            }
        }
        _ => println!("  (no namespaces)"),
    }
    Ok(())
}

/// Print a namespace or one of its entries.
pub fn cmd_show(db_path: &Path, namespace: &str, key: Option<&str>) -> Result<(), AmberError> {
    print_json(&show_value(db_path, namespace, key)?);
    Ok(())
}

/// List the entries of a namespace.
pub fn cmd_keys(db_path: &Path, namespace: &str, json_mode: bool) -> Result<(), AmberError> {
    let keys = open(db_path, namespace)?.keys()?;

    if json_mode {
        print_json(&json!({ "namespace": namespace, "keys": keys }));
        return Ok(());
    }

    for key in keys {
        println!("{}", key);
    }
    Ok(())
}

// =============================================================================
// WRITE COMMANDS
// =============================================================================

/// Remove one entry from a namespace.
pub fn cmd_delete(
    db_path: &Path,
    namespace: &str,
    key: &str,
    json_mode: bool,
) -> Result<(), AmberError> {
    let removed = open(db_path, namespace)?.delete(key)?;
    tracing::info!(%namespace, %key, removed, "delete");

    if json_mode {
        print_json(&json!({ "namespace": namespace, "key": key, "removed": removed }));
    } else if removed {
        println!("Deleted `{}` from `{}`", key, namespace);
    } else {
        println!("No entry `{}` in `{}`", key, namespace);
    }
    Ok(())
}

/// Drop a whole namespace.
pub fn cmd_clear(db_path: &Path, namespace: &str, json_mode: bool) -> Result<(), AmberError> {
    open(db_path, namespace)?.clear()?;
    tracing::info!(%namespace, "namespace cleared");

    if json_mode {
        print_json(&json!({ "namespace": namespace, "cleared": true }));
    } else {
        println!("Cleared namespace `{}`", namespace);
    }
    Ok(())
}

/// Initialize a new empty database.
pub fn cmd_init(db_path: &Path, force: bool) -> Result<(), AmberError> {
    if db_path.exists() {
        if !force {
            return Err(AmberError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| AmberError::IoError(format!("Cannot remove {:?}: {}", db_path, e)))?;
    }

    let _backend = RedbBackend::open(db_path)?;
    println!("Initialized new database at {:?}", db_path);
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open a database that must already exist; only `init` creates files.
fn open_existing(db_path: &Path) -> Result<RedbBackend, AmberError> {
    if !db_path.is_file() {
        return Err(AmberError::IoError(format!(
            "Database {:?} does not exist. Run `amber init` first.",
            db_path
        )));
    }
    RedbBackend::open(db_path)
}

fn open(db_path: &Path, namespace: &str) -> Result<JsonStorage<RedbBackend>, AmberError> {
    Ok(JsonStorage::new(open_existing(db_path)?, namespace))
}

fn print_json(value: &Json) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}
