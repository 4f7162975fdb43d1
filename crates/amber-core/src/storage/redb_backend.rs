//! # redb Backing Store
//!
//! Durable string storage on the redb embedded database. One table maps
//! keys to JSON text; every write is its own committed transaction.

use super::BackingStore;
use crate::types::AmberError;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;

/// Table for entries: key -> text
const ENTRIES: TableDefinition<&str, &str> = TableDefinition::new("entries");

fn io(e: impl std::fmt::Display) -> AmberError {
    AmberError::IoError(e.to_string())
}

/// A backing store persisted in a redb file.
pub struct RedbBackend {
    db: Database,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend").finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AmberError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        // Create the table up front so reads never see it missing
        {
            let write_txn = db.begin_write().map_err(io)?;
            let _ = write_txn.open_table(ENTRIES).map_err(io)?;
            write_txn.commit().map_err(io)?;
        }

        Ok(Self { db })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<bool, AmberError> {
        self.db.compact().map_err(io)
    }
}

impl BackingStore for RedbBackend {
    fn get(&self, key: &str) -> Result<Option<String>, AmberError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(ENTRIES).map_err(io)?;
        Ok(table
            .get(key)
            .map_err(io)?
            .map(|v| v.value().to_string()))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), AmberError> {
        let write_txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = write_txn.open_table(ENTRIES).map_err(io)?;
            table.insert(key, value).map_err(io)?;
        }
        write_txn.commit().map_err(io)
    }

    fn delete(&mut self, key: &str) -> Result<(), AmberError> {
        let write_txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = write_txn.open_table(ENTRIES).map_err(io)?;
            table.remove(key).map_err(io)?;
        }
        write_txn.commit().map_err(io)
    }

    fn keys(&self) -> Result<Vec<String>, AmberError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(ENTRIES).map_err(io)?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }
}

// =============================================================================
// TESTS
// =============================================================================
