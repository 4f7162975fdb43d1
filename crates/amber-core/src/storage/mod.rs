//! # Keyed Storage
//!
//! [`BackingStore`] is the raw string-keyed store underneath persistence.
//! [`JsonStorage`] is a namespaced facade over one backing store: it keeps
//! a whole namespace as a single JSON object under one root key and reads
//! or writes it as a unit through a [`Codec`].
//!
//! Implementations:
//! - [`MemoryBackend`]: in-process, shareable between facades
//! - [`RedbBackend`]: durable, on the redb embedded database

pub mod redb_backend;

pub use redb_backend::RedbBackend;

use crate::serializer::{Codec, StructuralCodec};
use crate::types::AmberError;
use crate::value::Value;
use serde_json::{Map, Value as Json};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Raw string storage.
pub trait BackingStore {
    fn get(&self, key: &str) -> Result<Option<String>, AmberError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), AmberError>;
    fn delete(&mut self, key: &str) -> Result<(), AmberError>;
    /// All keys, sorted.
    fn keys(&self) -> Result<Vec<String>, AmberError>;
}

/// In-memory backing store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl BackingStore for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, AmberError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), AmberError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), AmberError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, AmberError> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}

// =============================================================================
// JSON STORAGE
// =============================================================================

/// One namespace of a backing store, read and written as a whole.
pub struct JsonStorage<B> {
    backend: B,
    root_key: String,
    codec: Rc<dyn Codec>,
}

impl<B: BackingStore> JsonStorage<B> {
    /// A namespace using the plain structural codec.
    pub fn new(backend: B, root_key: impl Into<String>) -> Self {
        Self::with_codec(backend, root_key, Rc::new(StructuralCodec))
    }

    pub fn with_codec(backend: B, root_key: impl Into<String>, codec: Rc<dyn Codec>) -> Self {
        Self {
            backend,
            root_key: root_key.into(),
            codec,
        }
    }

    pub fn root_key(&self) -> &str {
        &self.root_key
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The namespace as undecoded JSON. A missing root is empty.
    pub fn raw(&self) -> Result<Map<String, Json>, AmberError> {
        let Some(text) = self.backend.get(&self.root_key)? else {
            return Ok(Map::new());
        };
        match serde_json::from_str(&text)
            .map_err(|e| AmberError::DeserializationError(e.to_string()))?
        {
            Json::Object(map) => Ok(map),
            other => Err(AmberError::DeserializationError(format!(
                "namespace `{}` holds {} instead of an object",
                self.root_key,
                json_kind(&other)
            ))),
        }
    }

    fn write_raw(&mut self, map: Map<String, Json>) -> Result<(), AmberError> {
        let text = serde_json::to_string(&Json::Object(map))
            .map_err(|e| AmberError::SerializationError(e.to_string()))?;
        self.backend.set(&self.root_key, &text)
    }

    /// Every entry of the namespace, decoded.
    pub fn read_all(&self) -> Result<BTreeMap<String, Value>, AmberError> {
        let mut out = BTreeMap::new();
        for (key, json) in self.raw()? {
            let value = self.codec.decode(json)?;
            out.insert(key, value);
        }
        Ok(out)
    }

    /// One entry, decoded. `None` if absent.
    pub fn get(&self, key: &str) -> Result<Option<Value>, AmberError> {
        match self.raw()?.remove(key) {
            Some(json) => self.codec.decode(json).map(Some),
            None => Ok(None),
        }
    }

    /// Write one entry, keeping the rest of the namespace.
    pub fn set(&mut self, key: &str, value: &Value) -> Result<(), AmberError> {
        let json = self.codec.encode(value)?;
        let mut map = self.raw()?;
        map.insert(key.to_string(), json);
        self.write_raw(map)
    }

    /// Remove one entry. Returns whether it existed.
    pub fn delete(&mut self, key: &str) -> Result<bool, AmberError> {
        let mut map = self.raw()?;
        if map.remove(key).is_none() {
            return Ok(false);
        }
        self.write_raw(map)?;
        Ok(true)
    }

    pub fn keys(&self) -> Result<Vec<String>, AmberError> {
        Ok(self.raw()?.keys().cloned().collect())
    }

    /// Drop the whole namespace.
    pub fn clear(&mut self) -> Result<(), AmberError> {
        self.backend.delete(&self.root_key)
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_root_reads_empty() {
        let storage = JsonStorage::new(MemoryBackend::new(), "ns");
        assert!(storage.read_all().expect("read").is_empty());
        assert!(storage.get("anything").expect("get").is_none());
    }

    #[test]
    fn namespaces_are_isolated() {
        let backend = MemoryBackend::new();
        let mut a = JsonStorage::new(backend.clone(), "a");
        let mut b = JsonStorage::new(backend.clone(), "b");
        a.set("k", &Value::from(1)).expect("set");
        b.set("k", &Value::from(2)).expect("set");

        assert_eq!(a.get("k").expect("get"), Some(Value::from(1)));
        assert_eq!(b.get("k").expect("get"), Some(Value::from(2)));
        assert_eq!(backend.keys().expect("keys"), vec!["a", "b"]);

        a.clear().expect("clear");
        assert!(a.keys().expect("keys").is_empty());
        assert_eq!(b.keys().expect("keys"), vec!["k"]);
    }

    #[test]
    fn set_keeps_other_entries() {
        let mut storage = JsonStorage::new(MemoryBackend::new(), "ns");
        storage.set("x", &Value::from("one")).expect("set");
        storage.set("y", &Value::list(vec![Value::from(2)])).expect("set");

        let all = storage.read_all().expect("read");
        assert_eq!(all.len(), 2);
        assert_eq!(all["y"], Value::list(vec![Value::from(2)]));
        assert!(storage.delete("x").expect("delete"));
        assert!(!storage.delete("x").expect("delete"));
    }

    #[test]
    fn non_object_root_is_an_error() {
        let mut backend = MemoryBackend::new();
        backend.set("ns", "[1,2]").expect("set");
        let storage = JsonStorage::new(backend, "ns");
        assert!(matches!(
            storage.read_all(),
            Err(AmberError::DeserializationError(_))
        ));
    }
}
