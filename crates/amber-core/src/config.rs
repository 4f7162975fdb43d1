//! # Store Configuration
//!
//! Settings for a [`crate::Store`], loadable from TOML:
//!
//! ```toml
//! namespace = "savegame"
//! state_key = "state"
//! log_mutations = true
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use crate::primitives::{DEFAULT_NAMESPACE, DEFAULT_STATE_KEY};
use crate::types::AmberError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Root key of the namespace in the backing store.
    pub namespace: String,
    /// Key of the root state inside the namespace.
    pub state_key: String,
    /// Render mutation events into log lines for listeners.
    pub log_mutations: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            state_key: DEFAULT_STATE_KEY.to_string(),
            log_mutations: true,
        }
    }
}

impl StoreConfig {
    /// Default settings in the given namespace.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, AmberError> {
        let config: Self = toml::from_str(text).map_err(|e| AmberError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AmberError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AmberError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), AmberError> {
        if self.namespace.is_empty() {
            return Err(AmberError::Config("namespace must not be empty".to_string()));
        }
        if self.state_key.is_empty() {
            return Err(AmberError::Config("state_key must not be empty".to_string()));
        }
        Ok(())
    }
}
