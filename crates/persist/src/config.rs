use serde::{Deserialize, Serialize};
use statevault_common::StoreId;

/// What to do when writing a snapshot after a mutation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteErrorPolicy {
    /// Log the failure, count it, and keep the in-memory state.
    #[default]
    Log,
    /// Abort the mutating call.
    Panic,
}

/// Persistence adapter configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Prepended to the store id to form the storage key.
    pub key_prefix: Option<String>,
    pub on_write_error: WriteErrorPolicy,
}

impl PersistConfig {
    /// Storage key for a store.
    pub fn key_for(&self, id: &StoreId) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}{id}"),
            None => id.to_string(),
        }
    }
}
