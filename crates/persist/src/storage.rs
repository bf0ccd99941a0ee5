//! Key-value storage seam and the in-memory backend.

use std::cell::RefCell;
use std::collections::BTreeMap;

use statevault_kernel::Value;

use crate::snapshot::SnapshotDoc;

/// Errors from storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}

/// Durable key-value storage for state snapshots.
///
/// Receivers are `&self`: a backend is shared between the code that attaches
/// a store and the change listener that keeps writing to it.
pub trait Storage {
    /// Read the value stored under `key`. Each call returns a freshly
    /// deserialized graph that shares nothing with the backend or with
    /// earlier reads.
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Store `value` under `key`, replacing any previous value. Any string,
    /// including the empty string, is a valid key.
    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError>;

    /// Delete `key`. Returns whether it existed.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// All stored keys, sorted.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory storage. Values are held in their encoded snapshot form, so
/// reads never alias what was written.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<BTreeMap<String, SnapshotDoc>>,
}

impl MemoryStorage {
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

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.entries
            .borrow()
            .get(key)
            .map(SnapshotDoc::decode)
            .transpose()
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), SnapshotDoc::encode(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.borrow_mut().remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}
