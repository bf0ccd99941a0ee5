//! Persistence: key-value storage backends, the snapshot encoding they share,
//! and the adapter that keeps a [`statevault_kernel::Store`] in sync with one.
//!
//! # Invariants
//! - Storage never aliases store state: writes store a deep copy, reads
//!   decode a fresh graph.
//! - A stored value replaces the initial state only when it is truthy.
//! - Stored snapshots are verifiable; corrupted files fail closed.

pub mod adapter;
pub mod config;
pub mod file;
pub mod snapshot;
pub mod storage;

pub use adapter::{Attachment, PersistError, attach};
pub use config::{PersistConfig, WriteErrorPolicy};
pub use file::FileStorage;
pub use snapshot::SnapshotDoc;
pub use storage::{MemoryStorage, Storage, StorageError};

pub fn crate_info() -> &'static str {
    "statevault-persist v0.1.0"
}
