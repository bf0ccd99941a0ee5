//! Binds a [`Store`] to a [`Storage`] backend.

use std::cell::RefCell;
use std::rc::Rc;

use statevault_kernel::{Store, SubscriptionId, deep_copy};

use crate::config::{PersistConfig, WriteErrorPolicy};
use crate::storage::{Storage, StorageError};

/// Errors from the persistence adapter.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to read stored state for {key:?}: {source}")]
    StorageRead {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to write state for {key:?}: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug, Default)]
struct WriteStats {
    writes: u64,
    failures: u64,
    last_error: Option<String>,
}

/// A live binding between a store and its storage key.
#[derive(Debug)]
pub struct Attachment {
    key: String,
    subscription: SubscriptionId,
    stats: Rc<RefCell<WriteStats>>,
}

impl Attachment {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Successful writes since attach.
    pub fn writes(&self) -> u64 {
        self.stats.borrow().writes
    }

    /// Writes that failed and were logged.
    pub fn write_failures(&self) -> u64 {
        self.stats.borrow().failures
    }

    pub fn last_error(&self) -> Option<String> {
        self.stats.borrow().last_error.clone()
    }

    /// Stop writing mutations to storage. Returns whether the listener was
    /// still registered on `store`.
    pub fn detach(self, store: &mut Store) -> bool {
        tracing::debug!(key = %self.key, "detaching persistence");
        store.unsubscribe(self.subscription)
    }
}

/// Attach persistence to a store.
///
/// The stored value, when present and truthy, replaces the store's state
/// outright; otherwise the state is replaced by a deep copy of itself. From
/// then on every mutation writes a deep copy of the new state under the key.
/// Nothing is written during attach.
pub fn attach<S: Storage + 'static>(
    store: &mut Store,
    storage: Rc<S>,
    config: &PersistConfig,
) -> Result<Attachment, PersistError> {
    let key = config.key_for(store.id());
    let span = tracing::info_span!("attach", store = %store.id(), key = %key);
    let _guard = span.enter();

    let initial = deep_copy(store.state());
    let snapshot = match storage.get(&key) {
        Ok(Some(stored)) if stored.is_truthy() => {
            tracing::info!(kind = %stored.kind(), "restoring stored state");
            stored
        }
        Ok(Some(stored)) => {
            tracing::info!(kind = %stored.kind(), "stored state is falsy, keeping initial state");
            initial
        }
        Ok(None) => {
            tracing::debug!("no stored state");
            initial
        }
        Err(source) => return Err(PersistError::StorageRead { key, source }),
    };
    store.replace_state(snapshot);

    let stats = Rc::new(RefCell::new(WriteStats::default()));
    let listener_stats = Rc::clone(&stats);
    let listener_key = key.clone();
    let policy = config.on_write_error;
    let subscription = store.subscribe(move |mutation, state| {
        match storage.set(&listener_key, &deep_copy(state)) {
            Ok(()) => {
                listener_stats.borrow_mut().writes += 1;
                tracing::debug!(key = %listener_key, revision = mutation.revision, "state persisted");
            }
            Err(source) => {
                let err = PersistError::StorageWrite {
                    key: listener_key.clone(),
                    source,
                };
                match policy {
                    WriteErrorPolicy::Log => {
                        tracing::error!(error = %err, revision = mutation.revision, "state not persisted");
                        let mut stats = listener_stats.borrow_mut();
                        stats.failures += 1;
                        stats.last_error = Some(err.to_string());
                    }
                    WriteErrorPolicy::Panic => panic!("{err}"),
                }
            }
        }
    });

    Ok(Attachment {
        key,
        subscription,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileStorage;
    use crate::storage::MemoryStorage;
    use statevault_kernel::{ObjectRef, Value};

    /// Backend whose writes always fail.
    struct FailingStorage {
        fail_reads: bool,
    }

    impl Storage for FailingStorage {
        fn get(&self, _key: &str) -> Result<Option<Value>, StorageError> {
            if self.fail_reads {
                return Err(StorageError::Io(std::io::Error::other("disk gone")));
            }
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &Value) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk full")))
        }

        fn remove(&self, _key: &str) -> Result<bool, StorageError> {
            Ok(false)
        }

        fn keys(&self) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    fn counter_store() -> Store {
        Store::new(
            "counter",
            Value::object_from([("count", Value::from(0.0)), ("step", Value::from(1.0))]),
        )
    }

    #[test]
    fn attach_without_stored_state_keeps_copy_of_initial() {
        let mut store = counter_store();
        let before = store.state().clone();
        let storage = Rc::new(MemoryStorage::new());

        let attachment = attach(&mut store, Rc::clone(&storage), &PersistConfig::default()).unwrap();

        assert_eq!(attachment.key(), "counter");
        assert!(store.state().deep_eq(&before));
        assert!(!store.state().strict_eq(&before));
        // Attaching alone writes nothing.
        assert!(storage.is_empty());
        assert_eq!(attachment.writes(), 0);
    }

    #[test]
    fn every_mutation_is_written() {
        let mut store = counter_store();
        let storage = Rc::new(MemoryStorage::new());
        let attachment = attach(&mut store, Rc::clone(&storage), &PersistConfig::default()).unwrap();

        store.set("count", Value::from(1.0)).unwrap();
        store.set("count", Value::from(2.0)).unwrap();

        assert_eq!(attachment.writes(), 2);
        let stored = storage.get("counter").unwrap().unwrap();
        assert_eq!(stored.get("count").unwrap().as_f64(), Some(2.0));
        assert!(stored.deep_eq(store.state()));
        assert!(!stored.strict_eq(store.state()));
    }

    #[test]
    fn stored_state_replaces_initial_without_merge() {
        let storage = Rc::new(MemoryStorage::new());
        storage
            .set("counter", &Value::object_from([("count", Value::from(5.0))]))
            .unwrap();

        let mut store = counter_store();
        attach(&mut store, Rc::clone(&storage), &PersistConfig::default()).unwrap();

        assert_eq!(store.state().get("count").unwrap().as_f64(), Some(5.0));
        assert!(store.state().get("step").is_none());
    }

    #[test]
    fn falsy_stored_state_is_ignored() {
        for falsy in [Value::Null, Value::from(false), Value::from(0.0), Value::from("")] {
            let storage = Rc::new(MemoryStorage::new());
            storage.set("counter", &falsy).unwrap();

            let mut store = counter_store();
            attach(&mut store, storage, &PersistConfig::default()).unwrap();
            assert_eq!(store.state().get("step").unwrap().as_f64(), Some(1.0));
        }
    }

    #[test]
    fn restored_state_is_fresh_graph() {
        let storage = Rc::new(MemoryStorage::new());
        let original = ObjectRef::new();
        original.set("self", Value::Object(original.clone()));
        storage.set("counter", &Value::Object(original.clone())).unwrap();

        let mut store = counter_store();
        attach(&mut store, storage, &PersistConfig::default()).unwrap();

        let state = store.state();
        assert!(!state.strict_eq(&Value::Object(original)));
        assert!(state.get("self").unwrap().strict_eq(state));
    }

    #[test]
    fn read_failure_propagates() {
        let mut store = counter_store();
        let storage = Rc::new(FailingStorage { fail_reads: true });
        match attach(&mut store, storage, &PersistConfig::default()) {
            Err(PersistError::StorageRead { key, .. }) => assert_eq!(key, "counter"),
            other => panic!("expected StorageRead, got {other:?}"),
        }
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn write_failure_is_logged_and_state_kept() {
        let mut store = counter_store();
        let storage = Rc::new(FailingStorage { fail_reads: false });
        let attachment = attach(&mut store, storage, &PersistConfig::default()).unwrap();

        store.set("count", Value::from(7.0)).unwrap();

        assert_eq!(store.state().get("count").unwrap().as_f64(), Some(7.0));
        assert_eq!(attachment.writes(), 0);
        assert_eq!(attachment.write_failures(), 1);
        assert!(attachment.last_error().unwrap().contains("disk full"));
    }

    #[test]
    #[should_panic(expected = "disk full")]
    fn write_failure_panics_under_panic_policy() {
        let mut store = counter_store();
        let storage = Rc::new(FailingStorage { fail_reads: false });
        let config = PersistConfig {
            on_write_error: WriteErrorPolicy::Panic,
            ..Default::default()
        };
        let _attachment = attach(&mut store, storage, &config).unwrap();
        store.set("count", Value::from(7.0)).unwrap();
    }

    #[test]
    fn key_prefix_applies() {
        let mut store = counter_store();
        let storage = Rc::new(MemoryStorage::new());
        let config = PersistConfig {
            key_prefix: Some("app-".into()),
            ..Default::default()
        };
        let attachment = attach(&mut store, Rc::clone(&storage), &config).unwrap();
        store.set("count", Value::from(1.0)).unwrap();

        assert_eq!(attachment.key(), "app-counter");
        assert_eq!(storage.keys().unwrap(), vec!["app-counter"]);
    }

    #[test]
    fn detach_stops_writes() {
        let mut store = counter_store();
        let storage = Rc::new(MemoryStorage::new());
        let attachment = attach(&mut store, Rc::clone(&storage), &PersistConfig::default()).unwrap();
        store.set("count", Value::from(1.0)).unwrap();

        assert!(attachment.detach(&mut store));
        store.set("count", Value::from(2.0)).unwrap();

        let stored = storage.get("counter").unwrap().unwrap();
        assert_eq!(stored.get("count").unwrap().as_f64(), Some(1.0));
    }

    #[test]
    fn patch_and_replace_are_written() {
        let mut store = counter_store();
        let storage = Rc::new(MemoryStorage::new());
        let attachment = attach(&mut store, Rc::clone(&storage), &PersistConfig::default()).unwrap();

        store
            .patch_object([("count", Value::from(3.0)), ("extra", Value::from(true))])
            .unwrap();
        store.patch(|state| {
            if let Some(obj) = state.as_object() {
                obj.set("count", Value::from(4.0));
            }
        });
        assert_eq!(attachment.writes(), 2);
        assert_eq!(
            storage.get("counter").unwrap().unwrap().get("count").unwrap().as_f64(),
            Some(4.0)
        );

        store.replace_state(Value::from("reset"));
        assert_eq!(
            storage.get("counter").unwrap().unwrap().as_str(),
            Some("reset")
        );
    }

    #[test]
    fn store_id_with_path_separators_persists() {
        let storage = Rc::new(MemoryStorage::new());
        let mut store = Store::new("user/settings", Value::object());
        let attachment = attach(&mut store, Rc::clone(&storage), &PersistConfig::default()).unwrap();
        store.set("n", Value::from(1.0)).unwrap();

        assert_eq!(attachment.writes(), 1);
        assert_eq!(attachment.write_failures(), 0);
        let stored = storage.get("user/settings").unwrap().unwrap();
        assert!(stored.deep_eq(store.state()));

        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("state");
        {
            let mut store = Store::new("user/settings", Value::object());
            let storage = Rc::new(FileStorage::open(&dir).unwrap());
            let attachment = attach(&mut store, storage, &PersistConfig::default()).unwrap();
            store.set("n", Value::from(2.0)).unwrap();
            assert_eq!(attachment.write_failures(), 0);
        }
        let mut store = Store::new("user/settings", Value::object());
        attach(&mut store, Rc::new(FileStorage::open(&dir).unwrap()), &PersistConfig::default()).unwrap();
        assert_eq!(store.state().get("n").unwrap().as_f64(), Some(2.0));
    }

    #[test]
    fn state_survives_restart_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("state");
        {
            let storage = Rc::new(FileStorage::open(&dir).unwrap());
            let mut store = counter_store();
            attach(&mut store, storage, &PersistConfig::default()).unwrap();
            store.set("count", Value::from(42.0)).unwrap();
        }

        let storage = Rc::new(FileStorage::open(&dir).unwrap());
        let mut store = counter_store();
        attach(&mut store, storage, &PersistConfig::default()).unwrap();
        assert_eq!(store.state().get("count").unwrap().as_f64(), Some(42.0));
    }
}
