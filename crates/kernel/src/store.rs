use serde::{Deserialize, Serialize};
use statevault_common::StoreId;

use crate::container::ObjectRef;
use crate::value::{Value, ValueKind};

/// What a mutation changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    /// A single top-level key was assigned.
    Direct { key: String },
    /// Several top-level keys were assigned at once.
    PatchObject { keys: Vec<String> },
    /// An arbitrary closure edited the state in place.
    PatchFunction,
    /// The whole state was swapped out.
    Replace,
}

/// A record produced by every mutation to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub store_id: StoreId,
    pub kind: MutationKind,
    /// Store revision after the mutation was applied.
    pub revision: u64,
}

/// Handle returned by [`Store::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Change listener: receives the mutation and the state after it.
pub type Listener = Box<dyn FnMut(&Mutation, &Value)>;

/// Errors from store mutations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store {id} state is a {kind}, not an object")]
    StateNotObject { id: StoreId, kind: ValueKind },
}

/// A reactive state container.
///
/// All mutations go through explicit operations; each one is logged and
/// announced to every listener, in registration order, after it is applied.
pub struct Store {
    id: StoreId,
    state: Value,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
    revision: u64,
    /// Append-only log of applied mutations.
    mutation_log: Vec<Mutation>,
}

impl Store {
    pub fn new(id: impl Into<StoreId>, state: Value) -> Self {
        Self {
            id: id.into(),
            state,
            listeners: Vec::new(),
            next_subscription: 0,
            revision: 0,
            mutation_log: Vec::new(),
        }
    }

    pub fn id(&self) -> &StoreId {
        &self.id
    }

    /// Current state. Edits made through this handle bypass notification;
    /// go through [`Store::patch`] instead.
    pub fn state(&self) -> &Value {
        &self.state
    }

    /// Number of mutations applied so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Read-only access to the mutation log.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutation_log
    }

    /// Drain and return the mutation log.
    pub fn drain_mutations(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.mutation_log)
    }

    /// Register a change listener.
    pub fn subscribe(&mut self, listener: impl FnMut(&Mutation, &Value) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sub, _)| *sub != id);
        self.listeners.len() != before
    }

    /// Swap in a whole new state.
    pub fn replace_state(&mut self, state: Value) {
        self.state = state;
        self.commit(MutationKind::Replace);
    }

    /// Assign one top-level key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<(), StoreError> {
        let key = key.into();
        self.root()?.set(key.clone(), value);
        self.commit(MutationKind::Direct { key });
        Ok(())
    }

    /// Assign several top-level keys as one mutation.
    pub fn patch_object<K: Into<String>>(
        &mut self,
        entries: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<(), StoreError> {
        let root = self.root()?;
        let mut keys = Vec::new();
        for (key, value) in entries {
            let key = key.into();
            root.set(key.clone(), value);
            keys.push(key);
        }
        self.commit(MutationKind::PatchObject { keys });
        Ok(())
    }

    /// Edit the state in place through a closure, as one mutation.
    pub fn patch<R>(&mut self, edit: impl FnOnce(&Value) -> R) -> R {
        let result = edit(&self.state);
        self.commit(MutationKind::PatchFunction);
        result
    }

    fn root(&self) -> Result<ObjectRef, StoreError> {
        self.state
            .as_object()
            .cloned()
            .ok_or_else(|| StoreError::StateNotObject {
                id: self.id.clone(),
                kind: self.state.kind(),
            })
    }

    fn commit(&mut self, kind: MutationKind) {
        self.revision += 1;
        let mutation = Mutation {
            store_id: self.id.clone(),
            kind,
            revision: self.revision,
        };
        tracing::trace!(store = %self.id, revision = self.revision, "mutation applied");
        for (_, listener) in &mut self.listeners {
            listener(&mutation, &self.state);
        }
        self.mutation_log.push(mutation);
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .field("revision", &self.revision)
            .finish()
    }
}
