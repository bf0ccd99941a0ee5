//! State kernel: the value graph, the Deep-Copy Engine and the reactive store.
//!
//! # Invariants
//! - A deep copy shares no mutable substructure with its source.
//! - Shared references and cycles are reproduced, never unrolled.
//! - All store mutations flow through explicit operations and are announced
//!   to listeners after they are applied.

mod builtins;
mod container;
pub mod copy;
mod json;
pub mod store;
pub mod value;

pub use builtins::{DateRef, ErrorRef, Function, NativeFn, RegExpRef};
pub use container::{ArrayRef, ObjectRef, Property};
pub use copy::{
    CopyError, CopyOptions, FunctionPolicy, VisitCache, deep_copy, deep_copy_with, try_deep_copy,
};
pub use store::{Listener, Mutation, MutationKind, Store, StoreError, SubscriptionId};
pub use value::{Identity, Value, ValueError, ValueKind};
