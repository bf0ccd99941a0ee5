//! Deep-Copy Engine: structural duplication of value graphs.
//!
//! # Invariants
//! - A copy shares no mutable substructure with its source. Primitives are
//!   immutable; functions carry no copyable data and are shared by reference.
//! - Within one copy operation, every array or object reached more than once
//!   (shared reference or cycle) maps to the same copy.
//! - A container is registered in the visit cache before its children are
//!   copied, so a child referring back to an ancestor finds the partial copy.
//!
//! # Limitations
//! - Date, RegExp and Error are duplicated before the cache is consulted: a
//!   shared Date yields one distinct copy per occurrence.
//! - Error copies are plain `Error`s. The runtime type name and custom
//!   fields are not carried over; the stack trace is.
//! - [`deep_copy`] recurses once per nesting level and has no depth limit.
//!   Pathologically deep input can exhaust the stack; use [`try_deep_copy`]
//!   with [`CopyOptions::max_depth`] to bound it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::builtins::ErrorRef;
use crate::container::{ArrayRef, ObjectRef};
use crate::value::{Identity, Value, ValueKind};

/// Source identity to copy, scoped to one top-level copy operation.
///
/// Each entry holds the source alongside its copy: an identity is only
/// unique while its value is alive, and a cache threaded through several
/// calls must not see a dropped source's address reused.
#[derive(Default)]
pub struct VisitCache {
    copies: HashMap<Identity, (Value, Value)>,
    hits: usize,
}

impl VisitCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct containers copied so far.
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Number of lookups answered from the cache (cycles and shared references).
    pub fn hits(&self) -> usize {
        self.hits
    }

    fn lookup(&mut self, id: Identity) -> Option<Value> {
        let hit = self.copies.get(&id).map(|(_, copy)| copy.clone());
        if hit.is_some() {
            self.hits += 1;
        }
        hit
    }

    fn register(&mut self, id: Identity, source: &Value, copy: Value) {
        self.copies.insert(id, (source.clone(), copy));
    }
}

/// Produce an independent structural copy of `value`.
///
/// Never fails. See the module docs for what is and is not preserved.
pub fn deep_copy(value: &Value) -> Value {
    let mut cache = VisitCache::new();
    let copy = deep_copy_with(value, &mut cache);
    tracing::trace!(
        containers = cache.len(),
        cache_hits = cache.hits(),
        "deep copy complete"
    );
    copy
}

/// Copy `value`, threading `cache` through the traversal.
///
/// Passing the same cache to several calls makes them behave as one copy
/// operation: a container reachable from more than one root is copied once.
pub fn deep_copy_with(value: &Value, cache: &mut VisitCache) -> Value {
    match value {
        Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Function(_) => value.clone(),
        Value::Date(d) => Value::date(d.get_time()),
        Value::RegExp(r) => Value::RegExp(r.duplicate()),
        Value::Error(e) => Value::Error(copy_error(e)),
        Value::Array(src) => {
            if let Some(hit) = cache.lookup(src.identity()) {
                return hit;
            }
            let copy = ArrayRef::new();
            cache.register(src.identity(), value, Value::Array(copy.clone()));
            for item in src.to_vec() {
                copy.push(deep_copy_with(&item, cache));
            }
            Value::Array(copy)
        }
        Value::Object(src) => {
            if let Some(hit) = cache.lookup(src.identity()) {
                return hit;
            }
            let copy = ObjectRef::new();
            cache.register(src.identity(), value, Value::Object(copy.clone()));
            for (key, item) in src.entries() {
                copy.set(key, deep_copy_with(&item, cache));
            }
            Value::Object(copy)
        }
    }
}

fn copy_error(src: &ErrorRef) -> ErrorRef {
    let copy = ErrorRef::new(src.message());
    copy.set_stack(src.stack());
    copy
}

/// What strict copies do with function values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionPolicy {
    /// Keep the same function in the copy.
    #[default]
    Share,
    /// Fail with [`CopyError::UnsupportedType`].
    Reject,
}

/// Validation applied by [`try_deep_copy`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOptions {
    /// Deepest nesting level accepted below the root (the root is level 0).
    pub max_depth: Option<usize>,
    pub functions: FunctionPolicy,
}

/// Errors from strict copies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CopyError {
    #[error("unsupported {kind} value at {path}")]
    UnsupportedType { kind: ValueKind, path: String },
    #[error("copy depth limit {limit} exceeded at {path}")]
    DepthExceeded { limit: usize, path: String },
}

/// Strict variant of [`deep_copy`]: same copy rules, but fails on values
/// `options` rules out instead of descending without bound.
pub fn try_deep_copy(value: &Value, options: &CopyOptions) -> Result<Value, CopyError> {
    let mut copier = StrictCopier {
        options,
        cache: VisitCache::new(),
        path: Vec::new(),
    };
    copier.copy(value)
}

struct StrictCopier<'a> {
    options: &'a CopyOptions,
    cache: VisitCache,
    path: Vec<String>,
}

impl StrictCopier<'_> {
    fn copy(&mut self, value: &Value) -> Result<Value, CopyError> {
        match self.options.max_depth {
            Some(limit) if self.path.len() > limit => {
                return Err(CopyError::DepthExceeded {
                    limit,
                    path: self.render_path(),
                });
            }
            _ => {}
        }
        match value {
            Value::Function(_) if self.options.functions == FunctionPolicy::Reject => {
                Err(CopyError::UnsupportedType {
                    kind: ValueKind::Function,
                    path: self.render_path(),
                })
            }
            Value::Array(src) => {
                if let Some(hit) = self.cache.lookup(src.identity()) {
                    return Ok(hit);
                }
                let copy = ArrayRef::new();
                self.cache
                    .register(src.identity(), value, Value::Array(copy.clone()));
                for (index, item) in src.to_vec().iter().enumerate() {
                    self.path.push(index.to_string());
                    let child = self.copy(item)?;
                    self.path.pop();
                    copy.push(child);
                }
                Ok(Value::Array(copy))
            }
            Value::Object(src) => {
                if let Some(hit) = self.cache.lookup(src.identity()) {
                    return Ok(hit);
                }
                let copy = ObjectRef::new();
                self.cache
                    .register(src.identity(), value, Value::Object(copy.clone()));
                for (key, item) in src.entries() {
                    self.path.push(key.clone());
                    let child = self.copy(&item)?;
                    self.path.pop();
                    copy.set(key, child);
                }
                Ok(Value::Object(copy))
            }
            leaf => Ok(deep_copy_with(leaf, &mut self.cache)),
        }
    }

    fn render_path(&self) -> String {
        if self.path.is_empty() {
            "<root>".to_string()
        } else {
            self.path.join(".")
        }
    }
}
