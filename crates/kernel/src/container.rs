//! Plain containers: ordered sequences and keyed mappings.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::rc::Rc;

use crate::value::{Identity, Value, ValueError};

/// An ordered, growable sequence of values with reference identity.
#[derive(Clone, Default)]
pub struct ArrayRef(Rc<RefCell<Vec<Value>>>);

impl ArrayRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(items)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Element at `index`. Reference elements are returned as shared handles.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.borrow().get(index).cloned()
    }

    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }

    /// Assign at `index`, padding with `null` when writing past the end.
    pub fn set(&self, index: usize, value: Value) {
        let mut items = self.0.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, Value::Null);
        }
        items[index] = value;
    }

    pub fn pop(&self) -> Option<Value> {
        self.0.borrow_mut().pop()
    }

    /// Borrow the elements. Do not mutate the array while the guard lives.
    pub fn items(&self) -> Ref<'_, [Value]> {
        Ref::map(self.0.borrow(), |items| items.as_slice())
    }

    /// Shallow snapshot of the elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    pub fn identity(&self) -> Identity {
        Identity::of(&self.0)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Value::Array(self.clone()), f)
    }
}

/// A property slot on an object.
#[derive(Clone, Debug)]
pub struct Property {
    pub value: Value,
    /// Non-enumerable properties are skipped by iteration and copying.
    pub enumerable: bool,
}

#[derive(Default)]
struct ObjectData {
    properties: BTreeMap<String, Property>,
    prototype: Option<ObjectRef>,
}

/// A keyed mapping with reference identity.
///
/// Keys iterate in sorted order. Lookups fall back to the prototype chain;
/// iteration and copying see own enumerable properties only.
#[derive(Clone, Default)]
pub struct ObjectRef(Rc<RefCell<ObjectData>>);

impl ObjectRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty object inheriting from `prototype`.
    pub fn with_prototype(prototype: ObjectRef) -> Self {
        Self(Rc::new(RefCell::new(ObjectData {
            properties: BTreeMap::new(),
            prototype: Some(prototype),
        })))
    }

    pub fn prototype(&self) -> Option<ObjectRef> {
        self.0.borrow().prototype.clone()
    }

    /// Replace the prototype. Rejects changes that would make the chain cyclic.
    pub fn set_prototype(&self, prototype: Option<ObjectRef>) -> Result<(), ValueError> {
        let mut cursor = prototype.clone();
        while let Some(proto) = cursor {
            if proto.ptr_eq(self) {
                return Err(ValueError::PrototypeCycle);
            }
            cursor = proto.prototype();
        }
        self.0.borrow_mut().prototype = prototype;
        Ok(())
    }

    /// Property lookup through the prototype chain.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.get_own(key) {
            return Some(value);
        }
        let mut cursor = self.prototype();
        while let Some(proto) = cursor {
            if let Some(value) = proto.get_own(key) {
                return Some(value);
            }
            cursor = proto.prototype();
        }
        None
    }

    pub fn get_own(&self, key: &str) -> Option<Value> {
        self.0
            .borrow()
            .properties
            .get(key)
            .map(|prop| prop.value.clone())
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.0.borrow().properties.contains_key(key)
    }

    /// Assign a property. A new key is enumerable; an existing key keeps its
    /// enumerability.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        match self.0.borrow_mut().properties.entry(key.into()) {
            Entry::Occupied(mut slot) => slot.get_mut().value = value,
            Entry::Vacant(slot) => {
                slot.insert(Property {
                    value,
                    enumerable: true,
                });
            }
        }
    }

    /// Define a property with explicit enumerability.
    pub fn define(&self, key: impl Into<String>, value: Value, enumerable: bool) {
        self.0
            .borrow_mut()
            .properties
            .insert(key.into(), Property { value, enumerable });
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0
            .borrow_mut()
            .properties
            .remove(key)
            .map(|prop| prop.value)
    }

    /// Own enumerable `(key, value)` pairs in key order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .properties
            .iter()
            .filter(|(_, prop)| prop.enumerable)
            .map(|(key, prop)| (key.clone(), prop.value.clone()))
            .collect()
    }

    /// Own enumerable keys in key order.
    pub fn keys(&self) -> Vec<String> {
        self.0
            .borrow()
            .properties
            .iter()
            .filter(|(_, prop)| prop.enumerable)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of own enumerable properties.
    pub fn len(&self) -> usize {
        self.0
            .borrow()
            .properties
            .values()
            .filter(|prop| prop.enumerable)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn identity(&self) -> Identity {
        Identity::of(&self.0)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Value::Object(self.clone()), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_set_pads_with_null() {
        let arr = ArrayRef::new();
        arr.set(2, Value::from(1.0));
        assert_eq!(arr.len(), 3);
        assert!(arr.get(0).unwrap().is_null());
        assert_eq!(arr.get(2).and_then(|v| v.as_f64()), Some(1.0));
    }

    #[test]
    fn array_get_shares_element_identity() {
        let inner = Value::object();
        let arr = ArrayRef::from_vec(vec![inner.clone()]);
        assert!(arr.get(0).unwrap().strict_eq(&inner));
    }

    #[test]
    fn object_lookup_walks_prototype_chain() {
        let base = ObjectRef::new();
        base.set("greeting", Value::from("hi"));
        let child = ObjectRef::with_prototype(base);
        assert_eq!(child.get("greeting").unwrap().as_str(), Some("hi"));
        assert!(child.get_own("greeting").is_none());
        assert!(child.is_empty());
    }

    #[test]
    fn object_non_enumerable_hidden_from_iteration() {
        let obj = ObjectRef::new();
        obj.set("a", Value::from(1.0));
        obj.define("hidden", Value::from(2.0), false);
        assert_eq!(obj.keys(), vec!["a".to_string()]);
        assert_eq!(obj.len(), 1);
        assert!(obj.has_own("hidden"));
    }

    #[test]
    fn object_set_keeps_enumerability() {
        let obj = ObjectRef::new();
        obj.define("hidden", Value::from(1.0), false);
        obj.set("hidden", Value::from(2.0));
        assert!(obj.keys().is_empty());
        assert_eq!(obj.get_own("hidden").and_then(|v| v.as_f64()), Some(2.0));
    }

    #[test]
    fn prototype_cycle_rejected() {
        let a = ObjectRef::new();
        let b = ObjectRef::with_prototype(a.clone());
        assert!(matches!(
            a.set_prototype(Some(b)),
            Err(ValueError::PrototypeCycle)
        ));
        assert!(matches!(
            a.set_prototype(Some(a.clone())),
            Err(ValueError::PrototypeCycle)
        ));
    }

    #[test]
    fn entries_iterate_in_key_order() {
        let obj = ObjectRef::new();
        obj.set("b", Value::from(2.0));
        obj.set("a", Value::from(1.0));
        let keys: Vec<String> = obj.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
