//! Conversion between [`Value`] graphs and `serde_json` documents.
//!
//! JSON has no identity, so conversion to JSON duplicates shared subtrees and
//! fails on cycles. The mapping follows the usual stringify rules: functions
//! vanish from objects and become `null` in arrays, non-finite numbers become
//! `null`, dates become ISO strings, and RegExp and Error become `{}`.

use std::collections::HashSet;

use serde_json::{Map, Number};

use crate::container::{ArrayRef, ObjectRef};
use crate::value::{Identity, Value, ValueError};

impl Value {
    /// Build a fresh value graph from a JSON document.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::Array(ArrayRef::from_vec(
                items.iter().map(Self::from_json).collect(),
            )),
            serde_json::Value::Object(map) => {
                let obj = ObjectRef::new();
                for (key, item) in map {
                    obj.set(key.clone(), Self::from_json(item));
                }
                Self::Object(obj)
            }
        }
    }

    /// Render as a JSON document. Fails with [`ValueError::Cycle`] on cyclic
    /// graphs.
    pub fn to_json(&self) -> Result<serde_json::Value, ValueError> {
        to_json_inner(self, &mut HashSet::new())
    }
}

fn to_json_inner(
    value: &Value,
    ancestors: &mut HashSet<Identity>,
) -> Result<serde_json::Value, ValueError> {
    let json = match value {
        Value::Null | Value::Function(_) => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(d) => d
            .to_iso_string()
            .map(serde_json::Value::String)
            .unwrap_or(serde_json::Value::Null),
        Value::RegExp(_) | Value::Error(_) => serde_json::Value::Object(Map::new()),
        Value::Array(a) => {
            if !ancestors.insert(a.identity()) {
                return Err(ValueError::Cycle);
            }
            let items = a
                .to_vec()
                .iter()
                .map(|item| to_json_inner(item, ancestors))
                .collect::<Result<Vec<_>, _>>()?;
            ancestors.remove(&a.identity());
            serde_json::Value::Array(items)
        }
        Value::Object(o) => {
            if !ancestors.insert(o.identity()) {
                return Err(ValueError::Cycle);
            }
            let mut map = Map::new();
            for (key, item) in o.entries() {
                if matches!(item, Value::Function(_)) {
                    continue;
                }
                map.insert(key, to_json_inner(&item, ancestors)?);
            }
            ancestors.remove(&o.identity());
            serde_json::Value::Object(map)
        }
    };
    Ok(json)
}
