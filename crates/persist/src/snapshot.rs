use serde::{Deserialize, Serialize};
use statevault_kernel::{ArrayRef, ErrorRef, Identity, ObjectRef, RegExpRef, Value};
use std::collections::HashMap;

use crate::storage::StorageError;

/// A value position inside a snapshot: an inline primitive or a reference
/// into the node table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Ref(u32),
}

/// One reference value of the captured graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Array(Vec<Slot>),
    Object(Vec<(String, Slot)>),
    Date(f64),
    RegExp {
        source: String,
        flags: String,
    },
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },
}

/// A storable capture of a value graph.
///
/// Every distinct reference value becomes exactly one node, so shared
/// references and cycles survive a store/load round trip. Functions cannot
/// be stored: they are dropped from objects and stored as `null` in arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDoc {
    pub root: Slot,
    pub nodes: Vec<Node>,
    /// Content hash for integrity verification (FNV-1a over the JSON form).
    pub hash: u64,
}

impl SnapshotDoc {
    /// Capture a value graph.
    pub fn encode(value: &Value) -> Self {
        let mut encoder = Encoder::default();
        let root = encoder.slot(value);
        let hash = content_hash(&root, &encoder.nodes);
        Self {
            root,
            nodes: encoder.nodes,
            hash,
        }
    }

    /// Verify the snapshot integrity by recomputing the hash.
    pub fn verify(&self) -> bool {
        self.hash == content_hash(&self.root, &self.nodes)
    }

    /// Rebuild a fresh value graph, sharing nothing with previous decodes.
    pub fn decode(&self) -> Result<Value, StorageError> {
        if !self.verify() {
            return Err(StorageError::CorruptSnapshot(
                "snapshot hash mismatch".into(),
            ));
        }

        // Allocate every node first so forward and cyclic references resolve.
        let shells = self
            .nodes
            .iter()
            .map(shell)
            .collect::<Result<Vec<_>, _>>()?;

        for (node, value) in self.nodes.iter().zip(&shells) {
            match (node, value) {
                (Node::Array(slots), Value::Array(array)) => {
                    for slot in slots {
                        array.push(resolve(slot, &shells)?);
                    }
                }
                (Node::Object(entries), Value::Object(object)) => {
                    for (key, slot) in entries {
                        object.set(key.clone(), resolve(slot, &shells)?);
                    }
                }
                _ => {}
            }
        }
        resolve(&self.root, &shells)
    }

    /// Number of reference nodes captured.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Default)]
struct Encoder {
    nodes: Vec<Node>,
    index: HashMap<Identity, u32>,
}

impl Encoder {
    fn slot(&mut self, value: &Value) -> Slot {
        match value {
            Value::Null | Value::Function(_) => Slot::Null,
            Value::Bool(b) => Slot::Bool(*b),
            Value::Number(n) => Slot::Number(*n),
            Value::String(s) => Slot::String(s.clone()),
            Value::Date(d) => self.leaf(d.identity(), || Node::Date(d.get_time())),
            Value::RegExp(r) => self.leaf(r.identity(), || Node::RegExp {
                source: r.source(),
                flags: r.flags(),
            }),
            Value::Error(e) => self.leaf(e.identity(), || Node::Error {
                name: e.name(),
                message: e.message(),
                stack: e.stack(),
            }),
            Value::Array(a) => {
                if let Some(&index) = self.index.get(&a.identity()) {
                    return Slot::Ref(index);
                }
                let index = self.reserve(a.identity(), Node::Array(Vec::new()));
                let slots: Vec<Slot> = a.to_vec().iter().map(|item| self.slot(item)).collect();
                self.nodes[index as usize] = Node::Array(slots);
                Slot::Ref(index)
            }
            Value::Object(o) => {
                if let Some(&index) = self.index.get(&o.identity()) {
                    return Slot::Ref(index);
                }
                let index = self.reserve(o.identity(), Node::Object(Vec::new()));
                let entries: Vec<(String, Slot)> = o
                    .entries()
                    .into_iter()
                    .filter(|(_, item)| !matches!(item, Value::Function(_)))
                    .map(|(key, item)| (key, self.slot(&item)))
                    .collect();
                self.nodes[index as usize] = Node::Object(entries);
                Slot::Ref(index)
            }
        }
    }

    fn leaf(&mut self, id: Identity, node: impl FnOnce() -> Node) -> Slot {
        if let Some(&index) = self.index.get(&id) {
            return Slot::Ref(index);
        }
        Slot::Ref(self.reserve(id, node()))
    }

    /// Register a node before its children are visited.
    fn reserve(&mut self, id: Identity, node: Node) -> u32 {
        let index = self.nodes.len() as u32;
        self.nodes.push(node);
        self.index.insert(id, index);
        index
    }
}

fn shell(node: &Node) -> Result<Value, StorageError> {
    let value = match node {
        Node::Array(_) => Value::Array(ArrayRef::new()),
        Node::Object(_) => Value::Object(ObjectRef::new()),
        Node::Date(millis) => Value::date(*millis),
        Node::RegExp { source, flags } => Value::RegExp(
            RegExpRef::new(source.clone(), flags)
                .map_err(|e| StorageError::CorruptSnapshot(e.to_string()))?,
        ),
        Node::Error {
            name,
            message,
            stack,
        } => {
            let error = ErrorRef::with_name(name.clone(), message.clone());
            error.set_stack(stack.clone());
            Value::Error(error)
        }
    };
    Ok(value)
}

fn resolve(slot: &Slot, shells: &[Value]) -> Result<Value, StorageError> {
    let value = match slot {
        Slot::Null => Value::Null,
        Slot::Bool(b) => Value::Bool(*b),
        Slot::Number(n) => Value::Number(*n),
        Slot::String(s) => Value::String(s.clone()),
        Slot::Ref(index) => shells.get(*index as usize).cloned().ok_or_else(|| {
            StorageError::CorruptSnapshot(format!("dangling node reference {index}"))
        })?,
    };
    Ok(value)
}

fn content_hash(root: &Slot, nodes: &[Node]) -> u64 {
    // serde_json renders non-finite floats as null, which is fine for hashing
    let bytes = serde_json::to_vec(&(root, nodes)).unwrap_or_default();
    fnv1a_hash(&bytes)
}

/// FNV-1a hash for content addressing.
fn fnv1a_hash(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
