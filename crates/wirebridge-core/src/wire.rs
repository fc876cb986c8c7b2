//! JSON-shaped wire tree with shareable containers.
//!
//! A plain `serde_json::Value` cannot hold the same node in two places, which
//! is exactly what applying a fixup produces. Containers here are shared
//! cells carrying a [`NodeId`], so the decoder can recognise a node it has
//! already seen. Wire trees are call-local and deliberately not `Send`.

use crate::config::WireConfig;
use crate::error::MarshalError;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a wire container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Shape of a wire node, used as the decode-side hint for codec lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

struct Cell<T> {
    id: NodeId,
    items: RefCell<T>,
}

/// Shared JSON array.
#[derive(Clone)]
pub struct WireArray(Rc<Cell<Vec<WireNode>>>);

/// Shared JSON object.
#[derive(Clone)]
pub struct WireObject(Rc<Cell<BTreeMap<String, WireNode>>>);

#[derive(Clone)]
pub enum WireNode {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(WireArray),
    Object(WireObject),
}

impl WireArray {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<WireNode>) -> Self {
        WireArray(Rc::new(Cell {
            id: NodeId::next(),
            items: RefCell::new(items),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<WireNode> {
        self.0.items.borrow().get(index).cloned()
    }

    pub fn push(&self, node: WireNode) {
        self.0.items.borrow_mut().push(node);
    }

    /// Store `node` at `index`, padding with nulls past the end. Returns
    /// false, leaving the array untouched, when `index` lies more than
    /// [`WireConfig::MAX_FIXUP_PADDING`] slots past the end.
    pub fn set(&self, index: usize, node: WireNode) -> bool {
        let mut items = self.0.items.borrow_mut();
        if index < items.len() {
            items[index] = node;
            return true;
        }
        if index - items.len() > WireConfig::MAX_FIXUP_PADDING {
            return false;
        }
        items.resize(index, WireNode::Null);
        items.push(node);
        true
    }

    /// Snapshot of the elements; containers stay shared.
    pub fn items(&self) -> Vec<WireNode> {
        self.0.items.borrow().clone()
    }
}

impl Default for WireArray {
    fn default() -> Self {
        Self::new()
    }
}

impl WireObject {
    pub fn new() -> Self {
        WireObject(Rc::new(Cell {
            id: NodeId::next(),
            items: RefCell::new(BTreeMap::new()),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<WireNode> {
        self.0.items.borrow().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.items.borrow().contains_key(key)
    }

    pub fn insert(&self, key: impl Into<String>, node: WireNode) {
        self.0.items.borrow_mut().insert(key.into(), node);
    }

    pub fn remove(&self, key: &str) -> Option<WireNode> {
        self.0.items.borrow_mut().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.items.borrow().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, WireNode)> {
        self.0
            .items
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// String value stored under `key`, if any.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            WireNode::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for WireObject {
    fn default() -> Self {
        Self::new()
    }
}

impl WireNode {
    pub fn string(s: impl Into<String>) -> Self {
        WireNode::String(s.into())
    }

    pub fn kind(&self) -> WireKind {
        match self {
            WireNode::Null => WireKind::Null,
            WireNode::Bool(_) => WireKind::Bool,
            WireNode::Number(_) => WireKind::Number,
            WireNode::String(_) => WireKind::String,
            WireNode::Array(_) => WireKind::Array,
            WireNode::Object(_) => WireKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WireNode::Null)
    }

    /// Identity of a container node; scalars have none.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            WireNode::Array(arr) => Some(arr.id()),
            WireNode::Object(obj) => Some(obj.id()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&WireArray> {
        match self {
            WireNode::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&WireObject> {
        match self {
            WireNode::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireNode::String(s) => Some(s),
            _ => None,
        }
    }

    /// Type name written under the hint key of an object node.
    pub fn type_hint(&self) -> Option<String> {
        self.as_object()?.get_str(WireConfig::TYPE_HINT_KEY)
    }

    /// True when both nodes are the same shared container.
    pub fn same_node(&self, other: &WireNode) -> bool {
        match (self.node_id(), other.node_id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Empty every container reachable from this node. Rewired trees may
    /// contain reference cycles, which `Rc` alone never frees.
    pub fn dismantle(&self) {
        let mut seen = HashSet::new();
        let mut pending = vec![self.clone()];
        while let Some(node) = pending.pop() {
            match node {
                WireNode::Array(arr) if seen.insert(arr.id()) => {
                    pending.extend(std::mem::take(&mut *arr.0.items.borrow_mut()));
                }
                WireNode::Object(obj) if seen.insert(obj.id()) => {
                    let items = std::mem::take(&mut *obj.0.items.borrow_mut());
                    pending.extend(items.into_values());
                }
                _ => {}
            }
        }
    }

    /// Convert back to plain JSON. Shared nodes are written out once per
    /// occurrence; a cycle is an error.
    pub fn to_json(&self) -> Result<serde_json::Value, MarshalError> {
        self.to_json_guarded(&mut HashSet::new())
    }

    fn to_json_guarded(&self, open: &mut HashSet<NodeId>) -> Result<serde_json::Value, MarshalError> {
        let id = match self.node_id() {
            Some(id) => id,
            None => {
                return Ok(match self {
                    WireNode::Null => serde_json::Value::Null,
                    WireNode::Bool(b) => serde_json::Value::Bool(*b),
                    WireNode::Number(n) => serde_json::Value::Number(n.clone()),
                    WireNode::String(s) => serde_json::Value::String(s.clone()),
                    WireNode::Array(_) | WireNode::Object(_) => serde_json::Value::Null,
                })
            }
        };
        if !open.insert(id) {
            return Err(MarshalError::CyclicWire { node: id.get() });
        }
        let json = match self {
            WireNode::Array(arr) => {
                let mut out = Vec::with_capacity(arr.len());
                for item in arr.items() {
                    out.push(item.to_json_guarded(open)?);
                }
                serde_json::Value::Array(out)
            }
            WireNode::Object(obj) => {
                let mut out = serde_json::Map::new();
                for (key, item) in obj.entries() {
                    out.insert(key, item.to_json_guarded(open)?);
                }
                serde_json::Value::Object(out)
            }
            _ => serde_json::Value::Null,
        };
        open.remove(&id);
        Ok(json)
    }
}

impl From<&serde_json::Value> for WireNode {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => WireNode::Null,
            serde_json::Value::Bool(b) => WireNode::Bool(*b),
            serde_json::Value::Number(n) => WireNode::Number(n.clone()),
            serde_json::Value::String(s) => WireNode::String(s.clone()),
            serde_json::Value::Array(items) => {
                WireNode::Array(WireArray::from_vec(items.iter().map(WireNode::from).collect()))
            }
            serde_json::Value::Object(map) => {
                let obj = WireObject::new();
                for (key, item) in map {
                    obj.insert(key.clone(), WireNode::from(item));
                }
                WireNode::Object(obj)
            }
        }
    }
}

impl From<bool> for WireNode {
    fn from(b: bool) -> Self {
        WireNode::Bool(b)
    }
}

impl From<i64> for WireNode {
    fn from(n: i64) -> Self {
        WireNode::Number(n.into())
    }
}

impl From<WireArray> for WireNode {
    fn from(arr: WireArray) -> Self {
        WireNode::Array(arr)
    }
}

impl From<WireObject> for WireNode {
    fn from(obj: WireObject) -> Self {
        WireNode::Object(obj)
    }
}

impl fmt::Debug for WireNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireNode::Null => f.write_str("null"),
            WireNode::Bool(b) => write!(f, "{b}"),
            WireNode::Number(n) => write!(f, "{n}"),
            WireNode::String(s) => write!(f, "{s:?}"),
            WireNode::Array(arr) => write!(f, "Array#{}[{}]", arr.id().get(), arr.len()),
            WireNode::Object(obj) => write!(f, "Object#{}{:?}", obj.id().get(), obj.keys()),
        }
    }
}
