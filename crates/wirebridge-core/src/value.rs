//! In-memory values handled by the engine.
//!
//! Immediate scalars have no identity. Everything else lives in an
//! [`ObjectRef`]: a shared cell with a stable [`ObjectId`] taken from a
//! process-wide counter, so graphs can contain cycles and shared members and
//! the marshaller can tell them apart by identity alone.

use crate::types::{builtin, Type};
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an object, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutable contents of an object.
pub enum Body {
    /// A boxed scalar ("primitive wrapper").
    Boxed(Value),
    Record(BTreeMap<String, Value>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Native(Arc<dyn Any + Send + Sync>),
}

struct ObjectCell {
    id: ObjectId,
    ty: Type,
    body: RwLock<Body>,
}

/// Shared, identity-bearing object handle. Cloning shares the object.
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectCell>);

impl ObjectRef {
    pub fn new(ty: &Type, body: Body) -> Self {
        ObjectRef(Arc::new(ObjectCell {
            id: ObjectId::next(),
            ty: ty.clone(),
            body: RwLock::new(body),
        }))
    }

    /// A record of `ty` with every declared field set to null.
    pub fn record(ty: &Type) -> Self {
        let fields = ty
            .fields()
            .iter()
            .map(|(name, _)| (name.clone(), Value::Null))
            .collect();
        Self::new(ty, Body::Record(fields))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::new(&builtin::LIST, Body::List(items))
    }

    pub fn map(entries: BTreeMap<String, Value>) -> Self {
        Self::new(&builtin::MAP, Body::Map(entries))
    }

    /// Box an immediate scalar so it gains an identity.
    pub fn boxed(value: Value) -> Self {
        let ty = value.runtime_type().unwrap_or_else(|| Type::clone(&builtin::OBJECT));
        Self::new(&ty, Body::Boxed(value))
    }

    pub fn native<T: Any + Send + Sync>(ty: &Type, payload: T) -> Self {
        Self::new(ty, Body::Native(Arc::new(payload)))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn type_of(&self) -> &Type {
        &self.0.ty
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Body> {
        self.0.body.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Body> {
        self.0.body.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// True for boxed strings, numbers and booleans.
    pub fn is_boxed_scalar(&self) -> bool {
        matches!(&*self.read(), Body::Boxed(_))
    }

    /// Field of a record or entry of a map.
    pub fn get(&self, key: &str) -> Option<Value> {
        match &*self.read() {
            Body::Record(fields) | Body::Map(fields) => fields.get(key).cloned(),
            _ => None,
        }
    }

    /// Set a record field or map entry. Returns false on other bodies.
    pub fn set(&self, key: impl Into<String>, value: Value) -> bool {
        match &mut *self.write() {
            Body::Record(fields) | Body::Map(fields) => {
                fields.insert(key.into(), value);
                true
            }
            _ => false,
        }
    }

    /// Append to a list. Returns false on other bodies.
    pub fn push(&self, value: Value) -> bool {
        match &mut *self.write() {
            Body::List(items) => {
                items.push(value);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of a list's items.
    pub fn items(&self) -> Vec<Value> {
        match &*self.read() {
            Body::List(items) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Snapshot of a record's fields or a map's entries.
    pub fn entries(&self) -> Vec<(String, Value)> {
        match &*self.read() {
            Body::Record(fields) | Body::Map(fields) => {
                fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Downcast the native payload.
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match &*self.read() {
            Body::Native(payload) => Arc::clone(payload).downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0.ty.name(), self.0.id)
    }
}

/// A value flowing through marshal and unmarshal.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(ObjectRef),
}

impl Value {
    /// Runtime type of the value; `None` for null.
    pub fn runtime_type(&self) -> Option<Type> {
        let ty = match self {
            Value::Null => return None,
            Value::Bool(_) => &builtin::BOOLEAN,
            Value::Int(_) => &builtin::INTEGER,
            Value::Float(_) => &builtin::DOUBLE,
            Value::Str(_) => &builtin::STRING,
            Value::Object(obj) => return Some(obj.type_of().clone()),
        };
        Some(Type::clone(ty))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// The immediate scalar, looking through a boxed object.
    pub fn scalar(&self) -> Option<Value> {
        match self {
            Value::Object(obj) => match &*obj.read() {
                Body::Boxed(inner) => Some(inner.clone()),
                _ => None,
            },
            Value::Null => None,
            immediate => Some(immediate.clone()),
        }
    }

    pub fn as_str(&self) -> Option<String> {
        match self.scalar()? {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.scalar()? {
            Value::Int(n) => Some(n),
            Value::Float(f) if f.fract() == 0.0 => Some(f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.scalar()? {
            Value::Int(n) => Some(n as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.scalar()? {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// True when both values are the very same object.
    pub fn same_object(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Structural comparison that tolerates cycles: a pair of objects already
/// under comparison is assumed equal.
fn structurally_equal(a: &Value, b: &Value, open: &mut HashSet<(ObjectId, ObjectId)>) -> bool {
    if let (Some(x), Some(y)) = (a.scalar(), b.scalar()) {
        return match (x, y) {
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Str(x), Value::Str(y)) => x == y,
            _ => false,
        };
    }
    let (x, y) = match (a, b) {
        (Value::Null, Value::Null) => return true,
        (Value::Object(x), Value::Object(y)) => (x, y),
        _ => return false,
    };
    if x.ptr_eq(y) || !open.insert((x.id(), y.id())) {
        return true;
    }
    if x.type_of() != y.type_of() {
        return false;
    }
    let equal = match (&*x.read(), &*y.read()) {
        (Body::Record(l), Body::Record(r)) | (Body::Map(l), Body::Map(r)) => {
            l.len() == r.len()
                && l.iter().all(|(key, lv)| {
                    r.get(key)
                        .is_some_and(|rv| structurally_equal(lv, rv, open))
                })
        }
        (Body::List(l), Body::List(r)) => {
            l.len() == r.len()
                && l.iter().zip(r).all(|(lv, rv)| structurally_equal(lv, rv, open))
        }
        (Body::Native(l), Body::Native(r)) => Arc::ptr_eq(l, r),
        _ => false,
    };
    equal
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        structurally_equal(self, other, &mut HashSet::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Object(obj) => write!(f, "Object({obj:?})"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}
