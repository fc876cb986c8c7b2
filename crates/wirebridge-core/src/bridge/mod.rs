//! Bridge registries.
//!
//! A bridge exports classes (static methods and constructors) and objects
//! (instance methods) to callers. There is one global bridge, created once by
//! [`Bridge::init_global`], and any number of session bridges whose read
//! lookups fall back to it. Reference types live on sessions only.

mod dispatch;

use crate::codec::ReferenceCodec;
use crate::error::{BridgeError, Result};
use crate::hooks::{CallbackController, ExceptionTransformer, IdentityTransformer, InvocationCallback};
use crate::local_arg::LocalArgRegistry;
use crate::lock;
use crate::serializer::JsonSerializer;
use crate::types::Type;
use crate::value::ObjectRef;
use once_cell::sync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};

static GLOBAL: OnceCell<Arc<Bridge>> = OnceCell::new();

/// Key of an exported object: a caller-visible name, or the handle id of a
/// callable reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    Name(String),
    Handle(u64),
}

impl From<&str> for ObjectKey {
    fn from(name: &str) -> Self {
        ObjectKey::Name(name.to_string())
    }
}

impl From<String> for ObjectKey {
    fn from(name: String) -> Self {
        ObjectKey::Name(name)
    }
}

impl From<u64> for ObjectKey {
    fn from(id: u64) -> Self {
        ObjectKey::Handle(id)
    }
}

/// An exported object and the type whose methods callers may see.
#[derive(Debug, Clone)]
pub struct ObjectInstance {
    pub object: ObjectRef,
    pub exposed: Type,
}

pub struct Bridge {
    parent: Option<Arc<Bridge>>,
    this: Weak<Bridge>,
    serializer: Mutex<Arc<JsonSerializer>>,
    local_args: Arc<LocalArgRegistry>,
    callbacks: CallbackController,
    exception_transformer: Mutex<Arc<dyn ExceptionTransformer>>,
    classes: Mutex<HashMap<String, Type>>,
    objects: Mutex<HashMap<ObjectKey, ObjectInstance>>,
    reference_types: Mutex<HashSet<Type>>,
    callable_reference_types: Mutex<HashSet<Type>>,
    references: Mutex<HashMap<u64, ObjectRef>>,
    references_enabled: AtomicBool,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("global", &self.is_global())
            .field("classes", &lock(&self.classes).len())
            .field("objects", &lock(&self.objects).len())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    fn build(parent: Option<Arc<Bridge>>, serializer: Arc<JsonSerializer>) -> Arc<Self> {
        let local_args = parent
            .as_ref()
            .map(|p| Arc::clone(&p.local_args))
            .unwrap_or_default();
        Arc::new_cyclic(|this| Bridge {
            parent,
            this: this.clone(),
            serializer: Mutex::new(serializer),
            local_args,
            callbacks: CallbackController::new(),
            exception_transformer: Mutex::new(Arc::new(IdentityTransformer)),
            classes: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            reference_types: Mutex::new(HashSet::new()),
            callable_reference_types: Mutex::new(HashSet::new()),
            references: Mutex::new(HashMap::new()),
            references_enabled: AtomicBool::new(false),
        })
    }

    /// A parentless bridge. Use [`init_global`](Self::init_global) for the
    /// process-wide one; this is for tests and embedders that manage their
    /// own root.
    pub fn new_root(serializer: JsonSerializer) -> Arc<Self> {
        Self::build(None, Arc::new(serializer))
    }

    /// Create the process-wide global bridge. Fails if it already exists.
    pub fn init_global(serializer: JsonSerializer) -> Result<Arc<Self>> {
        let bridge = Self::new_root(serializer);
        GLOBAL
            .set(Arc::clone(&bridge))
            .map_err(|_| BridgeError::IllegalOperation("global bridge already initialised".into()))?;
        info!("Global bridge initialised");
        Ok(bridge)
    }

    pub fn global() -> Option<Arc<Self>> {
        GLOBAL.get().cloned()
    }

    /// A session delegating reads to `parent`. It shares the parent's
    /// serializer and local argument resolvers until it enables references.
    pub fn new_session(parent: &Arc<Bridge>) -> Arc<Self> {
        debug!("Creating session bridge");
        Self::build(Some(Arc::clone(parent)), parent.serializer())
    }

    pub fn is_global(&self) -> bool {
        self.parent.is_none()
    }

    pub fn parent(&self) -> Option<&Arc<Bridge>> {
        self.parent.as_ref()
    }

    pub fn serializer(&self) -> Arc<JsonSerializer> {
        Arc::clone(&lock(&self.serializer))
    }

    pub fn local_args(&self) -> &LocalArgRegistry {
        &self.local_args
    }

    pub fn callbacks(&self) -> &CallbackController {
        &self.callbacks
    }

    pub fn register_callback(&self, callback: Arc<dyn InvocationCallback>, context_type: &Type) {
        self.callbacks.register(callback, context_type);
    }

    pub fn unregister_callback(&self, callback: &Arc<dyn InvocationCallback>, context_type: &Type) {
        self.callbacks.unregister(callback, context_type);
    }

    pub fn set_exception_transformer(&self, transformer: Arc<dyn ExceptionTransformer>) {
        *lock(&self.exception_transformer) = transformer;
    }

    pub(crate) fn exception_transformer(&self) -> Arc<dyn ExceptionTransformer> {
        Arc::clone(&lock(&self.exception_transformer))
    }

    // ========================================
    // Classes
    // ========================================

    /// Export `ty` under `name` for static calls and construction.
    /// Registering the same descriptor again is a no-op; any other
    /// descriptor under `name` is a conflict, even one with the same type
    /// name.
    pub fn register_class(&self, name: &str, ty: &Type) -> Result<()> {
        {
            let mut classes = lock(&self.classes);
            match classes.get(name) {
                Some(existing) if existing.same_descriptor(ty) => return Ok(()),
                Some(existing) => {
                    return Err(BridgeError::Registration {
                        message: format!(
                            "class {} already registered as {}, not this {}",
                            name, existing, ty
                        ),
                    })
                }
                None => {
                    classes.insert(name.to_string(), ty.clone());
                }
            }
        }
        self.register_types(ty);
        debug!("Registered class {} as {}", name, ty);
        Ok(())
    }

    pub fn unregister_class(&self, name: &str) -> Option<Type> {
        lock(&self.classes).remove(name)
    }

    pub fn resolve_class(&self, name: &str) -> Option<Type> {
        if let Some(ty) = lock(&self.classes).get(name) {
            return Some(ty.clone());
        }
        self.parent.as_ref()?.resolve_class(name)
    }

    // ========================================
    // Objects
    // ========================================

    /// Export `object` under `key`, exposing its runtime type.
    pub fn register_object(&self, key: impl Into<ObjectKey>, object: ObjectRef) {
        let exposed = object.type_of().clone();
        self.bind(key.into(), ObjectInstance { object, exposed });
    }

    /// Export `object` under `key`, exposing only the methods of `exposed`.
    pub fn register_object_as(
        &self,
        key: impl Into<ObjectKey>,
        object: ObjectRef,
        exposed: &Type,
    ) -> Result<()> {
        if !exposed.is_assignable_from(object.type_of()) {
            return Err(BridgeError::Registration {
                message: format!("{:?} is not an instance of {}", object, exposed),
            });
        }
        self.bind(
            key.into(),
            ObjectInstance {
                object,
                exposed: exposed.clone(),
            },
        );
        Ok(())
    }

    fn bind(&self, key: ObjectKey, instance: ObjectInstance) {
        debug!("Registered object {:?} as {}", key, instance.exposed);
        self.register_types(instance.object.type_of());
        lock(&self.objects).insert(key, instance);
    }

    /// Make `ty` and every type its methods take or return resolvable by
    /// hint.
    fn register_types(&self, ty: &Type) {
        let serializer = self.serializer();
        serializer.register_type(ty);
        for owner in ty.ancestry() {
            for method in owner.declared_methods() {
                for param in method.params() {
                    serializer.register_type(param);
                }
                serializer.register_type(method.returns());
            }
        }
    }

    pub fn unregister_object(&self, key: impl Into<ObjectKey>) -> Option<ObjectInstance> {
        lock(&self.objects).remove(&key.into())
    }

    pub fn resolve_object(&self, key: &ObjectKey) -> Option<ObjectInstance> {
        if let Some(instance) = lock(&self.objects).get(key) {
            return Some(instance.clone());
        }
        self.parent.as_ref()?.resolve_object(key)
    }

    // ========================================
    // References
    // ========================================

    /// Marshal objects of `ty` as opaque handles.
    pub fn register_reference(&self, ty: &Type) -> Result<()> {
        self.ensure_session("register_reference")?;
        self.enable_references()?;
        lock(&self.reference_types).insert(ty.clone());
        self.register_types(ty);
        debug!("Registered reference type {}", ty);
        Ok(())
    }

    /// Marshal objects of `ty`, or of any subtype, as handles callers can
    /// invoke methods on.
    pub fn register_callable_reference(&self, ty: &Type) -> Result<()> {
        self.ensure_session("register_callable_reference")?;
        self.enable_references()?;
        lock(&self.callable_reference_types).insert(ty.clone());
        self.register_types(ty);
        debug!("Registered callable reference type {}", ty);
        Ok(())
    }

    fn ensure_session(&self, operation: &str) -> Result<()> {
        if self.is_global() {
            return Err(BridgeError::IllegalOperation(format!(
                "{} is not allowed on the global bridge",
                operation
            )));
        }
        Ok(())
    }

    /// Give this session its own serializer with a reference codec bound to it.
    pub fn enable_references(&self) -> Result<()> {
        self.ensure_session("enable_references")?;
        if self.references_enabled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let derived = self.serializer().derive();
        derived.register_codec(Arc::new(ReferenceCodec::new(self.this.clone())))?;
        *lock(&self.serializer) = Arc::new(derived);
        info!("References enabled for session");
        Ok(())
    }

    pub fn references_enabled(&self) -> bool {
        self.references_enabled.load(Ordering::SeqCst)
    }

    pub fn is_reference(&self, ty: &Type) -> bool {
        if self.is_global() || !self.references_enabled() {
            return false;
        }
        if lock(&self.reference_types).contains(ty) {
            return true;
        }
        self.parent.as_ref().map_or(false, |p| p.is_reference(ty))
    }

    pub fn is_callable_reference(&self, ty: &Type) -> bool {
        if self.is_global() || !self.references_enabled() {
            return false;
        }
        let found = {
            let callable = lock(&self.callable_reference_types);
            !callable.is_empty() && ty.ancestry().iter().any(|t| callable.contains(t))
        };
        found || self.parent.as_ref().map_or(false, |p| p.is_callable_reference(ty))
    }

    pub(crate) fn callable_reference_types(&self) -> Vec<Type> {
        lock(&self.callable_reference_types).iter().cloned().collect()
    }

    /// Remember a by-reference object so its handle can be resolved later.
    pub fn add_reference(&self, object: &ObjectRef) {
        lock(&self.references).insert(object.id().get(), object.clone());
    }

    pub fn get_reference(&self, id: u64) -> Option<ObjectRef> {
        if let Some(object) = lock(&self.references).get(&id) {
            return Some(object.clone());
        }
        self.parent.as_ref()?.get_reference(id)
    }

    /// Bind a callable reference under its handle id so `.obj[id]` calls
    /// reach it.
    pub fn export_handle(&self, object: &ObjectRef) {
        let key = ObjectKey::Handle(object.id().get());
        let mut objects = lock(&self.objects);
        objects.entry(key).or_insert_with(|| ObjectInstance {
            object: object.clone(),
            exposed: object.type_of().clone(),
        });
    }

    pub fn lookup_handle(&self, id: u64) -> Option<ObjectRef> {
        self.resolve_object(&ObjectKey::Handle(id))
            .map(|instance| instance.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{builtin, TypeBuilder};
    use crate::value::Value;

    fn counter_type() -> Type {
        TypeBuilder::native("Counter")
            .method("get", &[], &builtin::INT, |_, _| Ok(Value::Int(0)))
            .build()
    }

    #[test]
    fn test_class_registration_conflicts() {
        let bridge = Bridge::new_root(JsonSerializer::default());
        let a = TypeBuilder::native("A").build();
        let b = TypeBuilder::native("B").build();
        bridge.register_class("svc", &a).unwrap();
        bridge.register_class("svc", &a).unwrap();
        let err = bridge.register_class("svc", &b).unwrap_err();
        assert!(matches!(err, BridgeError::Registration { .. }));
        assert_eq!(err.to_rpc_error_code(), 596);
        assert_eq!(bridge.serializer().lookup_type("A"), Some(a));

        // Same name, separate descriptor.
        let impostor = TypeBuilder::native("A").build();
        bridge.register_class("svc", &bridge.resolve_class("svc").unwrap()).unwrap();
        assert!(matches!(
            bridge.register_class("svc", &impostor),
            Err(BridgeError::Registration { .. })
        ));
    }

    #[test]
    fn test_session_delegates_reads() {
        let global = Bridge::new_root(JsonSerializer::default());
        let ty = counter_type();
        global.register_class("Counter", &ty).unwrap();
        global.register_object("counter", ObjectRef::native(&ty, 1u8));

        let session = Bridge::new_session(&global);
        assert_eq!(session.resolve_class("Counter"), Some(ty.clone()));
        assert!(session.resolve_object(&"counter".into()).is_some());

        let local = ObjectRef::native(&ty, 2u8);
        session.register_object("counter", local.clone());
        let found = session.resolve_object(&"counter".into()).unwrap();
        assert!(found.object.ptr_eq(&local));

        session.unregister_object("counter");
        let found = session.resolve_object(&"counter".into()).unwrap();
        assert!(!found.object.ptr_eq(&local));

        assert!(global.resolve_object(&"missing".into()).is_none());
    }

    #[test]
    fn test_register_object_as_checks_type() {
        let bridge = Bridge::new_root(JsonSerializer::default());
        let iface = TypeBuilder::interface("Named").build();
        let ty = TypeBuilder::native("Thing").extends(&iface).build();
        let other = TypeBuilder::interface("Other").build();
        let obj = ObjectRef::native(&ty, ());

        bridge.register_object_as("t", obj.clone(), &iface).unwrap();
        assert_eq!(bridge.resolve_object(&"t".into()).unwrap().exposed, iface);
        assert!(matches!(
            bridge.register_object_as("t", obj, &other),
            Err(BridgeError::Registration { .. })
        ));
    }

    #[test]
    fn test_references_rejected_on_root() {
        let root = Bridge::new_root(JsonSerializer::default());
        let ty = counter_type();
        assert!(matches!(
            root.register_reference(&ty),
            Err(BridgeError::IllegalOperation(_))
        ));
        assert!(matches!(
            root.register_callable_reference(&ty),
            Err(BridgeError::IllegalOperation(_))
        ));
        assert!(!root.is_reference(&ty));
    }

    #[test]
    fn test_enable_references_derives_serializer() {
        let root = Bridge::new_root(JsonSerializer::default());
        let session = Bridge::new_session(&root);
        assert!(Arc::ptr_eq(&session.serializer(), &root.serializer()));

        let ty = counter_type();
        session.register_reference(&ty).unwrap();
        assert!(session.references_enabled());
        assert!(!Arc::ptr_eq(&session.serializer(), &root.serializer()));
        assert!(session.is_reference(&ty));
        assert!(!session.is_callable_reference(&ty));
    }

    #[test]
    fn test_callable_reference_checks_supertypes() {
        let root = Bridge::new_root(JsonSerializer::default());
        let session = Bridge::new_session(&root);
        let base = TypeBuilder::interface("Shape").build();
        let circle = TypeBuilder::native("Circle").extends(&base).build();
        session.register_callable_reference(&base).unwrap();
        assert!(session.is_callable_reference(&circle));

        let obj = ObjectRef::native(&circle, ());
        session.export_handle(&obj);
        let found = session.lookup_handle(obj.id().get()).unwrap();
        assert!(found.ptr_eq(&obj));
        assert!(session.lookup_handle(u64::MAX).is_none());
    }
}
