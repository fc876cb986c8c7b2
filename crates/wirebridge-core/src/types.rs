//! Runtime type descriptors.
//!
//! Rust offers no reflection, so every type that crosses the wire is described
//! up front: its kind, supertypes, record fields and callable methods. Types
//! compare by name, which is also the value written under the type hint key.

use crate::error::ApplicationError;
use crate::value::Value;
use once_cell::sync::Lazy;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Body of an exported method: receives the target object (absent for static
/// methods and constructors) and the already decoded arguments.
pub type MethodBody =
    Arc<dyn Fn(Option<&Value>, &[Value]) -> Result<Value, ApplicationError> + Send + Sync>;

/// Non-nullable primitive kinds, ordered by widening rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveKind {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Boolean,
}

impl PrimitiveKind {
    /// Position in the widening order used to compare overload signatures.
    pub fn rank(self) -> u8 {
        match self {
            PrimitiveKind::Byte => 1,
            PrimitiveKind::Short => 2,
            PrimitiveKind::Int => 3,
            PrimitiveKind::Long => 4,
            PrimitiveKind::Float => 5,
            PrimitiveKind::Double => 6,
            PrimitiveKind::Boolean => 7,
        }
    }

    pub fn is_integral(self) -> bool {
        self.integral_range().is_some()
    }

    /// Inclusive bounds of an integral kind.
    pub fn integral_range(self) -> Option<(i64, i64)> {
        match self {
            PrimitiveKind::Byte => Some((i8::MIN.into(), i8::MAX.into())),
            PrimitiveKind::Short => Some((i16::MIN.into(), i16::MAX.into())),
            PrimitiveKind::Int => Some((i32::MIN.into(), i32::MAX.into())),
            PrimitiveKind::Long => Some((i64::MIN, i64::MAX)),
            PrimitiveKind::Float | PrimitiveKind::Double | PrimitiveKind::Boolean => None,
        }
    }
}

/// Families of boxed scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    /// Any number; decodes to an integer when the node holds one.
    Number,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    Long,
    Double,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// The root of the hierarchy; accepts every non-primitive type.
    Any,
    Primitive(PrimitiveKind),
    Scalar(ScalarKind),
    Record,
    List,
    Map,
    Interface,
    /// Opaque host object exposing only methods.
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Instance,
    Static,
    Constructor,
}

/// A callable member of a [`Type`].
pub struct MethodDef {
    name: String,
    kind: MethodKind,
    params: Vec<Type>,
    returns: Type,
    body: MethodBody,
}

impl MethodDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    pub fn params(&self) -> &[Type] {
        &self.params
    }

    pub fn returns(&self) -> &Type {
        &self.returns
    }

    /// Human readable signature, e.g. `add(int,int)`.
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|p| p.name()).collect();
        format!("{}({})", self.name, params.join(","))
    }

    pub fn call(&self, target: Option<&Value>, args: &[Value]) -> Result<Value, ApplicationError> {
        (self.body)(target, args)
    }

    fn same_signature(&self, other: &MethodDef) -> bool {
        self.name == other.name && self.params == other.params
    }
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("signature", &self.signature())
            .field("kind", &self.kind)
            .field("returns", &self.returns)
            .finish()
    }
}

struct TypeInfo {
    name: String,
    kind: TypeKind,
    supertypes: Vec<Type>,
    fields: Vec<(String, Type)>,
    methods: Vec<Arc<MethodDef>>,
}

/// Shared handle to a type descriptor.
#[derive(Clone)]
pub struct Type(Arc<TypeInfo>);

impl Type {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> TypeKind {
        self.0.kind
    }

    pub fn supertypes(&self) -> &[Type] {
        &self.0.supertypes
    }

    /// Declared record fields in declaration order.
    pub fn fields(&self) -> &[(String, Type)] {
        &self.0.fields
    }

    pub fn field(&self, name: &str) -> Option<&Type> {
        self.0
            .fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| ty)
    }

    /// True when both handles point at the same descriptor, not merely at
    /// descriptors sharing a name.
    pub fn same_descriptor(&self, other: &Type) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.0.kind, TypeKind::Primitive(_))
    }

    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self.0.kind {
            TypeKind::Primitive(kind) => Some(kind),
            _ => None,
        }
    }

    /// True when a value of type `other` may be used where `self` is expected.
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        if other.is_primitive() || self.is_primitive() {
            return false;
        }
        if self.kind() == TypeKind::Any {
            return true;
        }
        other
            .supertypes()
            .iter()
            .any(|parent| self.is_assignable_from(parent))
    }

    /// This type followed by every supertype, nearest first, without repeats.
    pub fn ancestry(&self) -> Vec<Type> {
        let mut out: Vec<Type> = Vec::new();
        let mut pending = vec![self.clone()];
        while let Some(ty) = pending.pop() {
            if out.contains(&ty) {
                continue;
            }
            for parent in ty.supertypes().iter().rev() {
                pending.push(parent.clone());
            }
            out.push(ty);
        }
        out
    }

    /// Methods declared directly on this type.
    pub fn declared_methods(&self) -> &[Arc<MethodDef>] {
        &self.0.methods
    }

    /// Instance methods visible on this type, inherited ones included. A
    /// subtype method with the same name and parameters hides the parent's.
    pub fn instance_methods(&self) -> Vec<Arc<MethodDef>> {
        let mut visible: Vec<Arc<MethodDef>> = Vec::new();
        for ty in self.ancestry() {
            for method in ty.declared_methods() {
                if method.kind() != MethodKind::Instance {
                    continue;
                }
                if !visible.iter().any(|m| m.same_signature(method)) {
                    visible.push(Arc::clone(method));
                }
            }
        }
        visible
    }

    pub fn static_methods(&self) -> Vec<Arc<MethodDef>> {
        self.declared_of_kind(MethodKind::Static)
    }

    pub fn constructors(&self) -> Vec<Arc<MethodDef>> {
        self.declared_of_kind(MethodKind::Constructor)
    }

    /// The most derived instance method matching `method`'s signature.
    pub fn find_override(&self, method: &MethodDef) -> Option<Arc<MethodDef>> {
        self.instance_methods()
            .into_iter()
            .find(|m| m.same_signature(method))
    }

    fn declared_of_kind(&self, kind: MethodKind) -> Vec<Arc<MethodDef>> {
        self.0
            .methods
            .iter()
            .filter(|m| m.kind() == kind)
            .cloned()
            .collect()
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.0.name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

/// Builder for [`Type`] descriptors.
///
/// ```
/// use wirebridge::types::{builtin, TypeBuilder};
/// use wirebridge::Value;
///
/// let point = TypeBuilder::record("Point")
///     .field("x", &builtin::INT)
///     .field("y", &builtin::INT)
///     .static_method("dimensions", &[], &builtin::INT, |_, _| Ok(Value::Int(2)))
///     .build();
/// assert_eq!(point.fields().len(), 2);
/// ```
pub struct TypeBuilder {
    name: String,
    kind: TypeKind,
    supertypes: Vec<Type>,
    fields: Vec<(String, Type)>,
    methods: Vec<Arc<MethodDef>>,
}

impl TypeBuilder {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            supertypes: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn record(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Record)
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Interface)
    }

    pub fn native(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Native)
    }

    pub fn extends(mut self, parent: &Type) -> Self {
        if !self.supertypes.contains(parent) {
            self.supertypes.push(parent.clone());
        }
        self
    }

    pub fn field(mut self, name: impl Into<String>, ty: &Type) -> Self {
        self.fields.push((name.into(), ty.clone()));
        self
    }

    pub fn method<F>(self, name: &str, params: &[&Type], returns: &Type, body: F) -> Self
    where
        F: Fn(Option<&Value>, &[Value]) -> Result<Value, ApplicationError> + Send + Sync + 'static,
    {
        self.add_method(name, MethodKind::Instance, params, returns, Arc::new(body))
    }

    pub fn static_method<F>(self, name: &str, params: &[&Type], returns: &Type, body: F) -> Self
    where
        F: Fn(Option<&Value>, &[Value]) -> Result<Value, ApplicationError> + Send + Sync + 'static,
    {
        self.add_method(name, MethodKind::Static, params, returns, Arc::new(body))
    }

    /// Constructors take no target; their return type is the type being built.
    pub fn constructor<F>(self, params: &[&Type], body: F) -> Self
    where
        F: Fn(Option<&Value>, &[Value]) -> Result<Value, ApplicationError> + Send + Sync + 'static,
    {
        let returns = Type::clone(&builtin::OBJECT);
        let name = crate::config::DispatchConfig::CONSTRUCTOR_FLAG;
        self.add_method(name, MethodKind::Constructor, params, &returns, Arc::new(body))
    }

    fn add_method(
        mut self,
        name: &str,
        kind: MethodKind,
        params: &[&Type],
        returns: &Type,
        body: MethodBody,
    ) -> Self {
        self.methods.push(Arc::new(MethodDef {
            name: name.to_string(),
            kind,
            params: params.iter().map(|p| (*p).clone()).collect(),
            returns: returns.clone(),
            body,
        }));
        self
    }

    pub fn build(self) -> Type {
        let mut supertypes = self.supertypes;
        let needs_root = !matches!(self.kind, TypeKind::Any | TypeKind::Primitive(_));
        if needs_root && supertypes.is_empty() {
            supertypes.push(Type::clone(&builtin::OBJECT));
        }
        Type(Arc::new(TypeInfo {
            name: self.name,
            kind: self.kind,
            supertypes,
            fields: self.fields,
            methods: self.methods,
        }))
    }
}

/// Types known to every serializer.
pub mod builtin {
    use super::*;

    pub static OBJECT: Lazy<Type> = Lazy::new(|| TypeBuilder::new("Object", TypeKind::Any).build());

    pub static STRING: Lazy<Type> =
        Lazy::new(|| TypeBuilder::new("String", TypeKind::Scalar(ScalarKind::String)).build());
    pub static NUMBER: Lazy<Type> =
        Lazy::new(|| TypeBuilder::new("Number", TypeKind::Scalar(ScalarKind::Number)).build());
    pub static INTEGER: Lazy<Type> = Lazy::new(|| {
        TypeBuilder::new("Integer", TypeKind::Scalar(ScalarKind::Integer))
            .extends(&NUMBER)
            .build()
    });
    pub static LONG: Lazy<Type> = Lazy::new(|| {
        TypeBuilder::new("Long", TypeKind::Scalar(ScalarKind::Long))
            .extends(&NUMBER)
            .build()
    });
    pub static DOUBLE: Lazy<Type> = Lazy::new(|| {
        TypeBuilder::new("Double", TypeKind::Scalar(ScalarKind::Double))
            .extends(&NUMBER)
            .build()
    });
    pub static BOOLEAN: Lazy<Type> =
        Lazy::new(|| TypeBuilder::new("Boolean", TypeKind::Scalar(ScalarKind::Boolean)).build());

    pub static BYTE: Lazy<Type> =
        Lazy::new(|| TypeBuilder::new("byte", TypeKind::Primitive(PrimitiveKind::Byte)).build());
    pub static SHORT: Lazy<Type> =
        Lazy::new(|| TypeBuilder::new("short", TypeKind::Primitive(PrimitiveKind::Short)).build());
    pub static INT: Lazy<Type> =
        Lazy::new(|| TypeBuilder::new("int", TypeKind::Primitive(PrimitiveKind::Int)).build());
    pub static LONG_PRIMITIVE: Lazy<Type> =
        Lazy::new(|| TypeBuilder::new("long", TypeKind::Primitive(PrimitiveKind::Long)).build());
    pub static FLOAT: Lazy<Type> =
        Lazy::new(|| TypeBuilder::new("float", TypeKind::Primitive(PrimitiveKind::Float)).build());
    pub static DOUBLE_PRIMITIVE: Lazy<Type> = Lazy::new(|| {
        TypeBuilder::new("double", TypeKind::Primitive(PrimitiveKind::Double)).build()
    });
    pub static BOOLEAN_PRIMITIVE: Lazy<Type> = Lazy::new(|| {
        TypeBuilder::new("boolean", TypeKind::Primitive(PrimitiveKind::Boolean)).build()
    });

    pub static LIST: Lazy<Type> = Lazy::new(|| TypeBuilder::new("List", TypeKind::List).build());
    pub static MAP: Lazy<Type> = Lazy::new(|| TypeBuilder::new("Map", TypeKind::Map).build());

    /// Every built-in type, for preloading a serializer's type table.
    pub fn all() -> Vec<Type> {
        [
            &OBJECT,
            &STRING,
            &NUMBER,
            &INTEGER,
            &LONG,
            &DOUBLE,
            &BOOLEAN,
            &BYTE,
            &SHORT,
            &INT,
            &LONG_PRIMITIVE,
            &FLOAT,
            &DOUBLE_PRIMITIVE,
            &BOOLEAN_PRIMITIVE,
            &LIST,
            &MAP,
        ]
        .into_iter()
        .map(|ty| Type::clone(ty))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape_hierarchy() -> (Type, Type, Type) {
        let shape = TypeBuilder::interface("Shape")
            .method("area", &[], &builtin::DOUBLE, |_, _| Ok(Value::Float(0.0)))
            .method("name", &[], &builtin::STRING, |_, _| Ok(Value::from("shape")))
            .build();
        let square = TypeBuilder::record("Square")
            .extends(&shape)
            .field("side", &builtin::DOUBLE)
            .method("area", &[], &builtin::DOUBLE, |_, _| Ok(Value::Float(4.0)))
            .static_method("unit", &[], &builtin::OBJECT, |_, _| Ok(Value::Null))
            .build();
        let other = TypeBuilder::record("Other").build();
        (shape, square, other)
    }

    #[test]
    fn test_types_compare_by_name() {
        let a = TypeBuilder::record("Thing").build();
        let b = TypeBuilder::record("Thing").field("x", &builtin::INT).build();
        assert_eq!(a, b);
        assert_ne!(a, *builtin::STRING);
    }

    #[test]
    fn test_assignability() {
        let (shape, square, other) = shape_hierarchy();

        assert!(shape.is_assignable_from(&square));
        assert!(!square.is_assignable_from(&shape));
        assert!(!shape.is_assignable_from(&other));
        assert!(builtin::OBJECT.is_assignable_from(&square));
        assert!(builtin::NUMBER.is_assignable_from(&builtin::INTEGER));
        assert!(!builtin::OBJECT.is_assignable_from(&builtin::INT));
        assert!(!builtin::INT.is_assignable_from(&builtin::INTEGER));
        assert!(builtin::INT.is_assignable_from(&builtin::INT));
    }

    #[test]
    fn test_instance_methods_hide_inherited() {
        let (_, square, _) = shape_hierarchy();
        let methods = square.instance_methods();

        let areas: Vec<_> = methods.iter().filter(|m| m.name() == "area").collect();
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].call(None, &[]).unwrap(), Value::Float(4.0));
        assert!(methods.iter().any(|m| m.name() == "name"));
        assert!(!methods.iter().any(|m| m.name() == "unit"));
        assert_eq!(square.static_methods().len(), 1);
    }

    #[test]
    fn test_find_override() {
        let (shape, square, _) = shape_hierarchy();
        let base = shape
            .instance_methods()
            .into_iter()
            .find(|m| m.name() == "area")
            .unwrap();

        let derived = square.find_override(&base).unwrap();
        assert_eq!(derived.call(None, &[]).unwrap(), Value::Float(4.0));
    }

    #[test]
    fn test_signature_and_ranks() {
        let ty = TypeBuilder::native("Calc")
            .method(
                "add",
                &[&builtin::INT, &builtin::DOUBLE_PRIMITIVE],
                &builtin::DOUBLE_PRIMITIVE,
                |_, _| Ok(Value::Null),
            )
            .build();
        assert_eq!(ty.declared_methods()[0].signature(), "add(int,double)");
        assert!(PrimitiveKind::Int.rank() < PrimitiveKind::Double.rank());
        assert!(PrimitiveKind::Double.rank() < PrimitiveKind::Boolean.rank());
        assert_eq!(PrimitiveKind::Short.integral_range(), Some((-32768, 32767)));
        assert!(PrimitiveKind::Long.is_integral());
        assert!(!PrimitiveKind::Float.is_integral());
    }
}
