//! String, number and boolean codecs.

use super::{Codec, ObjectMatch};
use crate::error::{MarshalError, UnmarshalError};
use crate::serializer::JsonSerializer;
use crate::state::SerializerState;
use crate::types::{builtin, PrimitiveKind, ScalarKind, Type, TypeKind};
use crate::value::Value;
use crate::wire::{WireKind, WireNode};

fn expected(ty: &Type, value: &Value) -> MarshalError {
    MarshalError::Codec {
        type_name: ty.name().to_string(),
        message: format!("unexpected value {value:?}"),
    }
}

pub struct StringCodec;

impl Codec for StringCodec {
    fn name(&self) -> &'static str {
        "string"
    }

    fn serializable_types(&self) -> Vec<Type> {
        vec![Type::clone(&builtin::STRING)]
    }

    fn wire_kinds(&self) -> &'static [WireKind] {
        &[WireKind::String]
    }

    fn marshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        value: &Value,
    ) -> Result<WireNode, MarshalError> {
        value
            .as_str()
            .map(WireNode::String)
            .ok_or_else(|| expected(&builtin::STRING, value))
    }

    fn try_unmarshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        _: &Type,
        wire: &WireNode,
    ) -> Result<ObjectMatch, UnmarshalError> {
        match wire {
            WireNode::String(_) => Ok(ObjectMatch::OKAY),
            other => Err(UnmarshalError::mismatch(format!(
                "not a string: {other:?}"
            ))),
        }
    }

    fn unmarshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        _: &Type,
        wire: &WireNode,
    ) -> Result<Value, UnmarshalError> {
        match wire {
            WireNode::String(s) => Ok(Value::Str(s.clone())),
            other => Err(UnmarshalError::mismatch(format!(
                "not a string: {other:?}"
            ))),
        }
    }
}

/// Which flavour of number a target type wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberShape {
    Integral,
    Floating,
    Either,
}

fn shape_of(ty: &Type) -> NumberShape {
    match ty.kind() {
        TypeKind::Scalar(ScalarKind::Integer | ScalarKind::Long) => NumberShape::Integral,
        TypeKind::Scalar(ScalarKind::Double) => NumberShape::Floating,
        TypeKind::Primitive(kind) if kind.is_integral() => NumberShape::Integral,
        TypeKind::Primitive(_) => NumberShape::Floating,
        _ => NumberShape::Either,
    }
}

/// A number as it appears on the wire: either a number node or a string
/// holding one.
fn read_number(wire: &WireNode) -> Result<(serde_json::Number, bool), UnmarshalError> {
    match wire {
        WireNode::Number(n) => Ok((n.clone(), false)),
        WireNode::String(s) => {
            let trimmed = s.trim();
            if let Ok(n) = trimmed.parse::<i64>() {
                return Ok((n.into(), true));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(|n| (n, true))
                .ok_or_else(|| UnmarshalError::mismatch(format!("not a number: {s:?}")))
        }
        other => Err(UnmarshalError::mismatch(format!(
            "not a number: {other:?}"
        ))),
    }
}

/// Inclusive bounds a target type puts on an integer.
fn integral_range(ty: &Type) -> Option<(i64, i64)> {
    match ty.kind() {
        TypeKind::Scalar(ScalarKind::Integer) => PrimitiveKind::Int.integral_range(),
        TypeKind::Primitive(kind) => kind.integral_range(),
        _ => None,
    }
}

fn to_value(n: &serde_json::Number, ty: &Type) -> Result<Value, UnmarshalError> {
    let out_of_range = || UnmarshalError::mismatch(format!("{n} is out of range for {ty}"));
    match (shape_of(ty), n.as_i64()) {
        (NumberShape::Floating, _) => {
            let x = n.as_f64().ok_or_else(out_of_range)?;
            if ty.primitive_kind() == Some(PrimitiveKind::Float) && x.abs() > f64::from(f32::MAX) {
                return Err(out_of_range());
            }
            Ok(Value::Float(x))
        }
        (_, Some(i)) => match integral_range(ty) {
            Some((min, max)) if i < min || i > max => Err(out_of_range()),
            _ => Ok(Value::Int(i)),
        },
        (NumberShape::Integral, None) => Err(UnmarshalError::mismatch(format!(
            "{n} is not an integer, expected {ty}"
        ))),
        (NumberShape::Either, None) => n.as_f64().map(Value::Float).ok_or_else(out_of_range),
    }
}

/// Boxed and primitive numbers.
pub struct NumberCodec;

impl Codec for NumberCodec {
    fn name(&self) -> &'static str {
        "number"
    }

    fn serializable_types(&self) -> Vec<Type> {
        [
            &builtin::NUMBER,
            &builtin::INTEGER,
            &builtin::LONG,
            &builtin::DOUBLE,
            &builtin::BYTE,
            &builtin::SHORT,
            &builtin::INT,
            &builtin::LONG_PRIMITIVE,
            &builtin::FLOAT,
            &builtin::DOUBLE_PRIMITIVE,
        ]
        .into_iter()
        .map(|ty| Type::clone(ty))
        .collect()
    }

    fn wire_kinds(&self) -> &'static [WireKind] {
        &[WireKind::Number, WireKind::String]
    }

    fn marshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        value: &Value,
    ) -> Result<WireNode, MarshalError> {
        match value.scalar() {
            Some(Value::Int(n)) => Ok(WireNode::from(n)),
            Some(Value::Float(x)) => serde_json::Number::from_f64(x)
                .map(WireNode::Number)
                .ok_or_else(|| MarshalError::Codec {
                    type_name: "Double".into(),
                    message: format!("{x} has no JSON representation"),
                }),
            _ => Err(expected(&builtin::NUMBER, value)),
        }
    }

    fn try_unmarshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        ty: &Type,
        wire: &WireNode,
    ) -> Result<ObjectMatch, UnmarshalError> {
        let (n, from_string) = read_number(wire)?;
        to_value(&n, ty)?;
        Ok(if from_string {
            ObjectMatch::ROUGHLY_SIMILAR
        } else {
            ObjectMatch::OKAY
        })
    }

    fn unmarshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        ty: &Type,
        wire: &WireNode,
    ) -> Result<Value, UnmarshalError> {
        let (n, _) = read_number(wire)?;
        to_value(&n, ty)
    }
}

/// Boxed and primitive booleans. The strings "true" and "false" are
/// accepted as a rough match.
pub struct BooleanCodec;

impl BooleanCodec {
    fn read(wire: &WireNode) -> Result<(bool, ObjectMatch), UnmarshalError> {
        match wire {
            WireNode::Bool(b) => Ok((*b, ObjectMatch::OKAY)),
            WireNode::String(s) if s == "true" => Ok((true, ObjectMatch::ROUGHLY_SIMILAR)),
            WireNode::String(s) if s == "false" => Ok((false, ObjectMatch::ROUGHLY_SIMILAR)),
            other => Err(UnmarshalError::mismatch(format!(
                "not a boolean: {other:?}"
            ))),
        }
    }
}

impl Codec for BooleanCodec {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn serializable_types(&self) -> Vec<Type> {
        vec![
            Type::clone(&builtin::BOOLEAN),
            Type::clone(&builtin::BOOLEAN_PRIMITIVE),
        ]
    }

    fn wire_kinds(&self) -> &'static [WireKind] {
        &[WireKind::Bool, WireKind::String]
    }

    fn marshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        value: &Value,
    ) -> Result<WireNode, MarshalError> {
        value
            .as_bool()
            .map(WireNode::Bool)
            .ok_or_else(|| expected(&builtin::BOOLEAN, value))
    }

    fn try_unmarshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        _: &Type,
        wire: &WireNode,
    ) -> Result<ObjectMatch, UnmarshalError> {
        Self::read(wire).map(|(_, quality)| quality)
    }

    fn unmarshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        _: &Type,
        wire: &WireNode,
    ) -> Result<Value, UnmarshalError> {
        Self::read(wire).map(|(b, _)| Value::Bool(b))
    }
}
