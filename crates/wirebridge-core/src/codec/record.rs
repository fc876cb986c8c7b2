//! Records travel field by field as a JSON object tagged with their type.

use super::{Codec, ObjectMatch};
use crate::config::WireConfig;
use crate::error::{MarshalError, UnmarshalError};
use crate::fixup::PathStep;
use crate::serializer::{JsonSerializer, Marshalled};
use crate::state::{Resolved, SerializerState, TrackKey};
use crate::types::{Type, TypeKind};
use crate::value::{ObjectRef, Value};
use crate::wire::{WireKind, WireNode, WireObject};

/// Takes part in the fallback search only; it serves every record type.
pub struct RecordCodec;

fn fields_of(wire: &WireNode) -> Result<&WireObject, UnmarshalError> {
    wire.as_object()
        .ok_or_else(|| UnmarshalError::mismatch(format!("not an object: {wire:?}")))
}

fn is_reserved(key: &str) -> bool {
    key == WireConfig::TYPE_HINT_KEY
}

impl Codec for RecordCodec {
    fn name(&self) -> &'static str {
        "record"
    }

    fn serializable_types(&self) -> Vec<Type> {
        Vec::new()
    }

    fn wire_kinds(&self) -> &'static [WireKind] {
        &[WireKind::Object]
    }

    fn can_serialize(&self, ty: &Type, wire: Option<WireKind>) -> bool {
        ty.kind() == TypeKind::Record && wire.map_or(true, |kind| kind == WireKind::Object)
    }

    fn marshal(
        &self,
        serializer: &JsonSerializer,
        state: &mut SerializerState,
        value: &Value,
    ) -> Result<WireNode, MarshalError> {
        let obj = value.as_object().ok_or_else(|| MarshalError::Codec {
            type_name: "record".into(),
            message: format!("not an object: {value:?}"),
        })?;
        let config = serializer.config();
        let out = WireObject::new();
        if config.marshal_class_hints {
            out.insert(WireConfig::TYPE_HINT_KEY, WireNode::string(obj.type_of().name()));
        }
        let parent = Some(TrackKey::Object(obj.id()));
        for (field, item) in obj.entries() {
            if item.is_null() && !config.marshal_null_attributes {
                continue;
            }
            let node = serializer
                .marshal(state, parent, &item, PathStep::Key(field.clone()))
                .map_err(|e| e.within(format!("bean {} field {}", obj.type_of(), field)))?;
            if let Marshalled::Node(node) = node {
                out.insert(field, node);
            }
        }
        Ok(WireNode::Object(out))
    }

    /// Missing declared fields and unknown wire fields each add one to the
    /// mismatch; a node sharing no field at all with the type is rejected.
    fn try_unmarshal(
        &self,
        serializer: &JsonSerializer,
        state: &mut SerializerState,
        ty: &Type,
        wire: &WireNode,
    ) -> Result<ObjectMatch, UnmarshalError> {
        let obj = fields_of(wire)?;
        let present = ty
            .fields()
            .iter()
            .filter(|(name, _)| obj.contains_key(name))
            .count();
        let mut mismatch = ty.fields().len() - present;
        if present == 0 && !ty.fields().is_empty() {
            return Err(UnmarshalError::mismatch(format!(
                "bean {ty} has no matches"
            )));
        }

        state.set_serialized(TrackKey::Node(obj.id()), Resolved::Match(ObjectMatch::OKAY))?;
        let mut quality = ObjectMatch::OKAY;
        for (key, item) in obj.entries() {
            if is_reserved(&key) {
                continue;
            }
            match ty.field(&key) {
                Some(field_type) => {
                    let field_match = serializer
                        .try_unmarshal(state, Some(field_type), &item)
                        .map_err(|e| e.within(format!("bean {ty} field {key}")))?;
                    quality = quality.max(field_match);
                }
                None if ty.fields().is_empty() => {}
                None => mismatch += 1,
            }
        }
        let mismatch = i32::try_from(mismatch).unwrap_or(i32::MAX);
        Ok(quality.max(ObjectMatch::new(mismatch)))
    }

    fn unmarshal(
        &self,
        serializer: &JsonSerializer,
        state: &mut SerializerState,
        ty: &Type,
        wire: &WireNode,
    ) -> Result<Value, UnmarshalError> {
        let obj = fields_of(wire)?;
        let record = ObjectRef::record(ty);
        state.set_serialized(
            TrackKey::Node(obj.id()),
            Resolved::Value(Value::Object(record.clone())),
        )?;
        for (key, item) in obj.entries() {
            if is_reserved(&key) {
                continue;
            }
            // Types without declared fields take whatever the node carries.
            let field_type = match ty.field(&key) {
                Some(field_type) => Some(field_type),
                None if ty.fields().is_empty() => None,
                None => continue,
            };
            let value = serializer
                .unmarshal(state, field_type, &item)
                .map_err(|e| e.within(format!("bean {ty} field {key}")))?;
            record.set(key, value);
        }
        Ok(Value::Object(record))
    }
}
