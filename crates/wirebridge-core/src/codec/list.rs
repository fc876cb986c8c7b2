//! Lists travel as plain JSON arrays.

use super::{Codec, ObjectMatch};
use crate::error::{MarshalError, UnmarshalError};
use crate::fixup::PathStep;
use crate::serializer::{JsonSerializer, Marshalled};
use crate::state::{Resolved, SerializerState, TrackKey};
use crate::types::{builtin, Type, TypeKind};
use crate::value::{Body, ObjectRef, Value};
use crate::wire::{WireArray, WireKind, WireNode};

pub struct ListCodec;

fn elements(wire: &WireNode) -> Result<&WireArray, UnmarshalError> {
    wire.as_array()
        .ok_or_else(|| UnmarshalError::mismatch(format!("not an array: {wire:?}")))
}

impl Codec for ListCodec {
    fn name(&self) -> &'static str {
        "list"
    }

    fn serializable_types(&self) -> Vec<Type> {
        vec![Type::clone(&builtin::LIST)]
    }

    fn wire_kinds(&self) -> &'static [WireKind] {
        &[WireKind::Array]
    }

    /// Any list-kind type, not only the built-in one.
    fn can_serialize(&self, ty: &Type, wire: Option<WireKind>) -> bool {
        ty.kind() == TypeKind::List && wire.map_or(true, |kind| kind == WireKind::Array)
    }

    fn marshal(
        &self,
        serializer: &JsonSerializer,
        state: &mut SerializerState,
        value: &Value,
    ) -> Result<WireNode, MarshalError> {
        let obj = value.as_object().ok_or_else(|| MarshalError::Codec {
            type_name: "List".into(),
            message: format!("not an object: {value:?}"),
        })?;
        let parent = Some(TrackKey::Object(obj.id()));
        let out = WireArray::new();
        for (index, item) in obj.items().iter().enumerate() {
            let node = serializer
                .marshal(state, parent, item, PathStep::Index(index))
                .map_err(|e| e.within(format!("element {index}")))?;
            match node {
                Marshalled::Node(node) => out.push(node),
                // Keep the index aligned; the fixup fills the slot.
                Marshalled::Elsewhere => out.push(WireNode::Null),
            }
        }
        Ok(WireNode::Array(out))
    }

    fn try_unmarshal(
        &self,
        serializer: &JsonSerializer,
        state: &mut SerializerState,
        _: &Type,
        wire: &WireNode,
    ) -> Result<ObjectMatch, UnmarshalError> {
        let arr = elements(wire)?;
        state.set_serialized(TrackKey::Node(arr.id()), Resolved::Match(ObjectMatch::OKAY))?;
        let mut quality = ObjectMatch::OKAY;
        for (index, item) in arr.items().iter().enumerate() {
            let item_match = serializer
                .try_unmarshal(state, None, item)
                .map_err(|e| e.within(format!("element {index}")))?;
            quality = quality.max(item_match);
        }
        Ok(quality)
    }

    fn unmarshal(
        &self,
        serializer: &JsonSerializer,
        state: &mut SerializerState,
        ty: &Type,
        wire: &WireNode,
    ) -> Result<Value, UnmarshalError> {
        let arr = elements(wire)?;
        let list = ObjectRef::new(ty, Body::List(Vec::with_capacity(arr.len())));
        state.set_serialized(TrackKey::Node(arr.id()), Resolved::Value(Value::Object(list.clone())))?;
        for (index, item) in arr.items().iter().enumerate() {
            let value = serializer
                .unmarshal(state, None, item)
                .map_err(|e| e.within(format!("element {index}")))?;
            list.push(value);
        }
        Ok(Value::Object(list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerializerConfig;
    use serde_json::json;

    #[test]
    fn test_list_round_trip() {
        let ser = JsonSerializer::with_default_codecs(SerializerConfig::default());
        let inner = ObjectRef::list(vec![Value::Bool(true)]);
        let list = Value::Object(ObjectRef::list(vec![
            Value::from("a"),
            Value::Int(2),
            Value::Null,
            Value::Object(inner),
        ]));

        let doc = ser.to_json(&list).unwrap();
        assert_eq!(doc, json!({"result": ["a", 2, null, [true]]}));
        assert_eq!(ser.from_json(&doc, None).unwrap(), list);
    }

    #[test]
    fn test_self_containing_list_decodes_to_cycle() {
        let ser = JsonSerializer::default();
        let doc = json!({"result": [1, null], "fixups": [[["result", 1], ["result"]]]});

        let decoded = ser.from_json(&doc, None).unwrap();
        let items = decoded.as_object().unwrap().items();
        assert_eq!(items[0], Value::Int(1));
        assert!(items[1].same_object(&decoded));

        if let Body::List(items) = &mut *decoded.as_object().unwrap().write() {
            items.clear();
        };
    }

    #[test]
    fn test_element_errors_name_the_index() {
        let ser = JsonSerializer::default();
        let wire = WireNode::from(&json!([1, {"no": "hint"}]));
        let err = ser
            .unmarshal(&mut SerializerState::new(), None, &wire)
            .unwrap_err();
        assert!(err.to_string().starts_with("element 1"));
        assert!(matches!(err.root_cause(), UnmarshalError::NoTypeHint));
    }
}
