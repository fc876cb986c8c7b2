//! Maps travel as `{"javaClass": <type>, "map": {key: value, ...}}`.
//!
//! The inner `map` object is pushed on the identity tracker as its own frame,
//! so fixup paths into a map read `[..., "map", key]`.

use super::{Codec, ObjectMatch};
use crate::config::WireConfig;
use crate::error::{MarshalError, UnmarshalError};
use crate::fixup::PathStep;
use crate::serializer::{JsonSerializer, Marshalled};
use crate::state::{Resolved, SerializerState, TrackKey};
use crate::types::{builtin, Type, TypeKind};
use crate::value::{Body, ObjectRef, Value};
use crate::wire::{WireKind, WireNode, WireObject};
use std::collections::BTreeMap;

pub struct MapCodec;

fn entries_of(wire: &WireNode) -> Result<WireObject, UnmarshalError> {
    wire.as_object()
        .and_then(|obj| obj.get(WireConfig::MAP_MEMBER_KEY))
        .and_then(|map| map.as_object().cloned())
        .ok_or_else(|| UnmarshalError::mismatch("map missing"))
}

impl Codec for MapCodec {
    fn name(&self) -> &'static str {
        "map"
    }

    fn serializable_types(&self) -> Vec<Type> {
        vec![Type::clone(&builtin::MAP)]
    }

    fn wire_kinds(&self) -> &'static [WireKind] {
        &[WireKind::Object]
    }

    fn can_serialize(&self, ty: &Type, wire: Option<WireKind>) -> bool {
        ty.kind() == TypeKind::Map && wire.map_or(true, |kind| kind == WireKind::Object)
    }

    fn marshal(
        &self,
        serializer: &JsonSerializer,
        state: &mut SerializerState,
        value: &Value,
    ) -> Result<WireNode, MarshalError> {
        let obj = value.as_object().ok_or_else(|| MarshalError::Codec {
            type_name: "Map".into(),
            message: format!("not an object: {value:?}"),
        })?;
        let out = WireObject::new();
        if serializer.config().marshal_class_hints {
            out.insert(WireConfig::TYPE_HINT_KEY, WireNode::string(obj.type_of().name()));
        }
        let entries = WireObject::new();
        out.insert(WireConfig::MAP_MEMBER_KEY, WireNode::Object(entries.clone()));

        let frame = TrackKey::Node(entries.id());
        let mut scope = state.enter(
            Some(TrackKey::Object(obj.id())),
            frame,
            PathStep::from(WireConfig::MAP_MEMBER_KEY),
        )?;
        for (key, item) in obj.entries() {
            let node = serializer
                .marshal(&mut scope, Some(frame), &item, PathStep::Key(key.clone()))
                .map_err(|e| e.within(format!("map key {key}")))?;
            if let Marshalled::Node(node) = node {
                entries.insert(key, node);
            }
        }
        Ok(WireNode::Object(out))
    }

    fn try_unmarshal(
        &self,
        serializer: &JsonSerializer,
        state: &mut SerializerState,
        _: &Type,
        wire: &WireNode,
    ) -> Result<ObjectMatch, UnmarshalError> {
        let entries = entries_of(wire)?;
        if let Some(node) = wire.node_id() {
            state.set_serialized(TrackKey::Node(node), Resolved::Match(ObjectMatch::OKAY))?;
        }
        let mut quality = ObjectMatch::OKAY;
        for (key, item) in entries.entries() {
            let item_match = serializer
                .try_unmarshal(state, None, &item)
                .map_err(|e| e.within(format!("map key {key}")))?;
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
        let entries = entries_of(wire)?;
        let map = ObjectRef::new(ty, Body::Map(BTreeMap::new()));
        if let Some(node) = wire.node_id() {
            state.set_serialized(TrackKey::Node(node), Resolved::Value(Value::Object(map.clone())))?;
        }
        for (key, item) in entries.entries() {
            let value = serializer
                .unmarshal(state, None, &item)
                .map_err(|e| e.within(format!("map key {key}")))?;
            map.set(key, value);
        }
        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerializerConfig;
    use serde_json::json;

    fn sample() -> ObjectRef {
        let mut entries = BTreeMap::new();
        entries.insert("one".to_string(), Value::Int(1));
        entries.insert("name".to_string(), Value::from("x"));
        ObjectRef::map(entries)
    }

    #[test]
    fn test_map_wire_shape() {
        let ser = JsonSerializer::default();
        let doc = ser.to_json(&Value::Object(sample())).unwrap();
        assert_eq!(
            doc,
            json!({"result": {"javaClass": "Map", "map": {"one": 1, "name": "x"}}})
        );
        assert_eq!(
            ser.from_json(&doc, None).unwrap(),
            Value::Object(sample())
        );
    }

    #[test]
    fn test_fixup_paths_run_through_map_member() {
        let ser = JsonSerializer::with_default_codecs(SerializerConfig::with_all_fixups());
        let shared = ObjectRef::list(vec![Value::Int(1)]);
        let map = sample();
        map.set("a", Value::Object(shared.clone()));
        map.set("b", Value::Object(shared));

        let doc = ser.to_json(&Value::Object(map)).unwrap();
        assert_eq!(
            doc["fixups"],
            json!([[["result", "map", "b"], ["result", "map", "a"]]])
        );

        let decoded = ser.from_json(&doc, None).unwrap();
        let decoded = decoded.as_object().unwrap();
        assert!(decoded.get("a").unwrap().same_object(&decoded.get("b").unwrap()));
    }

    #[test]
    fn test_missing_map_member() {
        let ser = JsonSerializer::default();
        let wire = WireNode::from(&json!({"javaClass": "Map"}));
        let err = ser
            .unmarshal(&mut SerializerState::new(), None, &wire)
            .unwrap_err();
        assert_eq!(err.to_string(), "map missing");
    }
}
