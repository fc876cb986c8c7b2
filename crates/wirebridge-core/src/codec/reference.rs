//! Handles for objects that stay on this side of the wire.
//!
//! A session that registers reference types gets its own copy of the
//! serializer with this codec added. Objects of those types are sent as
//! `{"JSONRPCType": "Reference" | "CallableReference", "javaClass": <type>,
//! "objectID": <id>}` and resolved back through the session's handle tables.

use super::{Codec, ObjectMatch};
use crate::bridge::Bridge;
use crate::config::WireConfig;
use crate::error::{MarshalError, UnmarshalError};
use crate::serializer::JsonSerializer;
use crate::state::SerializerState;
use crate::types::Type;
use crate::value::Value;
use crate::wire::{WireKind, WireNode, WireObject};
use std::sync::{Arc, Weak};
use tracing::debug;

pub struct ReferenceCodec {
    bridge: Weak<Bridge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleKind {
    Reference,
    Callable,
}

impl ReferenceCodec {
    pub fn new(bridge: Weak<Bridge>) -> Self {
        Self { bridge }
    }

    fn bridge(&self) -> Option<Arc<Bridge>> {
        self.bridge.upgrade()
    }

    fn read_handle(wire: &WireNode) -> Result<(HandleKind, u64), UnmarshalError> {
        let obj = wire
            .as_object()
            .ok_or_else(|| UnmarshalError::mismatch(format!("not a handle: {wire:?}")))?;
        let kind = match obj.get_str(WireConfig::HANDLE_TYPE_KEY).as_deref() {
            Some(WireConfig::REFERENCE_MARKER) => HandleKind::Reference,
            Some(WireConfig::CALLABLE_REFERENCE_MARKER) => HandleKind::Callable,
            _ => return Err(UnmarshalError::mismatch("not a handle: no handle marker")),
        };
        let id = match obj.get(WireConfig::HANDLE_ID_KEY) {
            Some(WireNode::Number(n)) => n.as_u64(),
            _ => None,
        }
        .ok_or_else(|| UnmarshalError::mismatch("handle without a valid objectID"))?;
        Ok((kind, id))
    }
}

impl Codec for ReferenceCodec {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn serializable_types(&self) -> Vec<Type> {
        Vec::new()
    }

    fn wire_kinds(&self) -> &'static [WireKind] {
        &[WireKind::Object]
    }

    fn can_serialize(&self, ty: &Type, wire: Option<WireKind>) -> bool {
        if !wire.map_or(true, |kind| kind == WireKind::Object) {
            return false;
        }
        self.bridge()
            .map(|bridge| bridge.is_reference(ty) || bridge.is_callable_reference(ty))
            .unwrap_or(false)
    }

    fn marshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        value: &Value,
    ) -> Result<WireNode, MarshalError> {
        let obj = value.as_object().ok_or_else(|| MarshalError::Codec {
            type_name: "reference".into(),
            message: format!("not an object: {value:?}"),
        })?;
        let bridge = self.bridge().ok_or_else(|| MarshalError::Codec {
            type_name: obj.type_of().name().to_string(),
            message: "session bridge is gone".into(),
        })?;
        let ty = obj.type_of();
        let id = obj.id().get();

        let marker = if bridge.is_reference(ty) {
            bridge.add_reference(obj);
            WireConfig::REFERENCE_MARKER
        } else {
            bridge.export_handle(obj);
            WireConfig::CALLABLE_REFERENCE_MARKER
        };
        debug!("Marshalling {:?} as {} {}", obj, marker, id);

        let out = WireObject::new();
        out.insert(WireConfig::HANDLE_TYPE_KEY, WireNode::string(marker));
        out.insert(WireConfig::TYPE_HINT_KEY, WireNode::string(ty.name()));
        out.insert(WireConfig::HANDLE_ID_KEY, WireNode::Number(id.into()));
        Ok(WireNode::Object(out))
    }

    fn try_unmarshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        _: &Type,
        wire: &WireNode,
    ) -> Result<ObjectMatch, UnmarshalError> {
        Self::read_handle(wire).map(|_| ObjectMatch::OKAY)
    }

    fn unmarshal(
        &self,
        _: &JsonSerializer,
        _: &mut SerializerState,
        _: &Type,
        wire: &WireNode,
    ) -> Result<Value, UnmarshalError> {
        let (kind, id) = Self::read_handle(wire)?;
        let bridge = self
            .bridge()
            .ok_or(UnmarshalError::UnknownHandle { id })?;
        let found = match kind {
            HandleKind::Reference => bridge.get_reference(id),
            HandleKind::Callable => bridge.lookup_handle(id),
        };
        found
            .map(Value::Object)
            .ok_or(UnmarshalError::UnknownHandle { id })
    }
}
