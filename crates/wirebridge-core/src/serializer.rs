//! The codec registry and the marshal/unmarshal entry points.
//!
//! Every object goes through the identity tracker before its codec runs, so
//! circular and duplicate references are caught in one place rather than in
//! each codec. Decoding first resolves the concrete type (hint on the node,
//! else the caller's target) and then picks a codec for that type and the
//! node's wire shape.

use crate::codec::{
    BooleanCodec, Codec, ListCodec, MapCodec, NumberCodec, ObjectMatch, RecordCodec, StringCodec,
};
use crate::config::{SerializerConfig, WireConfig};
use crate::error::{BridgeError, MarshalError, Result, UnmarshalError};
use crate::fixup::{rewire, Fixup, PathStep};
use crate::lock;
use crate::state::{Resolved, SerializerState, TrackKey};
use crate::types::{builtin, Type, TypeKind};
use crate::value::Value;
use crate::wire::{WireKind, WireNode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Outcome of marshalling one member.
#[derive(Debug)]
pub enum Marshalled {
    Node(WireNode),
    /// Already written at another location; a fixup was recorded and the
    /// containing codec should leave this member out.
    Elsewhere,
}

#[derive(Clone, Default)]
struct CodecTable {
    by_type: HashMap<Type, Arc<dyn Codec>>,
    /// Registration order; the fallback search walks it backwards.
    ordered: Vec<Arc<dyn Codec>>,
}

impl CodecTable {
    fn insert(&mut self, codec: Arc<dyn Codec>) {
        for ty in codec.serializable_types() {
            self.by_type.insert(ty, Arc::clone(&codec));
        }
        self.ordered.push(codec);
    }
}

fn same_codec(a: &Arc<dyn Codec>, b: &Arc<dyn Codec>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Codec registry plus the name-to-type table used to resolve hints.
pub struct JsonSerializer {
    config: SerializerConfig,
    codecs: Mutex<CodecTable>,
    types: Mutex<HashMap<String, Type>>,
}

impl JsonSerializer {
    /// A serializer knowing the built-in types but no codecs.
    pub fn new(config: SerializerConfig) -> Self {
        let types = builtin::all()
            .into_iter()
            .map(|ty| (ty.name().to_string(), ty))
            .collect();
        Self {
            config,
            codecs: Mutex::new(CodecTable::default()),
            types: Mutex::new(types),
        }
    }

    /// A serializer with the shipped codecs. Later registrations take
    /// precedence in the fallback search, so the record codec goes first.
    pub fn with_default_codecs(config: SerializerConfig) -> Self {
        let serializer = Self::new(config);
        {
            let mut table = lock(&serializer.codecs);
            table.insert(Arc::new(RecordCodec));
            table.insert(Arc::new(ListCodec));
            table.insert(Arc::new(MapCodec));
            table.insert(Arc::new(StringCodec));
            table.insert(Arc::new(NumberCodec));
            table.insert(Arc::new(BooleanCodec));
        }
        serializer
    }

    /// A copy with the same configuration, codecs and known types. Later
    /// registrations on either side do not affect the other.
    pub fn derive(&self) -> Self {
        Self {
            config: self.config,
            codecs: Mutex::new(lock(&self.codecs).clone()),
            types: Mutex::new(lock(&self.types).clone()),
        }
    }

    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    // ========================================
    // Registration
    // ========================================

    /// Register `codec` for each of its declared types. A different codec
    /// already bound to one of them is a conflict; the same codec again is
    /// ignored.
    pub fn register_codec(&self, codec: Arc<dyn Codec>) -> Result<()> {
        let mut table = lock(&self.codecs);
        for ty in codec.serializable_types() {
            if let Some(existing) = table.by_type.get(&ty) {
                if !same_codec(existing, &codec) {
                    return Err(BridgeError::Registration {
                        message: format!(
                            "different codec already registered for {}: {}",
                            ty,
                            existing.name()
                        ),
                    });
                }
            }
        }
        if table.ordered.iter().any(|c| same_codec(c, &codec)) {
            debug!("Codec {} already registered", codec.name());
            return Ok(());
        }
        debug!("Registering codec {}", codec.name());
        table.insert(codec);
        Ok(())
    }

    /// Make `ty`, its supertypes and its field types resolvable by name.
    pub fn register_type(&self, ty: &Type) {
        let mut types = lock(&self.types);
        let mut pending = vec![ty.clone()];
        while let Some(ty) = pending.pop() {
            if types.contains_key(ty.name()) {
                continue;
            }
            pending.extend(ty.supertypes().iter().cloned());
            pending.extend(ty.fields().iter().map(|(_, field)| field.clone()));
            types.insert(ty.name().to_string(), ty);
        }
    }

    pub fn lookup_type(&self, name: &str) -> Option<Type> {
        lock(&self.types).get(name).cloned()
    }

    /// Direct hit first (only if it also accepts `wire`), then the fallback
    /// list from the most recently registered codec backwards.
    pub fn find_codec(&self, ty: &Type, wire: Option<WireKind>) -> Option<Arc<dyn Codec>> {
        let (direct, ordered) = {
            let table = lock(&self.codecs);
            (table.by_type.get(ty).cloned(), table.ordered.clone())
        };
        if let Some(codec) = direct {
            if codec.can_serialize(ty, wire) {
                return Some(codec);
            }
        }
        ordered
            .into_iter()
            .rev()
            .find(|codec| codec.can_serialize(ty, wire))
    }

    // ========================================
    // Marshalling
    // ========================================

    /// Marshal `value` as member `step` of the object tracked as `parent`.
    pub fn marshal(
        &self,
        state: &mut SerializerState,
        parent: Option<TrackKey>,
        value: &Value,
        step: PathStep,
    ) -> std::result::Result<Marshalled, MarshalError> {
        let obj = match value {
            Value::Null => return Ok(Marshalled::Node(WireNode::Null)),
            Value::Object(obj) => obj,
            immediate => return self.encode(state, immediate).map(Marshalled::Node),
        };

        let key = TrackKey::Object(obj.id());
        if let Some(seen) = state.visit(key) {
            let circular = state.is_ancestor(seen, parent);
            if circular && !self.config.fixup_circular_refs {
                return Err(MarshalError::CircularReference {
                    location: state.current_location().child(step).to_string(),
                });
            }
            let encode_again = !circular
                && (!self.config.fixup_duplicates
                    || (!self.config.fixup_duplicate_primitives && obj.is_boxed_scalar()));
            if !encode_again {
                let original = state.location_of(seen);
                debug!(
                    "{} reference to {:?}: fixup to {}",
                    if circular { "Circular" } else { "Duplicate" },
                    obj,
                    original
                );
                state.add_fixup(original, step);
                return Ok(Marshalled::Elsewhere);
            }
            // The new record takes over from the first one.
        }

        let mut scope = state.enter(parent, key, step)?;
        self.encode(&mut scope, value).map(Marshalled::Node)
    }

    fn encode(&self, state: &mut SerializerState, value: &Value) -> std::result::Result<WireNode, MarshalError> {
        let ty = match value.runtime_type() {
            Some(ty) => ty,
            None => return Ok(WireNode::Null),
        };
        if matches!(value, Value::Object(_)) {
            self.register_type(&ty);
        }
        let codec = self
            .find_codec(&ty, None)
            .ok_or_else(|| MarshalError::NoCodec {
                type_name: ty.name().to_string(),
            })?;
        codec.marshal(self, state, value)
    }

    /// Marshal a top-level value under the root step, returning the tree and
    /// the fixups needed to rebuild its sharing.
    pub fn marshal_root(&self, value: &Value) -> std::result::Result<(WireNode, Vec<Fixup>), MarshalError> {
        let mut state = SerializerState::new();
        let step = PathStep::from(WireConfig::RESULT_STEP);
        match self.marshal(&mut state, None, value, step)? {
            Marshalled::Node(node) => Ok((node, state.into_fixups())),
            Marshalled::Elsewhere => Err(MarshalError::Scope(
                "root value resolved to a fixup".into(),
            )),
        }
    }

    /// Encode `value` as `{"result": ..., "fixups": [...]}`.
    pub fn to_json(&self, value: &Value) -> std::result::Result<serde_json::Value, MarshalError> {
        let (node, fixups) = self.marshal_root(value)?;
        let mut doc = serde_json::Map::new();
        doc.insert(WireConfig::RESULT_STEP.to_string(), node.to_json()?);
        if !fixups.is_empty() {
            doc.insert(
                "fixups".to_string(),
                serde_json::Value::Array(fixups.iter().map(Fixup::to_json).collect()),
            );
        }
        Ok(serde_json::Value::Object(doc))
    }

    /// Decode a document produced by [`to_json`](Self::to_json).
    pub fn from_json(&self, doc: &serde_json::Value, target: Option<&Type>) -> Result<Value> {
        if !doc.is_object() {
            return Err(BridgeError::Parse(format!("expected an object, got {doc}")));
        }
        let fixups = match doc.get("fixups") {
            Some(fixups) => Fixup::list_from_json(fixups)?,
            None => Vec::new(),
        };
        let root = rewire(WireNode::from(doc), &fixups)?;
        let result = root
            .as_object()
            .and_then(|obj| obj.get(WireConfig::RESULT_STEP))
            .unwrap_or(WireNode::Null);

        let mut state = SerializerState::new();
        let value = self.unmarshal(&mut state, target, &result);
        root.dismantle();
        Ok(value?)
    }

    // ========================================
    // Unmarshalling
    // ========================================

    fn explicit_hint(&self, wire: &WireNode) -> std::result::Result<Option<Type>, UnmarshalError> {
        match wire.type_hint() {
            Some(name) => match self.lookup_type(&name) {
                Some(ty) => Ok(Some(ty)),
                None => Err(UnmarshalError::UnknownTypeHint { name }),
            },
            None => Ok(None),
        }
    }

    fn implicit_hint(wire: &WireNode) -> Option<Type> {
        let ty = match wire {
            WireNode::String(_) => &builtin::STRING,
            WireNode::Number(n) if n.is_i64() || n.is_u64() => &builtin::INTEGER,
            WireNode::Number(_) => &builtin::DOUBLE,
            WireNode::Bool(_) => &builtin::BOOLEAN,
            WireNode::Array(_) => &builtin::LIST,
            WireNode::Null | WireNode::Object(_) => return None,
        };
        Some(Type::clone(ty))
    }

    /// The concrete type to decode `wire` as.
    fn resolve_type(&self, target: Option<&Type>, wire: &WireNode) -> std::result::Result<Type, UnmarshalError> {
        let explicit = self.explicit_hint(wire)?;
        match target {
            Some(target) => {
                if let Some(hinted) = explicit {
                    if target.is_assignable_from(&hinted) {
                        return Ok(hinted);
                    }
                }
                if target.kind() == TypeKind::Any {
                    if let Some(implied) = Self::implicit_hint(wire) {
                        return Ok(implied);
                    }
                }
                Ok(target.clone())
            }
            None => explicit
                .or_else(|| Self::implicit_hint(wire))
                .ok_or(UnmarshalError::NoTypeHint),
        }
    }

    fn codec_for(&self, ty: &Type, wire: &WireNode) -> std::result::Result<Arc<dyn Codec>, UnmarshalError> {
        self.find_codec(ty, Some(wire.kind()))
            .ok_or_else(|| UnmarshalError::NoCodec {
                wire: format!("{:?}", wire.kind()),
                type_name: ty.name().to_string(),
            })
    }

    /// Decode `wire` as `target` (or as its hinted type).
    pub fn unmarshal(
        &self,
        state: &mut SerializerState,
        target: Option<&Type>,
        wire: &WireNode,
    ) -> std::result::Result<Value, UnmarshalError> {
        if let Some(node) = wire.node_id() {
            let key = TrackKey::Node(node);
            if let Some(seen) = state.visit(key) {
                return match state.serialized(seen) {
                    Some(Resolved::Value(value)) => Ok(value.clone()),
                    _ => Err(UnmarshalError::UnresolvedReference { node: node.get() }),
                };
            }
            state.store(key);
        }

        if wire.is_null() {
            return match target {
                Some(ty) if ty.is_primitive() => Err(UnmarshalError::NullAssignment {
                    type_name: ty.name().to_string(),
                }),
                _ => Ok(Value::Null),
            };
        }

        let ty = self.resolve_type(target, wire)?;
        let codec = self.codec_for(&ty, wire)?;
        codec.unmarshal(self, state, &ty, wire)
    }

    /// Score how well `wire` would decode as `target`.
    pub fn try_unmarshal(
        &self,
        state: &mut SerializerState,
        target: Option<&Type>,
        wire: &WireNode,
    ) -> std::result::Result<ObjectMatch, UnmarshalError> {
        let key = wire.node_id().map(TrackKey::Node);
        if let Some(key) = key {
            if let Some(seen) = state.visit(key) {
                return Ok(match state.serialized(seen) {
                    Some(Resolved::Match(m)) => *m,
                    _ => ObjectMatch::OKAY,
                });
            }
            state.store(key);
        }

        if wire.is_null() {
            return match target {
                Some(ty) if ty.is_primitive() => Err(UnmarshalError::NullAssignment {
                    type_name: ty.name().to_string(),
                }),
                _ => Ok(ObjectMatch::NULL),
            };
        }

        let ty = self.resolve_type(target, wire)?;
        let codec = self.codec_for(&ty, wire)?;
        let quality = codec.try_unmarshal(self, state, &ty, wire)?;
        if let Some(key) = key {
            if let Err(e) = state.set_serialized(key, Resolved::Match(quality)) {
                warn!("Could not memoise match quality: {}", e);
            }
        }
        Ok(quality)
    }
}

impl Default for JsonSerializer {
    fn default() -> Self {
        Self::with_default_codecs(SerializerConfig::default())
    }
}
