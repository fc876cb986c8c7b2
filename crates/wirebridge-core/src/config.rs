//! Centralized configuration for the marshalling engine.
//!
//! Wire-level constants live in const holder structs; the serializer's
//! behavioural toggles are a serde-loadable [`SerializerConfig`].

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Reserved keys and markers of the wire format.
pub struct WireConfig;

impl WireConfig {
    /// Key carrying the concrete decode-time type of a map node.
    pub const TYPE_HINT_KEY: &'static str = "javaClass";
    /// Key marking a node as a handle rather than an inlined value.
    pub const HANDLE_TYPE_KEY: &'static str = "JSONRPCType";
    pub const HANDLE_ID_KEY: &'static str = "objectID";
    pub const REFERENCE_MARKER: &'static str = "Reference";
    pub const CALLABLE_REFERENCE_MARKER: &'static str = "CallableReference";
    /// Member holding the entries of an encoded map.
    pub const MAP_MEMBER_KEY: &'static str = "map";
    /// Root step of a marshalled result tree.
    pub const RESULT_STEP: &'static str = "result";
    /// Most null slots a fixup may add past the end of an array.
    pub const MAX_FIXUP_PADDING: usize = 1024;
}

/// Method-name conventions understood by dispatch.
pub struct DispatchConfig;

impl DispatchConfig {
    pub const LIST_METHODS: &'static str = "system.listMethods";
    pub const OBJECT_METHOD_PREFIX: &'static str = ".obj";
    pub const CALLABLE_REFERENCE_METHOD_PREFIX: &'static str = ".ref";
    pub const CONSTRUCTOR_FLAG: &'static str = "$constructor";
}

/// Response codes.
pub struct RpcCodes;

impl RpcCodes {
    pub const SUCCESS: i32 = 0;
    pub const REMOTE_EXCEPTION: i32 = 490;
    pub const PARSE: i32 = 590;
    pub const NO_METHOD: i32 = 591;
    pub const UNMARSHAL: i32 = 592;
    pub const MARSHAL: i32 = 593;
    pub const FIXUP: i32 = 594;
    pub const NO_CONSTRUCTOR: i32 = 595;
    pub const ILLEGAL_OPERATION: i32 = 596;
}

/// Behavioural toggles of a [`JsonSerializer`](crate::JsonSerializer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Emit a fixup for circular references instead of failing.
    pub fixup_circular_refs: bool,
    /// Emit a fixup for duplicate (shared, non-circular) objects instead of
    /// encoding them again.
    pub fixup_duplicates: bool,
    /// Also emit fixups for duplicated boxed strings, numbers and booleans.
    pub fixup_duplicate_primitives: bool,
    /// Write the type hint key on map and record nodes.
    pub marshal_class_hints: bool,
    /// Write record fields whose value is null.
    pub marshal_null_attributes: bool,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            fixup_circular_refs: false,
            fixup_duplicates: false,
            fixup_duplicate_primitives: false,
            marshal_class_hints: true,
            marshal_null_attributes: true,
        }
    }
}

impl SerializerConfig {
    /// Configuration with every fixup toggle switched on.
    pub fn with_all_fixups() -> Self {
        Self {
            fixup_circular_refs: true,
            fixup_duplicates: true,
            fixup_duplicate_primitives: true,
            ..Self::default()
        }
    }

    pub fn circular_fixups(mut self, enabled: bool) -> Self {
        self.fixup_circular_refs = enabled;
        self
    }

    pub fn duplicate_fixups(mut self, enabled: bool) -> Self {
        self.fixup_duplicates = enabled;
        self
    }

    pub fn primitive_duplicate_fixups(mut self, enabled: bool) -> Self {
        self.fixup_duplicate_primitives = enabled;
        self
    }

    pub fn class_hints(mut self, enabled: bool) -> Self {
        self.marshal_class_hints = enabled;
        self
    }

    pub fn null_attributes(mut self, enabled: bool) -> Self {
        self.marshal_null_attributes = enabled;
        self
    }

    /// Load a configuration from a JSON file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| BridgeError::io_with_path(e, path))?;

        serde_json::from_str(&content).map_err(|e| BridgeError::Config {
            message: format!(
                "Failed to parse serializer config from {}: {}",
                path.display(),
                e
            ),
        })
    }
}
