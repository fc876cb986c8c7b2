//! Codec contract and the codecs shipped with the engine.
//!
//! A codec converts values of the types it declares to wire nodes and back.
//! Codecs never hold on to their serializer; the owning
//! [`JsonSerializer`] is passed into every call so container codecs can
//! recurse through it.

mod list;
mod map;
mod record;
mod reference;
mod scalar;

pub use list::ListCodec;
pub use map::MapCodec;
pub use record::RecordCodec;
pub use reference::ReferenceCodec;
pub use scalar::{BooleanCodec, NumberCodec, StringCodec};

use crate::error::{MarshalError, UnmarshalError};
use crate::serializer::JsonSerializer;
use crate::state::SerializerState;
use crate::types::Type;
use crate::value::Value;
use crate::wire::{WireKind, WireNode};

/// How well a wire node fits a target type. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectMatch(i32);

impl ObjectMatch {
    /// Exact fit.
    pub const OKAY: ObjectMatch = ObjectMatch(-1);
    /// A null, which fits any nullable type.
    pub const NULL: ObjectMatch = ObjectMatch(0);
    pub const SIMILAR: ObjectMatch = ObjectMatch(1);
    /// Convertible with some loss of intent, e.g. a numeric string.
    pub const ROUGHLY_SIMILAR: ObjectMatch = ObjectMatch(2);

    /// A match with `mismatch` missing or extra members.
    pub const fn new(mismatch: i32) -> Self {
        ObjectMatch(mismatch)
    }

    pub fn mismatch(self) -> i32 {
        self.0
    }

    /// The worse of the two.
    pub fn max(self, other: ObjectMatch) -> ObjectMatch {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }
}

/// A per-type wire codec.
pub trait Codec: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Types registered for direct lookup. May be empty for codecs that only
    /// take part in the fallback search.
    fn serializable_types(&self) -> Vec<Type>;

    /// Wire shapes this codec decodes.
    fn wire_kinds(&self) -> &'static [WireKind];

    /// Whether this codec handles `ty`, optionally arriving as `wire`.
    fn can_serialize(&self, ty: &Type, wire: Option<WireKind>) -> bool {
        self.serializable_types().contains(ty)
            && wire.map_or(true, |kind| self.wire_kinds().contains(&kind))
    }

    fn marshal(
        &self,
        serializer: &JsonSerializer,
        state: &mut SerializerState,
        value: &Value,
    ) -> Result<WireNode, MarshalError>;

    /// Score `wire` against `ty` without building anything.
    fn try_unmarshal(
        &self,
        serializer: &JsonSerializer,
        state: &mut SerializerState,
        ty: &Type,
        wire: &WireNode,
    ) -> Result<ObjectMatch, UnmarshalError>;

    fn unmarshal(
        &self,
        serializer: &JsonSerializer,
        state: &mut SerializerState,
        ty: &Type,
        wire: &WireNode,
    ) -> Result<Value, UnmarshalError>;
}
