//! wirebridge - JSON-RPC marshalling engine.
//!
//! Converts in-memory object graphs, cycles and shared sub-objects
//! included, to a tree-shaped JSON wire format plus a list of fixups, and
//! back. A [`Bridge`] exports classes and objects to callers and resolves
//! which overload a request names.
//!
//! # Example
//!
//! ```
//! use wirebridge::types::{builtin, TypeBuilder};
//! use wirebridge::{Bridge, JsonSerializer, ObjectRef, Value};
//! use serde_json::json;
//!
//! let calc = TypeBuilder::native("Calc")
//!     .method("add", &[&builtin::INT, &builtin::INT], &builtin::INT, |_, args| {
//!         Ok(Value::Int(args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0)))
//!     })
//!     .build();
//!
//! let bridge = Bridge::new_root(JsonSerializer::default());
//! bridge.register_object("calc", ObjectRef::native(&calc, ()));
//!
//! let response = bridge.dispatch(&[], &json!({"method": "calc.add", "params": [2, 3], "id": 1}));
//! assert_eq!(response.to_json(), json!({"id": 1, "result": 5}));
//! ```

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod fixup;
pub mod hooks;
pub mod local_arg;
pub mod protocol;
pub mod resolver;
pub mod serializer;
pub mod state;
pub mod types;
pub mod value;
pub mod wire;

// Re-export commonly used types
pub use bridge::{Bridge, ObjectInstance, ObjectKey};
pub use codec::{Codec, ObjectMatch};
pub use config::{DispatchConfig, RpcCodes, SerializerConfig, WireConfig};
pub use error::{ApplicationError, BridgeError, FixupError, MarshalError, Result, UnmarshalError};
pub use fixup::{Fixup, Location, PathStep};
pub use hooks::{ExceptionTransformer, InvocationCallback};
pub use local_arg::LocalArgResolver;
pub use protocol::{RpcError, RpcRequest, RpcResponse};
pub use serializer::JsonSerializer;
pub use types::{MethodDef, Type, TypeBuilder, TypeKind};
pub use value::{Body, ObjectId, ObjectRef, Value};
pub use wire::WireNode;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a registry mutex. A panic while holding the lock leaves the data
/// intact, so poisoning is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
