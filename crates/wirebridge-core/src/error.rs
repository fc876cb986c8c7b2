//! Error types for the wirebridge engine.
//!
//! Marshalling, unmarshalling and fixup failures each have their own enum so
//! codecs can report precisely what went wrong; [`BridgeError`] gathers them at
//! the dispatch boundary and maps every variant onto a wire error code.

use crate::config::RpcCodes;
use std::path::PathBuf;
use thiserror::Error;

/// Failure while encoding a value into the wire tree.
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("Circular reference at {location}")]
    CircularReference { location: String },

    #[error("can't marshal {type_name}: no codec registered")]
    NoCodec { type_name: String },

    /// Bookkeeping on the identity tracker went out of balance.
    #[error("scope error: {0}")]
    Scope(String),

    #[error("{type_name}: {message}")]
    Codec { type_name: String, message: String },

    #[error("wire tree contains a cycle at node {node}")]
    CyclicWire { node: u64 },

    #[error("{context} {source}")]
    Nested {
        context: String,
        #[source]
        source: Box<MarshalError>,
    },
}

impl MarshalError {
    /// Prefix this error with the member it was raised under.
    pub fn within(self, context: impl Into<String>) -> Self {
        MarshalError::Nested {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error once all context prefixes are stripped.
    pub fn root_cause(&self) -> &MarshalError {
        match self {
            MarshalError::Nested { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Failure while decoding a wire node into a value, or while scoring a match.
#[derive(Debug, Error)]
pub enum UnmarshalError {
    #[error("no type hint")]
    NoTypeHint,

    #[error("can't assign null to primitive {type_name}")]
    NullAssignment { type_name: String },

    #[error("type in hint not found: {name}")]
    UnknownTypeHint { name: String },

    #[error("no codec can unmarshal {wire} to {type_name}")]
    NoCodec { wire: String, type_name: String },

    #[error("{0}")]
    Mismatch(String),

    #[error("unresolved circular reference to node {node}")]
    UnresolvedReference { node: u64 },

    #[error("unknown handle {id}")]
    UnknownHandle { id: u64 },

    #[error("couldn't resolve local argument of type {type_name}")]
    LocalArg { type_name: String },

    #[error("{context} {source}")]
    Nested {
        context: String,
        #[source]
        source: Box<UnmarshalError>,
    },
}

impl UnmarshalError {
    pub fn within(self, context: impl Into<String>) -> Self {
        UnmarshalError::Nested {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn root_cause(&self) -> &UnmarshalError {
        match self {
            UnmarshalError::Nested { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn mismatch(message: impl Into<String>) -> Self {
        UnmarshalError::Mismatch(message.into())
    }
}

/// Malformed or unresolvable fixup paths.
#[derive(Debug, Error)]
pub enum FixupError {
    #[error("fixup path must contain at least 1 reference")]
    EmptyPath,

    #[error("cannot traverse: missing node at {location}")]
    MissingNode { location: String },

    #[error("cannot traverse: {location} is not a container")]
    NotAContainer { location: String },

    #[error("invalid path step {step}: {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("malformed fixup entry: {0}")]
    Malformed(String),
}

/// An error raised by an invoked method, or by a hook around it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct ApplicationError {
    pub kind: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ApplicationError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Main error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("couldn't parse request: {0}")]
    Parse(String),

    #[error("method with the requested number of arguments not found")]
    NoMethod,

    #[error("constructor not found")]
    NoConstructor,

    #[error("invalid or unexpected data in fixups: {0}")]
    Fixup(#[from] FixupError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Unmarshal(#[from] UnmarshalError),

    /// Reference registration attempted on the global bridge, or a second
    /// global initialisation.
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    #[error("registration failed: {message}")]
    Registration { message: String },

    #[error(transparent)]
    Application(ApplicationError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<ApplicationError> for BridgeError {
    fn from(err: ApplicationError) -> Self {
        BridgeError::Application(err)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Convert to the wire error code reported in responses.
    ///
    /// - 490: application error raised by the invoked method
    /// - 590: unparseable request
    /// - 591: no method
    /// - 592: unmarshal failure (type hints, null assignment, codecs)
    /// - 593: marshal failure (circular reference, codecs)
    /// - 594: fixup application failure
    /// - 595: no constructor
    /// - 596: illegal operation or registration conflict
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            BridgeError::Application(_) => RpcCodes::REMOTE_EXCEPTION,
            BridgeError::Parse(_) | BridgeError::Config { .. } | BridgeError::Io { .. } => {
                RpcCodes::PARSE
            }
            BridgeError::NoMethod => RpcCodes::NO_METHOD,
            BridgeError::Unmarshal(_) => RpcCodes::UNMARSHAL,
            BridgeError::Marshal(_) => RpcCodes::MARSHAL,
            BridgeError::Fixup(_) => RpcCodes::FIXUP,
            BridgeError::NoConstructor => RpcCodes::NO_CONSTRUCTOR,
            BridgeError::IllegalOperation(_) | BridgeError::Registration { .. } => {
                RpcCodes::ILLEGAL_OPERATION
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::NoConstructor;
        assert_eq!(err.to_string(), "constructor not found");

        let err = BridgeError::from(FixupError::EmptyPath);
        assert_eq!(
            err.to_string(),
            "invalid or unexpected data in fixups: fixup path must contain at least 1 reference"
        );
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(BridgeError::NoMethod.to_rpc_error_code(), 591);
        assert_eq!(BridgeError::NoConstructor.to_rpc_error_code(), 595);
        assert_eq!(
            BridgeError::from(FixupError::EmptyPath).to_rpc_error_code(),
            594
        );
        assert_eq!(
            BridgeError::from(UnmarshalError::NoTypeHint).to_rpc_error_code(),
            592
        );
        assert_eq!(
            BridgeError::from(MarshalError::CircularReference {
                location: "result".into()
            })
            .to_rpc_error_code(),
            593
        );
        assert_eq!(
            BridgeError::from(ApplicationError::new("Boom", "bad")).to_rpc_error_code(),
            490
        );
    }

    #[test]
    fn test_nested_errors_keep_root_cause() {
        let err = UnmarshalError::NullAssignment {
            type_name: "int".into(),
        }
        .within("field x")
        .within("arg 1");

        assert_eq!(err.to_string(), "arg 1 field x can't assign null to primitive int");
        assert!(matches!(
            err.root_cause(),
            UnmarshalError::NullAssignment { .. }
        ));
    }
}
