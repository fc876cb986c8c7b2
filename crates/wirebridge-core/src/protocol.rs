//! Request and response envelopes.

use crate::error::{BridgeError, Result};
use crate::fixup::Fixup;
use crate::wire::{WireArray, WireNode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A parsed call. `params` is kept as a wire array so fixups can rewire it.
#[derive(Debug)]
pub struct RpcRequest {
    pub method: String,
    pub params: WireNode,
    pub id: JsonValue,
    pub fixups: Vec<Fixup>,
}

impl RpcRequest {
    /// Parse `{method, params?, id?, fixups?}`. A missing method is
    /// [`BridgeError::NoMethod`]; missing or non-array params are empty.
    pub fn parse(json: &JsonValue) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| BridgeError::Parse(format!("request is not an object: {json}")))?;
        let method = obj
            .get("method")
            .and_then(JsonValue::as_str)
            .ok_or(BridgeError::NoMethod)?
            .to_string();
        let params = match obj.get("params") {
            Some(params @ JsonValue::Array(_)) => WireNode::from(params),
            _ => WireNode::Array(WireArray::new()),
        };
        let fixups = match obj.get("fixups") {
            Some(JsonValue::Null) | None => Vec::new(),
            Some(fixups) => Fixup::list_from_json(fixups)?,
        };
        Ok(Self {
            method,
            params,
            id: obj.get("id").cloned().unwrap_or(JsonValue::Null),
            fixups,
        })
    }
}

/// Error member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

/// `{id, result, fixups?}` or `{id, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixups: Option<Vec<Fixup>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: JsonValue, result: JsonValue, fixups: &[Fixup]) -> Self {
        let fixups = (!fixups.is_empty()).then(|| fixups.to_vec());
        Self {
            id,
            result: Some(result),
            fixups,
            error: None,
        }
    }

    pub fn error(id: JsonValue, code: i32, message: String, data: Option<JsonValue>) -> Self {
        Self {
            id,
            result: None,
            fixups: None,
            error: Some(RpcError {
                code,
                message,
                data,
            }),
        }
    }

    pub fn from_error(id: JsonValue, err: &BridgeError) -> Self {
        let data = match err {
            BridgeError::Application(app) => {
                let mut data = serde_json::Map::new();
                data.insert("kind".into(), JsonValue::String(app.kind.clone()));
                if let Some(detail) = &app.data {
                    data.insert("detail".into(), detail.clone());
                }
                Some(JsonValue::Object(data))
            }
            _ => None,
        };
        let message = match err {
            BridgeError::Application(app) => app.message.clone(),
            other => other.to_string(),
        };
        Self::error(id, err.to_rpc_error_code(), message, data)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApplicationError;
    use serde_json::json;

    #[test]
    fn test_parse_defaults() {
        let request = RpcRequest::parse(&json!({"method": "calc.add"})).unwrap();
        assert_eq!(request.method, "calc.add");
        assert_eq!(request.params.as_array().unwrap().len(), 0);
        assert_eq!(request.id, JsonValue::Null);
        assert!(request.fixups.is_empty());

        let request =
            RpcRequest::parse(&json!({"method": "m", "params": {"not": "array"}, "id": 3}))
                .unwrap();
        assert_eq!(request.params.as_array().unwrap().len(), 0);
        assert_eq!(request.id, json!(3));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            RpcRequest::parse(&json!({"params": []})),
            Err(BridgeError::NoMethod)
        ));
        assert!(matches!(
            RpcRequest::parse(&json!([1])),
            Err(BridgeError::Parse(_))
        ));
        assert!(matches!(
            RpcRequest::parse(&json!({"method": "m", "fixups": [["x"]]})),
            Err(BridgeError::Fixup(_))
        ));
    }

    #[test]
    fn test_response_shapes() {
        let ok = RpcResponse::success(json!(1), json!(5), &[]);
        assert_eq!(ok.to_json(), json!({"id": 1, "result": 5}));

        let ok = RpcResponse::success(json!(1), JsonValue::Null, &[]);
        assert_eq!(ok.to_json(), json!({"id": 1, "result": null}));

        let err = RpcResponse::from_error(json!(2), &BridgeError::NoMethod);
        assert_eq!(
            err.to_json(),
            json!({"id": 2, "error": {
                "code": 591,
                "message": "method with the requested number of arguments not found"
            }})
        );
        assert_eq!(err.error_code(), Some(591));

        let app = ApplicationError::new("Overflow", "too big").with_data(json!({"limit": 10}));
        let err = RpcResponse::from_error(json!(3), &BridgeError::Application(app));
        assert_eq!(
            err.to_json(),
            json!({"id": 3, "error": {
                "code": 490,
                "message": "too big",
                "data": {"kind": "Overflow", "detail": {"limit": 10}}
            }})
        );
    }
}
