//! JSON-RPC 2.0 message types and validation.
//!
//! Every line read from the server process is parsed as JSON and checked
//! against the JSON-RPC 2.0 message shapes: request, notification, or
//! response (result or error). Validation is strict: unknown members are
//! rejected, so a validated message serializes back to exactly the value it
//! was read from.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Protocol version carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Why a line was not accepted as a JSON-RPC message.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The line is not JSON
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The line is JSON but not a JSON-RPC 2.0 message
    #[error("not a JSON-RPC 2.0 message: {0}")]
    Schema(String),
}

fn schema(reason: impl Into<String>) -> ParseError {
    ParseError::Schema(reason.into())
}

/// Request identifier: a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<i32> for RequestId {
    fn from(id: i32) -> Self {
        Self::Number(id.into())
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

impl From<&RequestId> for Value {
    fn from(id: &RequestId) -> Self {
        match id {
            RequestId::Number(n) => Value::from(*n),
            RequestId::String(s) => Value::String(s.clone()),
        }
    }
}

/// A call that expects a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    /// Object or array, when present.
    pub params: Option<Value>,
}

/// A one-way message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    /// Object or array, when present.
    pub params: Option<Value>,
}

/// The answer to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` only for error responses to unidentifiable requests.
    pub id: Option<RequestId>,
    pub outcome: Outcome,
}

/// Either the result of a call or the error it produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Additional error data (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    /// Create a success response.
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            outcome: Outcome::Result(result),
        }
    }

    /// Create an error response.
    pub fn error(id: impl Into<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            outcome: Outcome::Error(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Any JSON-RPC 2.0 message.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl JsonRpcMessage {
    /// Build a request.
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(Request {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    /// Build a notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// Identifier of a request or response.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Notification(_) => None,
            Self::Response(r) => r.id.as_ref(),
        }
    }

    /// Method name of a request or notification.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// Encode as a JSON value.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        match self {
            Self::Request(r) => {
                obj.insert("id".into(), Value::from(&r.id));
                obj.insert("method".into(), Value::String(r.method.clone()));
                if let Some(params) = &r.params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Notification(n) => {
                obj.insert("method".into(), Value::String(n.method.clone()));
                if let Some(params) = &n.params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Response(r) => {
                obj.insert("id".into(), r.id.as_ref().map_or(Value::Null, Value::from));
                match &r.outcome {
                    Outcome::Result(result) => {
                        obj.insert("result".into(), result.clone());
                    }
                    Outcome::Error(error) => {
                        let mut err = Map::new();
                        err.insert("code".into(), Value::from(error.code));
                        err.insert("message".into(), Value::String(error.message.clone()));
                        if let Some(data) = &error.data {
                            err.insert("data".into(), data.clone());
                        }
                        obj.insert("error".into(), Value::Object(err));
                    }
                }
            }
        }
        Value::Object(obj)
    }
}

/// Parse a line and validate it as a JSON-RPC 2.0 message.
pub fn validate(line: &str) -> Result<JsonRpcMessage, ParseError> {
    let value: Value = serde_json::from_str(line)?;
    JsonRpcMessage::try_from(value)
}

impl TryFrom<Value> for JsonRpcMessage {
    type Error = ParseError;

    fn try_from(value: Value) -> Result<Self, ParseError> {
        let Value::Object(mut obj) = value else {
            return Err(schema("expected an object"));
        };

        match obj.remove("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            _ => return Err(schema("`jsonrpc` must be \"2.0\"")),
        }

        let id = obj.remove("id");
        let message = match obj.remove("method") {
            Some(Value::String(method)) => {
                let params = obj.remove("params");
                if params.as_ref().is_some_and(|p| !p.is_object() && !p.is_array()) {
                    return Err(schema("`params` must be an object or an array"));
                }
                match id {
                    Some(id) => Self::Request(Request {
                        id: parse_id(id)?,
                        method,
                        params,
                    }),
                    None => Self::Notification(Notification { method, params }),
                }
            }
            Some(_) => return Err(schema("`method` must be a string")),
            None => {
                let id = id.ok_or_else(|| schema("message has neither `method` nor `id`"))?;
                let outcome = match (obj.remove("result"), obj.remove("error")) {
                    (Some(result), None) => Outcome::Result(result),
                    (None, Some(error)) => Outcome::Error(parse_rpc_error(error)?),
                    (Some(_), Some(_)) => {
                        return Err(schema("response has both `result` and `error`"))
                    }
                    (None, None) => return Err(schema("response has neither `result` nor `error`")),
                };
                let id = match id {
                    Value::Null if matches!(outcome, Outcome::Error(_)) => None,
                    Value::Null => return Err(schema("`id` must not be null in a result")),
                    id => Some(parse_id(id)?),
                };
                Self::Response(Response { id, outcome })
            }
        };

        if let Some(key) = obj.keys().next() {
            return Err(schema(format!("unexpected member `{key}`")));
        }
        Ok(message)
    }
}

fn parse_id(id: Value) -> Result<RequestId, ParseError> {
    match id {
        Value::String(s) => Ok(RequestId::String(s)),
        Value::Number(n) => n
            .as_i64()
            .map(RequestId::Number)
            .ok_or_else(|| schema("numeric `id` must be an integer")),
        _ => Err(schema("`id` must be a string or an integer")),
    }
}

fn parse_rpc_error(error: Value) -> Result<RpcError, ParseError> {
    let Value::Object(mut obj) = error else {
        return Err(schema("`error` must be an object"));
    };
    let code = obj
        .remove("code")
        .and_then(|c| c.as_i64())
        .ok_or_else(|| schema("`error.code` must be an integer"))?;
    let message = match obj.remove("message") {
        Some(Value::String(message)) => message,
        _ => return Err(schema("`error.message` must be a string")),
    };
    let data = obj.remove("data");
    if let Some(key) = obj.keys().next() {
        return Err(schema(format!("unexpected member `error.{key}`")));
    }
    Ok(RpcError {
        code,
        message,
        data,
    })
}

impl Serialize for JsonRpcMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(value: Value) -> JsonRpcMessage {
        let line = serde_json::to_string(&value).unwrap();
        let message = validate(&line).unwrap_or_else(|e| panic!("{line} rejected: {e}"));
        assert_eq!(message.to_value(), value, "round trip of {line}");
        message
    }

    fn rejected(line: &str) -> ParseError {
        match validate(line) {
            Ok(message) => panic!("{line} accepted as {message:?}"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_request() {
        let message = round_trip(json!({
            "jsonrpc": "2.0", "id": 1, "method": "ping", "params": {}
        }));
        assert_eq!(message.id(), Some(&RequestId::Number(1)));
        assert_eq!(message.method(), Some("ping"));
        assert!(matches!(message, JsonRpcMessage::Request(_)));
    }

    #[test]
    fn test_request_string_id_without_params() {
        let message = round_trip(json!({"jsonrpc": "2.0", "id": "abc", "method": "list"}));
        assert_eq!(message.id(), Some(&RequestId::from("abc")));
    }

    #[test]
    fn test_request_positional_params() {
        round_trip(json!({"jsonrpc": "2.0", "id": 7, "method": "sum", "params": [1, 2]}));
    }

    #[test]
    fn test_notification() {
        let message = round_trip(json!({
            "jsonrpc": "2.0", "method": "notifications/initialized"
        }));
        assert!(matches!(message, JsonRpcMessage::Notification(_)));
        assert_eq!(message.id(), None);
    }

    #[test]
    fn test_result_response() {
        let message = round_trip(json!({
            "jsonrpc": "2.0", "id": 1, "result": {"tools": []}
        }));
        assert!(matches!(
            message,
            JsonRpcMessage::Response(Response { outcome: Outcome::Result(_), .. })
        ));
    }

    #[test]
    fn test_null_result_preserved() {
        round_trip(json!({"jsonrpc": "2.0", "id": 2, "result": null}));
    }

    #[test]
    fn test_error_response() {
        let message = round_trip(json!({
            "jsonrpc": "2.0", "id": 3,
            "error": {"code": -32601, "message": "method not found", "data": null}
        }));
        let JsonRpcMessage::Response(Response { outcome: Outcome::Error(err), .. }) = message else {
            panic!("expected error response");
        };
        assert_eq!(err.code, -32601);
        assert_eq!(err.data, Some(Value::Null));
    }

    #[test]
    fn test_error_response_null_id() {
        let message = round_trip(json!({
            "jsonrpc": "2.0", "id": null,
            "error": {"code": -32700, "message": "parse error"}
        }));
        assert_eq!(message.id(), None);
    }

    #[test]
    fn test_rejects_non_json() {
        assert!(matches!(rejected("echo:hello"), ParseError::Json(_)));
        assert!(matches!(rejected("{\"jsonrpc\":"), ParseError::Json(_)));
    }

    #[test]
    fn test_rejects_schema_violations() {
        for line in [
            r#"[1, 2, 3]"#,
            r#""2.0""#,
            r#"{"id": 1, "method": "ping"}"#,
            r#"{"jsonrpc": "1.0", "id": 1, "method": "ping"}"#,
            r#"{"jsonrpc": "2.0", "id": 1.5, "method": "ping"}"#,
            r#"{"jsonrpc": "2.0", "id": true, "method": "ping"}"#,
            r#"{"jsonrpc": "2.0", "id": 1, "method": 5}"#,
            r#"{"jsonrpc": "2.0", "method": "ping", "params": "oops"}"#,
            r#"{"jsonrpc": "2.0", "id": 1}"#,
            r#"{"jsonrpc": "2.0", "id": 1, "result": 1, "error": {"code": 1, "message": "x"}}"#,
            r#"{"jsonrpc": "2.0", "id": null, "result": {}}"#,
            r#"{"jsonrpc": "2.0", "id": 1, "error": {"code": "x", "message": "m"}}"#,
            r#"{"jsonrpc": "2.0", "id": 1, "error": {"code": 1}}"#,
            r#"{"jsonrpc": "2.0", "id": 1, "error": {"code": 1, "message": "m", "extra": 1}}"#,
            r#"{"jsonrpc": "2.0", "id": 1, "method": "ping", "result": {}}"#,
            r#"{"jsonrpc": "2.0", "method": "ping", "extra": true}"#,
            r#"{"jsonrpc": "2.0", "result": {}}"#,
        ] {
            assert!(
                matches!(rejected(line), ParseError::Schema(_)),
                "{line} should be a schema error"
            );
        }
    }

    #[test]
    fn test_serde_integration() {
        let message: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":9,"result":{"ok":true}}"#).unwrap();
        assert_eq!(
            message,
            JsonRpcMessage::Response(Response::success(9, json!({"ok": true})))
        );
        assert!(serde_json::from_str::<JsonRpcMessage>(r#"{"jsonrpc":"2.0"}"#).is_err());

        let encoded = serde_json::to_value(JsonRpcMessage::notification("tick", None)).unwrap();
        assert_eq!(encoded, json!({"jsonrpc": "2.0", "method": "tick"}));
    }

    #[test]
    fn test_response_constructors() {
        let err = JsonRpcMessage::Response(Response::error("req-1", -32603, "boom"));
        assert_eq!(
            err.to_value(),
            json!({"jsonrpc": "2.0", "id": "req-1", "error": {"code": -32603, "message": "boom"}})
        );
    }
}
