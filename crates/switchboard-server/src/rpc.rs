use serde::{Deserialize, Serialize};

use switchboard_core::errors::{BrokerError, ErrorScope};

/// Client request: `{ id?, method, params? }`.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Response wire format: `{ id, success, result?, error?: { code, message, data? } }`.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Error object. `code` is a string: a broker error kind such as
/// `duplicate_invocation`, or one of the protocol codes below.
#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Map numeric protocol error codes to their string form.
pub fn error_code_to_string(code: i32) -> &'static str {
    match code {
        PARSE_ERROR => "PARSE_ERROR",
        INVALID_REQUEST => "INVALID_REQUEST",
        METHOD_NOT_FOUND => "METHOD_NOT_FOUND",
        INVALID_PARAMS => "INVALID_PARAMS",
        INTERNAL_ERROR => "INTERNAL_ERROR",
        _ => "UNKNOWN_ERROR",
    }
}

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: error_code_to_string(code).to_string(),
                message: message.into(),
                data: None,
            }),
        }
    }

    /// A broker rejection. `data` carries `retryable` and, for
    /// invocation-scoped errors, the `invocationId`.
    pub fn broker_error(id: Option<serde_json::Value>, err: &BrokerError) -> Self {
        let mut data = serde_json::json!({ "retryable": err.retryable });
        if let ErrorScope::Invocation(invocation_id) = &err.scope {
            data["invocationId"] = serde_json::json!(invocation_id);
        }
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: err.kind.as_str().to_string(),
                message: err.message.clone(),
                data: Some(data),
            }),
        }
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, msg)
    }

    pub fn internal_error(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INTERNAL_ERROR, msg)
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }
}

/// Extract a required string param.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn optional_u64(params: &serde_json::Value, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.as_u64())
}

/// Extract a required array of strings.
pub fn require_str_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, String> {
    let items = params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| format!("Missing required parameter: {key}"))?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| format!("{key} must contain only strings"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::errors::ErrorKind;
    use switchboard_core::ids::InvocationId;

    #[test]
    fn parse_rpc_request() {
        let json = r#"{"method":"tools/call","params":{"invocationId":"c1","name":"help"},"id":1}"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, "tools/call");
        assert!(req.params.is_some());
        assert_eq!(req.id, Some(serde_json::json!(1)));
    }

    #[test]
    fn success_response_serializes() {
        let resp = RpcResponse::success(Some(serde_json::json!(1)), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
        assert!(json.contains("\"success\":true"));
    }

    #[test]
    fn error_response_has_string_code() {
        let resp = RpcResponse::method_not_found(Some(serde_json::json!(1)), "foo/bar");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "METHOD_NOT_FOUND");
        assert!(json["error"]["message"].as_str().unwrap().contains("foo/bar"));
        assert!(json.get("result").is_none());
    }

    #[test]
    fn broker_error_carries_kind_and_retryable() {
        let err = BrokerError::for_invocation(
            ErrorKind::Overloaded,
            &InvocationId::from("c9"),
            "queue full",
        );
        let json = serde_json::to_value(RpcResponse::broker_error(Some(serde_json::json!(4)), &err)).unwrap();
        assert_eq!(json["error"]["code"], "overloaded");
        assert_eq!(json["error"]["data"]["retryable"], true);
        assert_eq!(json["error"]["data"]["invocationId"], "c9");
    }

    #[test]
    fn session_error_has_no_invocation_id() {
        let err = BrokerError::session(ErrorKind::SessionClosed, "session closed");
        let json = serde_json::to_value(RpcResponse::broker_error(None, &err)).unwrap();
        assert_eq!(json["error"]["code"], "session_closed");
        assert!(json["error"]["data"].get("invocationId").is_none());
    }

    #[test]
    fn error_code_maps_to_string() {
        assert_eq!(error_code_to_string(PARSE_ERROR), "PARSE_ERROR");
        assert_eq!(error_code_to_string(INVALID_REQUEST), "INVALID_REQUEST");
        assert_eq!(error_code_to_string(INTERNAL_ERROR), "INTERNAL_ERROR");
        assert_eq!(error_code_to_string(-99999), "UNKNOWN_ERROR");
    }

    #[test]
    fn param_helpers() {
        let params = serde_json::json!({"name": "x", "n": 5, "tools": ["a", "b"], "bad": [1]});
        assert_eq!(require_str(&params, "name").unwrap(), "x");
        assert!(require_str(&params, "n").is_err());
        assert_eq!(optional_str(&params, "missing"), None);
        assert_eq!(optional_u64(&params, "n"), Some(5));
        assert_eq!(require_str_array(&params, "tools").unwrap(), vec!["a", "b"]);
        assert!(require_str_array(&params, "bad").is_err());
        assert!(require_str_array(&params, "missing").is_err());
    }

    #[test]
    fn parse_error_has_no_id() {
        let resp = RpcResponse::parse_error();
        assert!(resp.id.is_none());
        assert_eq!(resp.error.as_ref().unwrap().code, "PARSE_ERROR");
    }
}
