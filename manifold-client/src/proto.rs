//! The JSON frame format spoken over a controller WebSocket.
//!
//! Requests address a facade method; responses either carry a body or an
//! error with its machine-readable code. Field names are the kebab-case
//! wire names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use manifold_core::{Error, ErrorKind};

/// An outgoing RPC request frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestFrame {
    #[serde(rename = "request-id")]
    pub request_id: u64,
    /// Facade name.
    #[serde(rename = "type")]
    pub facade: String,
    pub version: u32,
    /// Method name.
    pub request: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// An incoming response frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseFrame {
    #[serde(rename = "request-id")]
    pub request_id: u64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub response: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "error-code", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(rename = "error-info", default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<Value>,
}

impl ResponseFrame {
    /// Convert into a result, preserving the backend's error code.
    pub fn into_result(self) -> manifold_core::Result<Value> {
        match self.error {
            None => Ok(self.response),
            Some(message) => {
                let kind = match self.error_code.as_deref() {
                    Some(code) => ErrorKind::from_code(code),
                    None => ErrorKind::Unspecified,
                };
                Err(Error::new(kind, message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_wire_names() {
        let frame = RequestFrame {
            request_id: 3,
            facade: "ModelManager".to_string(),
            version: 9,
            request: "CreateModel".to_string(),
            params: serde_json::json!({"name": "m"}),
        };
        let wire = serde_json::to_value(&frame).unwrap();
        assert_eq!(wire["request-id"], 3);
        assert_eq!(wire["type"], "ModelManager");
        assert_eq!(wire["request"], "CreateModel");
    }

    #[test]
    fn error_codes_survive_the_round_trip() {
        let frame: ResponseFrame = serde_json::from_str(
            r#"{"request-id":1,"error":"model exists","error-code":"already-exists"}"#,
        )
        .unwrap();
        let err = frame.into_result().unwrap_err();
        assert_eq!(err.code(), "already-exists");

        let frame: ResponseFrame = serde_json::from_str(
            r#"{"request-id":2,"error":"odd failure","error-code":"quota exhausted"}"#,
        )
        .unwrap();
        let err = frame.into_result().unwrap_err();
        assert_eq!(err.code(), "quota exhausted");
    }
}
