//! Wire protocol message types
//!
//! Line-delimited JSON-RPC style messages exchanged with the worker over
//! stdio. Requests carry a monotonically increasing integer id; notifications
//! carry none and expect no reply. There is no version field on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version advertised during the initialize handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Any message that can appear on the wire
///
/// Decoded with untagged matching, so variant order matters: a request has
/// both id and method, a response has an id without a method, a notification
/// has a method without an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    /// Request message
    Request(WireRequest),
    /// Response message
    Response(WireResponse),
    /// Notification message (no id)
    Notification(WireNotification),
}

impl WireMessage {
    /// Check if this is a response
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Check if this is a notification
    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Notification(_))
    }

    /// Get the message id if present
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Request(req) => Some(req.id),
            Self::Response(res) => Some(res.id),
            Self::Notification(_) => None,
        }
    }

    /// Encode to a single newline-terminated JSON line
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one wire line
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

/// Outbound request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    /// Correlation id, unique per bridge instance
    pub id: u64,
    /// Method name
    pub method: String,
    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl WireRequest {
    /// Create a new request
    pub fn new(id: u64, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            params: None,
        }
    }

    /// Add parameters to the request
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Inbound response, exactly one per request id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    /// Request id this response corresponds to
    pub id: u64,
    /// Result (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl WireResponse {
    /// Create a success response
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: WireError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if this is a success response
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Get the result, consuming the response
    pub fn into_result(self) -> Result<Value, WireError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Worker-reported error payload
///
/// The contract is a free-text message; any additional fields the worker
/// attaches are preserved but not interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    /// Human-readable error message
    pub message: String,
    /// Extra fields the worker attached
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl WireError {
    /// Create a new error payload
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extra: serde_json::Map::new(),
        }
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WireError {}

/// Fire-and-forget notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireNotification {
    /// Method name
    pub method: String,
    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl WireNotification {
    /// Create a new notification
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
        }
    }

    /// Add parameters
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Wire method names
pub mod methods {
    /// Initialize handshake request
    pub const INITIALIZE: &str = "initialize";
    /// Handshake acknowledgement notification
    pub const INITIALIZED: &str = "initialized";

    /// Create an isolated browser context for a run
    pub const CREATE_CONTEXT: &str = "browser/createContext";
    /// Close the current browser context
    pub const CLOSE_CONTEXT: &str = "browser/closeContext";

    /// List worker-exposed tools
    pub const TOOLS_LIST: &str = "tools/list";
    /// Invoke a named tool
    pub const TOOLS_CALL: &str = "tools/call";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = WireRequest::new(1, methods::TOOLS_LIST);
        let json = serde_json::to_string(&req).unwrap();

        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("jsonrpc"));
    }

    #[test]
    fn test_request_with_params() {
        let req = WireRequest::new(7, methods::TOOLS_CALL).with_params(serde_json::json!({
            "name": "navigate",
            "arguments": {"url": "https://example.com"}
        }));

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("navigate"));
    }

    #[test]
    fn test_response_success() {
        let res = WireResponse::success(1, serde_json::json!({"status": "ok"}));

        assert!(res.is_success());
        let result = res.into_result().unwrap();
        assert_eq!(result["status"], "ok");
    }

    #[test]
    fn test_response_error_keeps_message_verbatim() {
        let json = r##"{"id":3,"error":{"message":"element not found","selector":"#login"}}"##;
        let res: WireResponse = serde_json::from_str(json).unwrap();

        assert!(!res.is_success());
        let err = res.into_result().unwrap_err();
        assert_eq!(err.message, "element not found");
        assert_eq!(err.extra["selector"], "#login");
    }

    #[test]
    fn test_notification_has_no_id() {
        let notif = WireNotification::new(methods::INITIALIZED);
        let json = serde_json::to_string(&notif).unwrap();

        assert!(!json.contains("\"id\""));
        assert!(json.contains("initialized"));
    }

    #[test]
    fn test_decode_order() {
        let req: WireMessage =
            serde_json::from_str(r#"{"id":1,"method":"tools/call","params":{}}"#).unwrap();
        assert!(matches!(req, WireMessage::Request(_)));

        let res: WireMessage = serde_json::from_str(r#"{"id":1,"result":{"tools":[]}}"#).unwrap();
        assert!(res.is_response());

        let notif: WireMessage = serde_json::from_str(r#"{"method":"initialized"}"#).unwrap();
        assert!(notif.is_notification());
    }

    #[test]
    fn test_line_round_trip() {
        let msg = WireMessage::Response(WireResponse::success(42, serde_json::json!({"ok": true})));
        let line = msg.to_line().unwrap();
        assert!(line.ends_with('\n'));

        let back = WireMessage::from_line(&line).unwrap();
        assert_eq!(back.id(), Some(42));
    }
}
