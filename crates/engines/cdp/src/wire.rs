//! DevTools protocol envelopes
//!
//! One JSON object per WebSocket text frame, in either direction. Commands
//! carry a caller-assigned id; the browser answers with the same id and
//! either `result` or `error`. Frames without an id are events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound command frame
#[derive(Debug, Serialize)]
pub struct Command<'a> {
    /// Caller-assigned id echoed in the response
    pub id: u64,
    /// Domain-qualified method, e.g. `Page.navigate`
    pub method: &'a str,
    /// Method parameters (an empty object when the method takes none)
    pub params: Value,
    /// Target session the command is scoped to; browser-level commands omit it
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

/// Inbound frame: a command response or an event
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Present on command responses
    pub id: Option<u64>,
    /// Present on events
    pub method: Option<String>,
    /// Event parameters
    pub params: Option<Value>,
    /// Successful command payload
    pub result: Option<Value>,
    /// Failed command payload
    pub error: Option<ProtocolError>,
    /// Session the frame belongs to, if session-scoped
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Error payload of a failed command
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolError {
    /// DevTools error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
}

/// Event broadcast to waiters
#[derive(Debug, Clone)]
pub struct Event {
    /// Domain-qualified event name
    pub method: String,
    /// Event parameters
    pub params: Value,
    /// Session the event belongs to, if session-scoped
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_serialization() {
        let cmd = Command {
            id: 7,
            method: "Page.navigate",
            params: json!({"url": "https://example.com"}),
            session_id: Some("SESSION"),
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "Page.navigate");
        assert_eq!(value["params"]["url"], "https://example.com");
        assert_eq!(value["sessionId"], "SESSION");
    }

    #[test]
    fn test_browser_command_omits_session() {
        let cmd = Command {
            id: 1,
            method: "Browser.close",
            params: json!({}),
            session_id: None,
        };
        let text = serde_json::to_string(&cmd).unwrap();
        assert!(!text.contains("sessionId"));
    }

    #[test]
    fn test_response_envelope() {
        let env: Envelope = serde_json::from_str(
            r#"{"id":7,"result":{"frameId":"F"},"sessionId":"SESSION"}"#,
        )
        .unwrap();
        assert_eq!(env.id, Some(7));
        assert_eq!(env.result.unwrap()["frameId"], "F");
        assert!(env.error.is_none());
    }

    #[test]
    fn test_error_envelope() {
        let env: Envelope =
            serde_json::from_str(r#"{"id":3,"error":{"code":-32000,"message":"no target"}}"#)
                .unwrap();
        let err = env.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "no target");
    }

    #[test]
    fn test_event_envelope() {
        let env: Envelope = serde_json::from_str(
            r#"{"method":"Page.domContentEventFired","params":{"timestamp":1.0}}"#,
        )
        .unwrap();
        assert!(env.id.is_none());
        assert_eq!(env.method.as_deref(), Some("Page.domContentEventFired"));
    }
}
