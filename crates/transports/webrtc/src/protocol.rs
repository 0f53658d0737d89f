//! Data-channel interaction protocol
//!
//! One JSON object per data-channel message, discriminated by `type`. The
//! wire field names (`clickId`, `deltaY`, ...) are part of the protocol and
//! pinned by serde renames; the tests lock them down.

use periscope_core::engine::ElementInfo;
use serde::{Deserialize, Serialize};

/// Inbound interaction command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Click at a viewport point
    Click {
        /// Client-supplied correlation id, echoed in the response
        #[serde(default)]
        id: Option<String>,
        /// Viewport x coordinate
        x: i32,
        /// Viewport y coordinate
        y: i32,
    },
    /// Type text through the keyboard
    Type {
        /// Text to type
        text: String,
    },
    /// Scroll the document vertically
    Scroll {
        /// Relative vertical delta in pixels
        #[serde(rename = "deltaY", default)]
        delta_y: i32,
    },
    /// Navigate the session to a URL
    Navigate {
        /// Target URL
        url: String,
    },
    /// Capture and persist a screenshot artifact
    Screenshot,
}

impl ControlMessage {
    /// Decode one message from raw channel bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// The correlation id a failure reply should echo
    pub fn correlation_id(&self) -> String {
        match self {
            ControlMessage::Click { id, .. } => {
                id.clone().unwrap_or_else(|| "unknown".to_string())
            }
            _ => "unknown".to_string(),
        }
    }

    /// Event name used in acknowledgements
    pub fn event_name(&self) -> &'static str {
        match self {
            ControlMessage::Click { .. } => "click",
            ControlMessage::Type { .. } => "type",
            ControlMessage::Scroll { .. } => "scroll",
            ControlMessage::Navigate { .. } => "navigate",
            ControlMessage::Screenshot => "screenshot",
        }
    }
}

/// Outbound reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    /// Outcome of a click command
    ClickResponse {
        /// Whether the click was performed
        success: bool,
        /// Correlation id echoed from the request
        #[serde(rename = "clickId")]
        click_id: String,
        /// Element the click landed on (success only)
        #[serde(skip_serializing_if = "Option::is_none")]
        element: Option<ElementInfo>,
        /// Failure description (failure only)
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Acknowledgement of a non-click command
    Ack {
        /// Name of the acknowledged event
        event: String,
    },
    /// A screenshot artifact was persisted
    ScreenshotSaved {
        /// Artifact filename
        filename: String,
    },
    /// Command decode or handler failure
    Error {
        /// Failure description
        message: String,
    },
}

impl ControlReply {
    /// Encode the reply for the channel
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// A failed click response
    pub fn click_failure(click_id: impl Into<String>, error: impl Into<String>) -> Self {
        ControlReply::ClickResponse {
            success: false,
            click_id: click_id.into(),
            element: None,
            error: Some(error.into()),
        }
    }

    /// A successful click response echoing the resolved element
    pub fn click_success(click_id: impl Into<String>, element: ElementInfo) -> Self {
        ControlReply::ClickResponse {
            success: true,
            click_id: click_id.into(),
            element: Some(element),
            error: None,
        }
    }
}
