use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Envelope exchanged over the live channel.
///
/// `kind` (wire name `type`) selects how `payload` is interpreted. Types the
/// client does not know are kept as-is so consumers can decide what to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ChannelMessage {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Parse one text frame.
    pub fn parse(raw: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(raw).map_err(|e| ChannelError::MalformedFrame(e.to_string()))
    }

    pub fn to_frame(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self).map_err(|e| ChannelError::MalformedFrame(e.to_string()))
    }
}
