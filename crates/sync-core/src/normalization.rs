use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{SyncError, SyncErrorCategory},
    types::{InboundEvent, OutboundEvent},
};

/// One JSON text frame as sent by the chat server.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "isTyping")]
    is_typing: Option<bool>,
    #[serde(default)]
    typing_complete: Option<bool>,
}

#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
}

/// Decode one inbound text frame into a logical event.
///
/// Returns `Ok(None)` for frame types this client does not act on (system
/// notices, unknown tags). Malformed JSON is a serialization error; callers
/// drop the frame.
pub fn decode_inbound_frame(text: &str) -> Result<Option<InboundEvent>, SyncError> {
    let frame: InboundFrame = serde_json::from_str(text).map_err(|err| {
        SyncError::new(
            SyncErrorCategory::Serialization,
            "invalid_frame",
            format!("malformed inbound frame: {err}"),
        )
    })?;

    let event = match frame.kind.as_str() {
        "persona_response" | "peer_message" => InboundEvent::PeerMessage {
            content: frame.content.unwrap_or_default(),
        },
        "typing_indicator" | "typing" => {
            let is_typing = match (frame.is_typing, frame.typing_complete) {
                (Some(is_typing), _) => is_typing,
                (None, Some(complete)) => !complete,
                (None, None) => false,
            };
            InboundEvent::Typing { is_typing }
        }
        "user_message" | "ack" | "echo" => InboundEvent::Ack {
            content: frame.content,
        },
        "clear" => InboundEvent::Clear,
        "system_message" => {
            debug!(content = ?frame.content, "ignoring system notice");
            return Ok(None);
        }
        other => {
            warn!(kind = other, "ignoring unknown inbound frame type");
            return Ok(None);
        }
    };

    Ok(Some(event))
}

/// Encode one outbound event as a JSON text frame.
pub fn encode_outbound_frame(event: &OutboundEvent) -> Result<String, SyncError> {
    let frame = match event {
        OutboundEvent::UserMessage { content } => OutboundFrame {
            kind: "user_message",
            content,
        },
    };
    serde_json::to_string(&frame).map_err(|err| {
        SyncError::new(
            SyncErrorCategory::Serialization,
            "frame_encode_failed",
            err.to_string(),
        )
    })
}
