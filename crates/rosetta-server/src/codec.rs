//! JSON framing over WebSocket text frames.

use crate::protocol::{ClientMessage, ServerMessage};
use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;

/// Longest string accepted anywhere in a frame, in bytes.
pub const MAX_STRING_BYTES: usize = 65535;

/// Longest password accepted at login, in bytes.
pub const MAX_PASSWORD_BYTES: usize = 255;

/// A frame that could not be turned into a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("string of {len} bytes exceeds the {} byte limit", MAX_STRING_BYTES)]
    StringTooLong { len: usize },

    #[error("password exceeds {} bytes", MAX_PASSWORD_BYTES)]
    PasswordTooLong,

    #[error("binary frames are not supported")]
    BinaryFrame,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Decodes one text frame.
pub fn decode(text: &str, max_frame_bytes: usize) -> Result<ClientMessage, ProtocolError> {
    if text.len() > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            limit: max_frame_bytes,
        });
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    check_strings(&value)?;

    let message: ClientMessage =
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if let ClientMessage::Login { password, .. } = &message {
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(ProtocolError::PasswordTooLong);
        }
    }

    Ok(message)
}

/// Decodes a WebSocket message, returning `None` for control frames.
pub fn decode_message(
    message: &Message,
    max_frame_bytes: usize,
) -> Option<Result<ClientMessage, ProtocolError>> {
    match message {
        Message::Text(text) => Some(decode(text, max_frame_bytes)),
        Message::Binary(_) => Some(Err(ProtocolError::BinaryFrame)),
        _ => None,
    }
}

pub fn encode(message: &ServerMessage) -> Result<Message, ProtocolError> {
    let json = serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(Message::Text(json))
}

fn check_strings(value: &Value) -> Result<(), ProtocolError> {
    match value {
        Value::String(s) => check_len(s),
        Value::Array(items) => items.iter().try_for_each(check_strings),
        Value::Object(map) => map.iter().try_for_each(|(key, value)| {
            check_len(key)?;
            check_strings(value)
        }),
        _ => Ok(()),
    }
}

fn check_len(s: &str) -> Result<(), ProtocolError> {
    if s.len() > MAX_STRING_BYTES {
        return Err(ProtocolError::StringTooLong { len: s.len() });
    }
    Ok(())
}
