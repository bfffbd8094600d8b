use super::messages::{ClientMessage, ErrorCode, ServerMessage};

/// Maximum inbound frame size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024; // 512 KiB

#[derive(Debug)]
pub enum ProtocolError {
    InvalidEncoding,
    MessageTooLarge(usize),
    InvalidJson(String),
    ValidationFailed(String),
    Serialize(String),
}

impl ProtocolError {
    /// Wire error code reported back to the sender.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidEncoding => ErrorCode::InvalidEncoding,
            Self::MessageTooLarge(_) => ErrorCode::MessageTooLarge,
            Self::InvalidJson(_) => ErrorCode::InvalidJson,
            Self::ValidationFailed(_) | Self::Serialize(_) => ErrorCode::ValidationFailed,
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEncoding => write!(f, "frame is not valid UTF-8"),
            Self::MessageTooLarge(size) => write!(f, "message too large: {size} bytes"),
            Self::InvalidJson(e) => write!(f, "invalid JSON: {e}"),
            Self::ValidationFailed(e) => write!(f, "message failed validation: {e}"),
            Self::Serialize(e) => write!(f, "serialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Decode one inbound frame: UTF-8, size limit, JSON syntax, then the closed
/// client message schema. Each stage fails with its own error.
pub fn decode_client_frame(data: &[u8], max_size: usize) -> Result<ClientMessage, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidEncoding)?;
    decode_client_text(text, max_size)
}

/// Same as [`decode_client_frame`] for a frame that is already text.
pub fn decode_client_text(text: &str, max_size: usize) -> Result<ClientMessage, ProtocolError> {
    if text.len() > max_size {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| ProtocolError::ValidationFailed(e.to_string()))
}

pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Serialize(e.to_string()))
}

pub fn encode_client_message(msg: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Serialize(e.to_string()))
}

/// Decode a server frame (client side). Server frames are trusted, so there
/// is no size gate.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| ProtocolError::ValidationFailed(e.to_string()))
}
