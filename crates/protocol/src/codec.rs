//! Frame encoding for the session channel.
//!
//! A frame body is the UTF-8 JSON form of one [`Message`]. Framing itself
//! (length prefixes) belongs to the transport.

use crate::constants::MAX_FRAME_SIZE;
use crate::error::ProtocolError;
use crate::messages::Message;

/// Serializes a message into a frame body.
pub fn encode(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(msg)?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(bytes)
}

/// Parses a frame body into a message.
pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_slice(frame)?)
}
