//! Codec for encoding and decoding signaling frames.
//!
//! Decoding validates shape before a message reaches the client core:
//! a frame must be a JSON object with a known `event` name and a payload
//! matching that event. Callers treat any `CodecError` as a dropped frame.

use crate::messages::{ClientEvent, ServerEvent};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Largest frame accepted by the decoder (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Event names the server may send.
pub const SERVER_EVENT_NAMES: [&str; 10] = [
    "video_call_ready",
    "transports_created",
    "transport_connected",
    "transport_connect_error",
    "producer_created",
    "producer_error",
    "new_producer_available",
    "consumer_created",
    "consumer_error",
    "peer_disconnected",
];

/// Event names the client may send.
pub const CLIENT_EVENT_NAMES: [&str; 7] = [
    "join_video_call",
    "set_rtp_capabilities",
    "connect_transport",
    "start_producing",
    "start_consuming",
    "resume_consumer",
    "leave_video_call",
];

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame exceeds `MAX_FRAME_LEN`
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Frame is not a JSON object with an `event` name
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Event name is not part of the protocol
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Payload does not match the event's schema
    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload {
        /// Event name
        event: String,
        /// Deserializer message
        reason: String,
    },

    /// Message could not be serialized
    #[error("Encoding failed: {0}")]
    Encode(String),
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Encode a client event into a text frame.
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_client_event(event: &ClientEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Encode a server event into a text frame.
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_server_event(event: &ServerEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a text frame received from the server.
///
/// # Errors
///
/// Returns an error if the frame is oversized, malformed, names an unknown
/// event, or carries a payload that does not match the event
pub fn decode_server_event(text: &str) -> Result<ServerEvent, CodecError> {
    decode_frame(text, &SERVER_EVENT_NAMES)
}

/// Decode a text frame sent by a client.
///
/// # Errors
///
/// Returns an error if the frame is oversized, malformed, names an unknown
/// event, or carries a payload that does not match the event
pub fn decode_client_event(text: &str) -> Result<ClientEvent, CodecError> {
    decode_frame(text, &CLIENT_EVENT_NAMES)
}

fn decode_frame<T: DeserializeOwned>(text: &str, known: &[&str]) -> Result<T, CodecError> {
    if text.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(text.len()));
    }

    let frame: RawFrame =
        serde_json::from_str(text).map_err(|e| CodecError::InvalidFrame(e.to_string()))?;

    if !known.contains(&frame.event.as_str()) {
        return Err(CodecError::UnknownEvent(frame.event));
    }

    // Rebuild the tagged form so the enum's own serde rules validate the payload
    let mut tagged = Map::new();
    tagged.insert("event".to_string(), Value::String(frame.event.clone()));
    match frame.data {
        Some(Value::Null) | None => {}
        Some(data) => {
            tagged.insert("data".to_string(), data);
        }
    }

    serde_json::from_value(Value::Object(tagged)).map_err(|e| CodecError::InvalidPayload {
        event: frame.event,
        reason: e.to_string(),
    })
}
