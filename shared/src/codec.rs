//! JSON codec for live-connection frames
//!
//! Every frame is a single JSON object:
//! ```text
//! { "type": "<kind>", "timestamp": "<RFC 3339>", ...payload fields }
//! ```
//!
//! The transport preserves message boundaries, so no length prefix is used.

use chrono::SecondsFormat;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::message::{InboundMessage, OutboundMessage};

/// Maximum frame size (1 MiB) accepted or produced
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

pub const TYPE_FIELD: &str = "type";
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Frame has no string `type` field")]
    MissingType,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an outbound message into a text frame
pub fn encode(message: &OutboundMessage) -> Result<String, CodecError> {
    let mut object = message.payload().clone();
    object.insert(TYPE_FIELD.into(), Value::String(message.kind().to_string()));
    object.insert(
        TIMESTAMP_FIELD.into(),
        Value::String(
            message
                .enqueued_at()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
    );

    let frame = serde_json::to_string(&Value::Object(object))?;
    if frame.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(frame.len()));
    }

    Ok(frame)
}

/// Split a text frame into its `type` tag and the remaining fields
pub fn split_frame(frame: &str) -> Result<(String, Map<String, Value>), CodecError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(frame.len()));
    }

    let mut fields = match serde_json::from_str::<Value>(frame)? {
        Value::Object(fields) => fields,
        _ => return Err(CodecError::NotAnObject),
    };

    match fields.remove(TYPE_FIELD) {
        Some(Value::String(kind)) => Ok((kind, fields)),
        _ => Err(CodecError::MissingType),
    }
}

/// Decode a text frame into an inbound message
pub fn decode(frame: &str) -> Result<InboundMessage, CodecError> {
    let (kind, fields) = split_frame(frame)?;
    Ok(InboundMessage::from_parts(kind, fields))
}
