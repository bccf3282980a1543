//! Wire frame codec
//!
//! Frames travel as UTF-8 text `kind:requestId:payload`. Only the first two
//! `:` are delimiters; the payload is JSON text and may contain `:` itself.

use serde::de::DeserializeOwned;
use serde::Serialize;

const DELIMITER: char = ':';

/// Errors raised while decoding a wire frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame has {parts} delimited part(s), expected 3")]
    MissingDelimiter { parts: usize },
}

/// One decoded frame.
///
/// `request_id` is empty for fire-and-forget frames. `payload` is kept as
/// raw JSON text; use [`Frame::payload_as`] to interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: String,
    pub request_id: String,
    pub payload: String,
}

impl Frame {
    pub fn new(
        kind: impl Into<String>,
        request_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            request_id: request_id.into(),
            payload: payload.into(),
        }
    }

    /// A frame with no correlation id.
    pub fn notification(kind: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(kind, String::new(), payload)
    }

    pub fn is_fire_and_forget(&self) -> bool {
        self.request_id.is_empty()
    }

    pub fn encode(&self) -> String {
        encode(&self.kind, &self.request_id, &self.payload)
    }

    /// Deserialize the JSON payload.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

pub fn encode(kind: &str, request_id: &str, payload: &str) -> String {
    let mut out = String::with_capacity(kind.len() + request_id.len() + payload.len() + 2);
    out.push_str(kind);
    out.push(DELIMITER);
    out.push_str(request_id);
    out.push(DELIMITER);
    out.push_str(payload);
    out
}

pub fn decode(wire: &str) -> Result<Frame, FrameError> {
    let mut parts = wire.splitn(3, DELIMITER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(kind), Some(request_id), Some(payload)) => Ok(Frame::new(kind, request_id, payload)),
        (_, Some(_), None) => Err(FrameError::MissingDelimiter { parts: 2 }),
        _ => Err(FrameError::MissingDelimiter { parts: 1 }),
    }
}

/// JSON-encode a payload value.
///
/// Strings come out quoted, everything else in native JSON form.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Quote a string as a JSON string payload. Never fails.
pub fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// The JSON `null` payload.
pub const NULL_PAYLOAD: &str = "null";
