//! Error types for the bridge core

use thiserror::Error;

/// Failures raised by host capabilities
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("{0} is not available on this host")]
    Unsupported(&'static str),

    #[error("user presence was not confirmed")]
    PresenceDenied,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// Errors surfaced by the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("{0}")]
    Operation(String),

    /// The user dismissed a UI flow. Shown to the page as `Cancelled`.
    #[error("Cancelled")]
    FlowCancelled,

    #[error("consent was still required after retrying")]
    ConsentExhausted,

    #[error("background process unavailable: {0}")]
    ConnectionLost(String),
}

impl BridgeError {
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::FlowCancelled)
    }

    /// Payload for an `error` frame: the description as a JSON string.
    pub fn to_payload(&self) -> String {
        hostbridge_protocol::quote(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_payload_is_quoted_cancelled() {
        assert_eq!(BridgeError::FlowCancelled.to_payload(), "\"Cancelled\"");
        assert!(BridgeError::FlowCancelled.is_cancellation());
        assert!(!BridgeError::operation("boom").is_cancellation());
    }

    #[test]
    fn capability_errors_keep_their_message() {
        let err: BridgeError = CapabilityError::Unsupported("clipboard").into();
        assert_eq!(err.to_string(), "clipboard is not available on this host");
    }
}
