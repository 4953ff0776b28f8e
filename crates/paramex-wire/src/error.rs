//! Error types for paramex-wire

use thiserror::Error;

use crate::protocol::Endpoint;

/// Errors that can occur while talking to the explorer server
#[derive(Error, Debug)]
pub enum WireError {
    /// The request never produced a response (connection refused, reset, ...)
    #[error("transport failure on {endpoint}: {reason}")]
    Transport { endpoint: Endpoint, reason: String },

    /// The server answered with `status = "error"`
    #[error("{endpoint} returned an error status: {message}")]
    ErrorStatus { endpoint: Endpoint, message: String },

    /// The response did not carry the expected status or payload fields
    #[error("{endpoint} returned an unexpected response: {reason}")]
    MalformedResponse { endpoint: Endpoint, reason: String },

    /// Request serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport could not be configured
    #[error("invalid transport configuration: {0}")]
    Config(String),
}

impl WireError {
    /// Whether the failure happened before any response was received.
    pub fn is_transport(&self) -> bool {
        matches!(self, WireError::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_display_names_endpoint() {
        let err = WireError::ErrorStatus {
            endpoint: Endpoint::AgentPlay,
            message: "agent_name not set".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("agent/play"));
        assert!(msg.contains("agent_name not set"));
        assert!(!err.is_transport());
    }

    #[test]
    fn test_transport_error_is_transport() {
        let err = WireError::Transport {
            endpoint: Endpoint::Save,
            reason: "connection refused".to_string(),
        };
        assert!(err.is_transport());
        assert!(err.to_string().contains("save"));
    }
}
