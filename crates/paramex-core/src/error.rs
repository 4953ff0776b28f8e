//! Error types for paramex-core

use thiserror::Error;

use paramex_wire::WireError;

/// Errors surfaced to the caller of the exploration engine.
///
/// Remote failures during play/update/time-warp never reach this type; they
/// are logged and degraded to no-ops at the call site.
#[derive(Error, Debug)]
pub enum ExplorerError {
    /// A parameter name was not found in the registry
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// A value does not satisfy the parameter's type constraint
    #[error("invalid value for parameter {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    /// Score outside [0, 100] or non-numeric
    #[error("invalid score {0}: expected a finite number in [0, 100]")]
    InvalidScore(f64),

    /// Configuration rejected by `ExplorerConfig::validate`
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No agent registered under the given name
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// Durable session storage failed
    #[error("session store failure: {0}")]
    Session(String),

    /// A manual commit was requested but no manual sample is pending
    #[error("no pending manual sample to commit")]
    NoPendingSample,

    /// The server did not return an identifier for a saved record
    #[error("save returned no record identifier")]
    MissingRecordId,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistence call failed (save / save_single)
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Result type for engine operations
pub type ExplorerResult<T> = std::result::Result<T, ExplorerError>;

/// Validate a score at the scoring boundary.
pub fn validate_score(score: f64) -> ExplorerResult<f64> {
    if score.is_finite() && (0.0..=100.0).contains(&score) {
        Ok(score)
    } else {
        Err(ExplorerError::InvalidScore(score))
    }
}
