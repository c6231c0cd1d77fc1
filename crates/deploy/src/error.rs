//! Error taxonomy for the deployment core.

use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by the deployment core.
///
/// Transaction failures inside a running plan are reported through
/// [`crate::ExecutionResult`] rather than an `Err` return, so that the
/// completed-step record survives the failure. Everything here is fatal to
/// the operation that raised it.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// An input reference in the plan is unresolved or points forward.
    /// Detected before any transaction is submitted.
    #[error("plan validation failed: {0}")]
    PlanValidation(String),

    /// A submitted transaction terminated in an error, invalid or dropped
    /// state.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// No terminal notification was observed within the configured bound.
    #[error("timed out after {0:?} awaiting transaction finalization")]
    Timeout(Duration),

    /// Underlying artifact storage read or write failure.
    #[error("artifact i/o error at {path}: {reason}")]
    ArtifactIo { path: PathBuf, reason: String },

    /// Caller-supplied input was invalid before any chain interaction.
    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl DeployError {
    /// Shorthand for an [`DeployError::ArtifactIo`] with path context.
    pub fn artifact_io(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ArtifactIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
