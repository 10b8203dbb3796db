//! Orchestration errors

use thiserror::Error;
use tumbler_ksql::{KsqlError, Retryable};
use tumbler_sql::SqlError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Validation, planning or synthesis failed; nothing was submitted
    #[error("Planning failed: {0}")]
    Planning(#[from] SqlError),

    #[error("Transient engine error for {entity}: {message}")]
    TransientEngine { entity: String, message: String },

    #[error("Engine rejected statement for {entity}: {message} (statement: {statement})")]
    PermanentEngine {
        entity: String,
        statement: String,
        message: String,
    },

    #[error("Stabilization of {entity} timed out: {reason}")]
    StabilizationTimeout { entity: String, reason: String },

    #[error("Stabilization of {entity} failed: {reason}")]
    StabilizationFailed { entity: String, reason: String },

    #[error("Pipeline {query} exceeded its {timeout_ms}ms deadline")]
    DeadlineExceeded { query: String, timeout_ms: u64 },

    #[error("Pipeline {0} was cancelled")]
    Cancelled(String),

    #[error("Failed to initialize {entity} after {attempts} attempt(s): {message} (statement: {statement})")]
    Initialization {
        entity: String,
        attempts: u32,
        statement: String,
        message: String,
    },

    #[error("Engine error: {0}")]
    Ksql(#[from] KsqlError),
}

impl OrchestratorError {
    /// Whether terminating and re-submitting the entity may help.
    pub fn is_stabilization_failure(&self) -> bool {
        matches!(
            self,
            OrchestratorError::StabilizationTimeout { .. }
                | OrchestratorError::StabilizationFailed { .. }
        )
    }
}

impl Retryable for OrchestratorError {
    fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::TransientEngine { .. } => true,
            OrchestratorError::Ksql(err) => err.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
