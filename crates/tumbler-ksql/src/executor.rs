//! Statement execution seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Outcome of one submitted statement as reported by the engine.
///
/// A rejected statement is not an `Err`: the engine answered, and the message
/// decides whether the caller retries, ignores or fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub message: String,
}

impl ExecuteResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Submits statements to a ksqlDB-like engine.
///
/// `Err` is reserved for failures to reach the engine at all.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(&self, statement: &str) -> Result<ExecuteResponse>;

    /// Pipe-delimited `SHOW QUERIES` listing.
    async fn show_queries(&self) -> Result<String> {
        let response = self.execute("SHOW QUERIES;").await?;
        Ok(response.message)
    }
}
