//! Classification of engine responses
//!
//! The engine reports most outcomes as free text. Classification is a
//! case-insensitive pattern match over that text.

use crate::executor::ExecuteResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// The object is already there; re-initialization treats this as success.
    AlreadyExists,
    /// Worth resubmitting after a backoff.
    Transient,
    Permanent,
}

impl ResponseClass {
    pub fn is_success(self) -> bool {
        matches!(self, ResponseClass::Success | ResponseClass::AlreadyExists)
    }
}

const ALREADY_EXISTS_PATTERNS: &[&str] = &["already exists"];

const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout while waiting for command topic",
    "could not write the statement",
    "command topic",
    "server is not ready",
    "service unavailable",
    "timed out",
    "connection refused",
    "leader not available",
];

/// Classify a message from a statement that the engine rejected.
pub fn classify(message: &str) -> ResponseClass {
    let lower = message.to_lowercase();
    if ALREADY_EXISTS_PATTERNS.iter().any(|p| lower.contains(p)) {
        ResponseClass::AlreadyExists
    } else if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ResponseClass::Transient
    } else {
        ResponseClass::Permanent
    }
}

/// Classify a full response.
pub fn classify_response(response: &ExecuteResponse) -> ResponseClass {
    if response.success {
        ResponseClass::Success
    } else {
        classify(&response.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_success() {
        assert_eq!(
            classify_response(&ExecuteResponse::ok("Table created")),
            ResponseClass::Success
        );
    }

    #[test]
    fn test_already_exists_is_idempotent() {
        let class = classify("Cannot add table 'BAR_1M_LIVE': A table with the same name already exists");
        assert_eq!(class, ResponseClass::AlreadyExists);
        assert!(class.is_success());
    }

    #[test]
    fn test_command_topic_timeout_is_transient() {
        assert_eq!(
            classify("Timeout while waiting for command topic consumer to process command"),
            ResponseClass::Transient
        );
    }

    #[test]
    fn test_syntax_error_is_permanent() {
        let class = classify("line 1:8: mismatched input 'TABEL' expecting {'STREAM', 'TABLE'}");
        assert_eq!(class, ResponseClass::Permanent);
        assert!(!class.is_success());
    }
}
