// src/error.rs

//! Unified error handling for the harvester.

use std::fmt;

use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
///
/// Only storage-level variants are expected to escape a run; everything
/// raised inside the acquisition core is folded into quality flags.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A fetch tool reported a failure
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    /// An external call exceeded its deadline
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Reasoning service call failed or returned nothing usable
    #[error("Reasoning service error: {0}")]
    Reasoning(String),

    /// Headless browser error
    #[error("Browser error: {0}")]
    Browser(String),

    /// Checkpoint storage is unreadable; requires manual intervention
    #[error("Checkpoint for phase '{phase}' corrupted at line {line}: {message}")]
    CheckpointCorrupted {
        phase: String,
        line: usize,
        message: String,
    },

    /// Checkpoint write was refused
    #[error("Checkpoint error for phase '{phase}': {message}")]
    Checkpoint { phase: String, message: String },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a tool failure with context.
    pub fn tool(tool: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Create a reasoning service error.
    pub fn reasoning(message: impl fmt::Display) -> Self {
        Self::Reasoning(message.to_string())
    }

    /// Create a browser error.
    pub fn browser(message: impl fmt::Display) -> Self {
        Self::Browser(message.to_string())
    }

    /// Create a refused-write checkpoint error.
    pub fn checkpoint(phase: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Checkpoint {
            phase: phase.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error came from an exceeded deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_detection() {
        assert!(AppError::timeout("fetch", 30).is_timeout());
        assert!(!AppError::tool("fetch", "boom").is_timeout());
    }

    #[test]
    fn test_display() {
        let err = AppError::CheckpointCorrupted {
            phase: "acquire".into(),
            line: 4,
            message: "expected value".into(),
        };
        assert_eq!(
            err.to_string(),
            "Checkpoint for phase 'acquire' corrupted at line 4: expected value"
        );
    }
}
