//! Error types for queue operations.

use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("The queue is not opened")]
    NotOpened,

    #[error("Failed to access queue '{queue}': {message}")]
    Connection { queue: String, message: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message not found or receipt expired: {receipt}")]
    MessageNotFound { receipt: String },

    #[error("Provider error ({code}): {message}")]
    Provider { code: String, message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl QueueError {
    /// Check if error is transient and a later attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotOpened => false,
            Self::Connection { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::QueueNotFound { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::Provider { .. } => true, // Most provider-side errors are transient
            Self::Serialization(_) => false,
            Self::Configuration(_) => false,
        }
    }
}

/// Configuration errors surfaced during resolve/open, never in steady state
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("AWS connection is not set")]
    NoConnection,

    #[error("No region is configured in the AWS connection")]
    NoRegion,

    #[error("No access_id is configured in the AWS credential")]
    NoAccessId,

    #[error("No access_key is configured in the AWS credential")]
    NoAccessKey,

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
