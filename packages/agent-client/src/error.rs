//! Error types for the agent streaming client.

use thiserror::Error;

/// Result type for agent client operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent client errors.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration error (missing base URL, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, dropped mid-stream)
    #[error("Network error: {0}")]
    Network(String),

    /// API error (non-2xx response, server-side failure)
    #[error("API error: {0}")]
    Api(String),

    /// Parse error (invalid JSON, unexpected response format)
    #[error("Parse error: {0}")]
    Parse(String),
}
