use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model API key is not configured")]
    MissingApiKey,

    #[error("failed to connect to model service: {0}")]
    Connect(String),

    #[error("model session setup timed out after {0} ms")]
    SetupTimeout(u64),

    #[error("model service rejected session setup: {0}")]
    SetupRejected(String),

    #[error("model protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

/// Failure reported by a tool implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}
