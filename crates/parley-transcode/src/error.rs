use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscodeError {
    #[error("transcoder binary not found: {0}")]
    BinaryNotFound(String),

    #[error("failed to spawn transcoder '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("transcoder I/O error: {0}")]
    Io(String),
}
