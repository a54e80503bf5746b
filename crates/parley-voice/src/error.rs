use parley_model::ModelError;
use thiserror::Error;

use crate::platform::PlatformError;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("voice connection was not ready within {0} ms")]
    JoinTimeout(u64),

    #[error("voice platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("failed to open model session: {0}")]
    Model(#[from] ModelError),

    #[error("join was cancelled by a concurrent leave or join")]
    Cancelled,

    #[error("no voice session for group {0}")]
    NotJoined(String),
}
