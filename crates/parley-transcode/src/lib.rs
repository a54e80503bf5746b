//! Transcoder process wrapper for the parley voice bridge.
//!
//! Each direction of audio (model output to the voice channel, voice
//! channel to the model) is resampled by an external process. This crate
//! spawns and supervises those processes and exposes each one as a
//! [`TranscoderPipeline`]: a non-blocking input sink, an output source, a
//! liveness flag and an idempotent kill.
//!
//! Once a pipeline dies it stays dead. Owners discard it and ask the
//! [`TranscoderFactory`] for a new one.

pub mod config;
pub mod error;
pub mod locate;
pub mod pipeline;
pub mod process;

pub use config::{FormatPair, TranscoderConfig};
pub use error::TranscodeError;
pub use locate::{locate_binary, FFMPEG};
pub use pipeline::{
    Liveness, PipelineEnds, TranscodeChunk, TranscodeOutput, TranscoderFactory,
    TranscoderPipeline,
};
pub use process::{ffmpeg_args, ArgBuilder, ProcessTranscoderFactory};
