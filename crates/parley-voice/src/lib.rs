//! Real-time voice bridge between a voice-chat platform and a remote
//! multimodal model.
//!
//! [`VoiceBridge`] keeps one [`VoiceSession`] per channel group. Each
//! session owns the platform connection, a [`PlaybackPipeline`] for model
//! audio, one [`CapturePipeline`] per speaking user, and the current model
//! session. Speaking events become manual activity boundaries through the
//! [`ActivityTracker`]; a lost model session is reopened with linear
//! backoff while the voice connection and capture pipelines stay up.

pub mod activity;
pub mod capture;
pub mod config;
pub mod decode;
pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod playback;
pub mod registry;
pub mod session;

pub use activity::ActivityTracker;
pub use capture::{CapturePipeline, DecodeEnd};
pub use config::BridgeConfig;
#[cfg(feature = "opus")]
pub use decode::OpusDecoderFactory;
pub use decode::{DecoderFactory, FrameDecoder, PassthroughDecoderFactory};
pub use error::VoiceError;
pub use orchestrator::{BridgeDeps, VoiceBridge};
pub use platform::{
    AudioSource, ConnectionEvent, JoinedChannel, PlatformError, RawAudioStream, VoiceConnection,
    VoicePlatform,
};
pub use playback::PlaybackPipeline;
pub use registry::{DetachedSession, SessionRegistry};
pub use session::{SessionStatus, TextSink, VoiceSession};
