//! The voice-chat platform as seen by the bridge.
//!
//! A platform adapter (Discord, a SIP gateway, a test double) implements
//! [`VoicePlatform`] and [`VoiceConnection`] and reports what happens on
//! the connection through [`ConnectionEvent`]s.

use async_trait::async_trait;
use bytes::Bytes;
use parley_transcode::TranscodeOutput;
use parley_types::{ChannelId, GroupId, PcmFormat, UserId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("failed to join voice channel: {0}")]
    Join(String),

    #[error("voice connection failed before becoming ready: {0}")]
    NotReady(String),

    #[error("failed to subscribe to user audio: {0}")]
    Subscribe(String),

    #[error("user audio stream failed: {0}")]
    Stream(String),
}

/// One user's incoming audio packets.
///
/// The platform never ends this stream on its own for silence; it ends only
/// when the subscription is torn down or fails. Dropping the receiver
/// unsubscribes.
pub type RawAudioStream = mpsc::UnboundedReceiver<Result<Bytes, PlatformError>>;

/// Audio for the channel's player: raw PCM in `format`.
#[derive(Debug)]
pub struct AudioSource {
    pub format: PcmFormat,
    pub output: TranscodeOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    SpeakingStart(UserId),
    SpeakingEnd(UserId),
    /// The player has nothing to play.
    PlayerIdle,
    /// The connection dropped and will not come back.
    Disconnected,
    Destroyed,
}

/// Result of joining a channel.
pub struct JoinedChannel {
    pub connection: Arc<dyn VoiceConnection>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

#[async_trait]
pub trait VoicePlatform: Send + Sync {
    async fn join(&self, group: &GroupId, channel: &ChannelId) -> Result<JoinedChannel, PlatformError>;
}

#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Resolves once the connection can send and receive audio.
    async fn ready(&self) -> Result<(), PlatformError>;

    /// Opens a raw audio subscription for `user` with manual end-of-stream.
    fn subscribe_user(&self, user: &UserId) -> Result<RawAudioStream, PlatformError>;

    /// Replaces whatever the player is playing with `source`.
    fn play(&self, source: AudioSource);

    fn stop_player(&self);

    /// Leaves the channel. Called once, last, during teardown.
    fn destroy(&self);
}
