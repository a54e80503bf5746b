//! Shared identifiers and audio format descriptors for the parley voice bridge.
//!
//! Every other crate in the workspace depends on `parley-types` for the
//! identities that key voice sessions (`GroupId`, `ChannelId`, `UserId`),
//! the PCM format descriptors handed to transcoders, and the session state
//! enum exposed by the orchestrator.
//!
//! Nothing in here performs I/O.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a platform identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// A channel group (guild, server, workspace). At most one voice session
    /// exists per group.
    GroupId
);

string_id!(
    /// A voice channel inside a group.
    ChannelId
);

string_id!(
    /// A participant in a voice channel.
    UserId
);

/// Raw signed 16-bit little-endian PCM layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Samples per second per channel.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

impl PcmFormat {
    /// Bytes per sample for s16le.
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// 48 kHz stereo, the format voice platforms decode into.
    pub const fn platform() -> Self {
        Self::new(48_000, 2)
    }

    /// Number of bytes covering `millis` milliseconds of audio.
    pub fn bytes_for_millis(&self, millis: u32) -> usize {
        let frames = self.sample_rate as usize * millis as usize / 1000;
        frames * self.channels as usize * Self::BYTES_PER_SAMPLE
    }

    /// MIME type used when shipping this format to the model service.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

/// Direction a transcoder converts audio in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeDirection {
    /// Model output to voice channel.
    Playback,
    /// Voice channel to model input.
    Capture,
}

impl TranscodeDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playback => "playback",
            Self::Capture => "capture",
        }
    }
}

/// Input and output formats for one transcoder process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranscodeSpec {
    pub direction: TranscodeDirection,
    pub input: PcmFormat,
    pub output: PcmFormat,
}

impl TranscodeSpec {
    /// Model PCM (24 kHz mono) to platform PCM (48 kHz stereo).
    pub const fn playback() -> Self {
        Self {
            direction: TranscodeDirection::Playback,
            input: PcmFormat::new(24_000, 1),
            output: PcmFormat::platform(),
        }
    }

    /// Platform PCM (48 kHz stereo) to model PCM (16 kHz mono).
    pub const fn capture() -> Self {
        Self {
            direction: TranscodeDirection::Capture,
            input: PcmFormat::platform(),
            output: PcmFormat::new(16_000, 1),
        }
    }
}

/// Lifecycle state of one voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, nothing opened yet.
    Idle,
    /// Joining the voice channel and opening the model session.
    Connecting,
    /// Model session open, speaking events wired.
    Active,
    /// Model session lost, reconnect loop running.
    Reconnecting,
    /// Reconnect attempts exhausted; registered but audio-dead until leave.
    Failed,
    /// Torn down. Terminal.
    Closed,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// Whether the session can still carry audio at some point.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Active | Self::Reconnecting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when parsing a [`SessionState`] label fails.
#[derive(Debug, thiserror::Error)]
#[error("unknown session state: {0}")]
pub struct UnknownSessionState(pub String);

impl std::str::FromStr for SessionState {
    type Err = UnknownSessionState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "connecting" => Ok(Self::Connecting),
            "active" => Ok(Self::Active),
            "reconnecting" => Ok(Self::Reconnecting),
            "failed" => Ok(Self::Failed),
            "closed" => Ok(Self::Closed),
            other => Err(UnknownSessionState(other.to_string())),
        }
    }
}
