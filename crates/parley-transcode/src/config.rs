use parley_types::{PcmFormat, TranscodeDirection, TranscodeSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_read_chunk_ms() -> u32 {
    20
}

fn default_capture() -> FormatPair {
    FormatPair::from(TranscodeSpec::capture())
}

fn default_playback() -> FormatPair {
    FormatPair::from(TranscodeSpec::playback())
}

/// Input/output format pair for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatPair {
    pub input: PcmFormat,
    pub output: PcmFormat,
}

impl FormatPair {
    pub fn to_spec(self, direction: TranscodeDirection) -> TranscodeSpec {
        TranscodeSpec {
            direction,
            input: self.input,
            output: self.output,
        }
    }
}

impl From<TranscodeSpec> for FormatPair {
    fn from(spec: TranscodeSpec) -> Self {
        Self {
            input: spec.input,
            output: spec.output,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Explicit path to the transcoder binary. When unset the binary is
    /// searched for on `PATH` and in well-known install directories.
    #[serde(default)]
    pub binary_path: Option<PathBuf>,
    /// Model output to voice channel.
    #[serde(default = "default_playback")]
    pub playback: FormatPair,
    /// Voice channel to model input.
    #[serde(default = "default_capture")]
    pub capture: FormatPair,
    /// Size of each stdout read, expressed as milliseconds of output audio.
    #[serde(default = "default_read_chunk_ms")]
    pub read_chunk_ms: u32,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            playback: default_playback(),
            capture: default_capture(),
            read_chunk_ms: default_read_chunk_ms(),
        }
    }
}

impl TranscoderConfig {
    pub fn playback_spec(&self) -> TranscodeSpec {
        self.playback.to_spec(TranscodeDirection::Playback)
    }

    pub fn capture_spec(&self) -> TranscodeSpec {
        self.capture.to_spec(TranscodeDirection::Capture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_model_and_platform_rates() {
        let config = TranscoderConfig::default();
        assert_eq!(config.playback_spec(), TranscodeSpec::playback());
        assert_eq!(config.capture_spec(), TranscodeSpec::capture());
        assert_eq!(config.read_chunk_ms, 20);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: TranscoderConfig = toml::from_str(
            r#"
            binary_path = "/opt/ffmpeg/bin/ffmpeg"

            [capture]
            input = { sample_rate = 48000, channels = 2 }
            output = { sample_rate = 24000, channels = 1 }
            "#,
        )
        .unwrap();
        assert_eq!(
            config.binary_path.as_deref(),
            Some(std::path::Path::new("/opt/ffmpeg/bin/ffmpeg"))
        );
        assert_eq!(config.capture_spec().output, PcmFormat::new(24_000, 1));
        assert_eq!(config.playback_spec(), TranscodeSpec::playback());
    }
}
