//! Host wiring for the parley voice bridge.
//!
//! Loads [`Config`], initialises tracing, and assembles a [`VoiceBridge`]
//! from the process transcoder, the Gemini Live connector and whatever
//! voice platform the embedding application provides.

pub mod config;
pub mod telemetry;

pub use config::{load_config, CaptureConfig, Config, ConfigError, DecoderKind, LoggingConfig};
pub use telemetry::init_tracing;

use parley_model::{GeminiLiveConnector, ModelConfig, SessionSetup, ToolRegistry};
use parley_transcode::{ProcessTranscoderFactory, TranscodeError};
use parley_types::TranscodeSpec;
use parley_voice::{BridgeDeps, DecoderFactory, PassthroughDecoderFactory, VoiceBridge, VoicePlatform};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while assembling the bridge.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transcoder(#[from] TranscodeError),

    #[error("opus decoding requested but parley-host was built without the `opus` feature")]
    OpusUnavailable,
}

/// Session setup template built from the model section.
///
/// Tool declarations and the input format are filled in by the bridge.
pub fn session_setup(model: &ModelConfig) -> SessionSetup {
    SessionSetup {
        model: model.model.clone(),
        system_instruction: model.system_instruction.clone(),
        voice: model.voice.clone(),
        tools: Vec::new(),
        input_format: TranscodeSpec::capture().output,
    }
}

/// The decode stage matching `kind`.
pub fn decoder_factory(kind: DecoderKind) -> Result<Arc<dyn DecoderFactory>, HostError> {
    match kind {
        DecoderKind::Passthrough => Ok(Arc::new(PassthroughDecoderFactory)),
        #[cfg(feature = "opus")]
        DecoderKind::Opus => Ok(Arc::new(parley_voice::OpusDecoderFactory)),
        #[cfg(not(feature = "opus"))]
        DecoderKind::Opus => Err(HostError::OpusUnavailable),
    }
}

/// Assembles a bridge for `platform`.
///
/// Fails when the transcoder binary cannot be found or the decoder choice
/// is unavailable. A missing API key is not an error here; each join will
/// report it instead.
pub fn build_bridge(
    config: &Config,
    platform: Arc<dyn VoicePlatform>,
    tools: ToolRegistry,
) -> Result<VoiceBridge, HostError> {
    let transcoders = ProcessTranscoderFactory::from_config(&config.transcoder)?;
    let decoders = decoder_factory(config.capture.decoder)?;
    if config.model.api_key().is_none() {
        tracing::warn!("no model API key configured; joins will fail until one is set");
    }

    let deps = BridgeDeps {
        platform,
        connector: Arc::new(GeminiLiveConnector::new(config.model.clone())),
        transcoders: Arc::new(transcoders),
        decoders,
        tools: Arc::new(tools),
        setup: session_setup(&config.model),
        playback: config.transcoder.playback_spec(),
        capture: config.transcoder.capture_spec(),
    };

    tracing::info!(
        model = %config.model.model,
        decoder = ?config.capture.decoder,
        "voice bridge assembled"
    );
    Ok(VoiceBridge::new(config.voice.clone(), deps))
}

/// Tool registry configured from the `[tools]` section, with no tools yet.
pub fn tool_registry(config: &Config) -> ToolRegistry {
    ToolRegistry::new(&config.tools)
}
