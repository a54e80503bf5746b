//! Configuration loading from file and environment variables.

use parley_model::{ModelConfig, ToolConfig};
use parley_transcode::TranscoderConfig;
use parley_voice::BridgeConfig;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Remote model connection.
    #[serde(default)]
    pub model: ModelConfig,

    /// Bridge timing and reconnect policy.
    #[serde(default)]
    pub voice: BridgeConfig,

    /// Transcoder binary and formats.
    #[serde(default)]
    pub transcoder: TranscoderConfig,

    /// Tool execution.
    #[serde(default)]
    pub tools: ToolConfig,

    /// Decode stage for incoming user audio.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What the platform delivers for each user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    /// Already-decoded 48 kHz stereo PCM.
    #[default]
    Passthrough,
    /// Opus packets. Needs the `opus` feature.
    Opus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub decoder: DecoderKind,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Rejects settings the bridge cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.voice.reconnect_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "voice.reconnect_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.voice.ready_timeout_ms == 0 || self.model.setup_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        for (name, pair) in [("playback", &self.transcoder.playback), ("capture", &self.transcoder.capture)] {
            if pair.input.sample_rate == 0
                || pair.output.sample_rate == 0
                || pair.input.channels == 0
                || pair.output.channels == 0
            {
                return Err(ConfigError::Invalid(format!(
                    "transcoder.{name} formats need a sample rate and channel count"
                )));
            }
        }
        Ok(())
    }
}

/// Applies environment overrides read through `var`.
///
/// - `PARLEY_MODEL_API_KEY` (or `GEMINI_API_KEY`) overrides `model.api_key`
/// - `PARLEY_MODEL` overrides `model.model`
/// - `PARLEY_MODEL_ENDPOINT` overrides `model.endpoint`
/// - `PARLEY_TRANSCODER_PATH` overrides `transcoder.binary_path`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
pub fn apply_env_overrides<F>(config: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| var(name).filter(|value| !value.trim().is_empty());

    if let Some(key) = non_empty("PARLEY_MODEL_API_KEY").or_else(|| non_empty("GEMINI_API_KEY")) {
        config.model.api_key = Some(key);
    }
    if let Some(model) = non_empty("PARLEY_MODEL") {
        config.model.model = model;
    }
    if let Some(endpoint) = non_empty("PARLEY_MODEL_ENDPOINT") {
        config.model.endpoint = endpoint;
    }
    if let Some(path) = non_empty("PARLEY_TRANSCODER_PATH") {
        config.transcoder.binary_path = Some(PathBuf::from(path));
    }
    if let Some(level) = non_empty("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies process environment overrides (see [`apply_env_overrides`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the result fails [`Config::validate`].
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}
