use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Gemini Live bidirectional streaming endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    "models/gemini-2.0-flash-live-001".to_string()
}

fn default_voice() -> Option<String> {
    Some("Puck".to_string())
}

fn default_system_instruction() -> String {
    "You are a friendly voice assistant taking part in a group voice chat. \
     Keep answers short and conversational, and use the available tools when \
     a question needs fresh information."
        .to_string()
}

fn default_setup_timeout_ms() -> u64 {
    15_000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_provider_internal() -> Vec<String> {
    vec!["google_search".to_string(), "code_execution".to_string()]
}

/// Connection settings for the remote model service.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Prebuilt voice name. `None` lets the service choose.
    #[serde(default = "default_voice")]
    pub voice: Option<String>,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    /// Bound on connecting plus waiting for setup acknowledgement.
    #[serde(default = "default_setup_timeout_ms")]
    pub setup_timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            voice: default_voice(),
            system_instruction: default_system_instruction(),
            setup_timeout_ms: default_setup_timeout_ms(),
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("endpoint", &self.endpoint)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("system_instruction", &self.system_instruction)
            .field("setup_timeout_ms", &self.setup_timeout_ms)
            .finish()
    }
}

impl ModelConfig {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    /// The API key, if one is set and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Tool execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Deadline for a single tool call. Expiry produces an error payload.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Tool names the model service executes itself. Calls to these are
    /// never answered by the bridge.
    #[serde(default = "default_provider_internal")]
    pub provider_internal: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            provider_internal: default_provider_internal(),
        }
    }
}

impl ToolConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}
