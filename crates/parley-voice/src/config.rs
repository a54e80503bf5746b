use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_ready_timeout_ms() -> u64 {
    15_000
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_reconnect_max_attempts() -> u32 {
    3
}

fn default_reconnect_base_delay_ms() -> u64 {
    2_000
}

fn default_reconnect_grace_ms() -> u64 {
    30_000
}

fn default_failure_notice() -> String {
    "Lost the connection to the voice model and could not get it back. \
     Ask me to leave and join again to retry."
        .to_string()
}

/// Timing and retry settings of the voice bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// How long a join waits for the voice connection to become ready.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Silence required before an activity segment is closed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Consecutive model-session failures, counting the initial close, after
    /// which reconnecting gives up.
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    /// Reconnect delay is `base * attempt`.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// A reopened session must stay open this long before the attempt
    /// counter resets.
    #[serde(default = "default_reconnect_grace_ms")]
    pub reconnect_grace_ms: u64,
    /// Text delivered to the session's text sink when reconnecting gives up.
    #[serde(default = "default_failure_notice")]
    pub failure_notice: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            debounce_ms: default_debounce_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_grace_ms: default_reconnect_grace_ms(),
            failure_notice: default_failure_notice(),
        }
    }
}

impl BridgeConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }
}
