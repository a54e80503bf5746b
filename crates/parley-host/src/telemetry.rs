use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// An unparseable level falls back to `info`. Returns `false` if a
/// subscriber was already installed, which happens when an embedding
/// application set up its own.
pub fn init_tracing(logging: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    installed.is_ok()
}
