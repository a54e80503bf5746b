//! `parley-doctor`: checks that a host can run the voice bridge.
//!
//! Loads the configuration, pushes half a second of silence through the
//! capture transcoder and, when an API key is configured, opens and closes
//! one model session. Exits non-zero if any check fails.

use bytes::Bytes;
use parley_host::{init_tracing, load_config, session_setup, Config};
use parley_model::{GeminiLiveConnector, ModelConnector, ModelEvent};
use parley_transcode::{ProcessTranscoderFactory, TranscoderFactory};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;

const PROBE_MILLIS: u32 = 500;
const TRANSCODE_DEADLINE: Duration = Duration::from_secs(5);

/// Resolves the configuration file path, in priority order:
/// 1) first CLI argument
/// 2) `PARLEY_CONFIG_PATH`
/// 3) `parley.toml`
fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env");
        }
    }

    (Some("parley.toml".to_string()), "default")
}

enum Check {
    Pass(String),
    Skip(String),
    Fail(String),
}

async fn check_transcoder(config: &Config) -> Check {
    let factory = match ProcessTranscoderFactory::from_config(&config.transcoder) {
        Ok(factory) => factory,
        Err(e) => return Check::Fail(e.to_string()),
    };

    let spec = config.transcoder.capture_spec();
    let mut pipeline = factory.create(&spec);
    let Some(mut output) = pipeline.take_output() else {
        return Check::Fail("transcoder output unavailable".to_string());
    };

    let silence = Bytes::from(vec![0u8; spec.input.bytes_for_millis(PROBE_MILLIS)]);
    pipeline.write(silence);

    let received = tokio::time::timeout(TRANSCODE_DEADLINE, output.recv()).await;
    pipeline.kill();

    match received {
        Ok(Some(Ok(pcm))) => Check::Pass(format!(
            "{} converted {} -> {} ({} bytes out)",
            factory.program().display(),
            spec.input,
            spec.output,
            pcm.len()
        )),
        Ok(Some(Err(e))) => Check::Fail(e.to_string()),
        Ok(None) => Check::Fail("transcoder exited without output".to_string()),
        Err(_) => Check::Fail(format!(
            "no output within {} ms",
            TRANSCODE_DEADLINE.as_millis()
        )),
    }
}

async fn check_model(config: &Config) -> Check {
    if config.model.api_key().is_none() {
        return Check::Skip("no API key configured".to_string());
    }

    let connector = GeminiLiveConnector::new(config.model.clone());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let session = match connector.open(&session_setup(&config.model), events_tx).await {
        Ok(session) => session,
        Err(e) => return Check::Fail(e.to_string()),
    };

    session.close();
    let closed = tokio::time::timeout(config.model.setup_timeout(), async {
        while let Some(event) = events_rx.recv().await {
            if let ModelEvent::Closed { .. } = event {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !closed {
        tracing::warn!("model session did not report close");
    }
    Check::Pass(format!("session opened with {}", config.model.model))
}

fn report(name: &str, check: &Check) -> bool {
    match check {
        Check::Pass(detail) => {
            println!("[ ok ] {name}: {detail}");
            true
        }
        Check::Skip(detail) => {
            println!("[skip] {name}: {detail}");
            true
        }
        Check::Fail(detail) => {
            println!("[FAIL] {name}: {detail}");
            false
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let (config_path, config_source) = resolve_config_path();
    let config = match load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("parley-doctor: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging);
    tracing::info!(
        source = config_source,
        path = config_path.as_deref().unwrap_or("<none>"),
        "resolved configuration path"
    );

    let transcoder = check_transcoder(&config).await;
    let model = check_model(&config).await;

    let ok = [report("transcoder", &transcoder), report("model", &model)]
        .into_iter()
        .all(|passed| passed);

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
