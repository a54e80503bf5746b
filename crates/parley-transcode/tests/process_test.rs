//! Process supervision tests. They use ordinary unix tools in place of
//! ffmpeg through the factory's argument builder.

#![cfg(unix)]

use bytes::Bytes;
use parley_transcode::{ProcessTranscoderFactory, TranscodeError, TranscoderFactory};
use parley_types::TranscodeSpec;
use std::ffi::OsString;
use std::time::Duration;
use tokio::time::timeout;

fn no_args(_: &TranscodeSpec) -> Vec<OsString> {
    Vec::new()
}

fn exit_immediately(_: &TranscodeSpec) -> Vec<OsString> {
    vec!["-c".into(), "exit 0".into()]
}

async fn wait_until_dead(pipeline: &parley_transcode::TranscoderPipeline) {
    timeout(Duration::from_secs(5), async {
        while pipeline.is_alive() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pipeline should die");
}

#[tokio::test]
async fn test_cat_echoes_written_audio() {
    let factory = ProcessTranscoderFactory::new("cat").with_args(no_args);
    let mut pipeline = factory.create(&TranscodeSpec::capture());
    assert!(pipeline.is_alive());

    let mut output = pipeline.take_output().expect("output available once");
    assert!(pipeline.write(Bytes::from_static(b"abcd")));
    assert!(pipeline.write(Bytes::from_static(b"efgh")));

    let mut received = Vec::new();
    while received.len() < 8 {
        let chunk = timeout(Duration::from_secs(5), output.recv())
            .await
            .expect("cat should echo")
            .expect("output should stay open")
            .expect("no read error");
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, b"abcdefgh");

    pipeline.kill();
}

#[tokio::test]
async fn test_kill_ends_output_and_liveness() {
    let factory = ProcessTranscoderFactory::new("cat").with_args(no_args);
    let mut pipeline = factory.create(&TranscodeSpec::playback());
    let mut output = pipeline.take_output().unwrap();

    pipeline.kill();
    assert!(!pipeline.is_alive());
    // Writes after kill are silently dropped.
    assert!(!pipeline.write(Bytes::from_static(b"late")));

    let end = timeout(Duration::from_secs(5), output.recv())
        .await
        .expect("output should end after kill");
    assert!(end.is_none());

    // Killing again is harmless.
    pipeline.kill();
}

#[tokio::test]
async fn test_process_exit_flips_liveness() {
    let factory = ProcessTranscoderFactory::new("sh").with_args(exit_immediately);
    let mut pipeline = factory.create(&TranscodeSpec::capture());
    let mut output = pipeline.take_output().unwrap();

    wait_until_dead(&pipeline).await;
    assert!(!pipeline.write(Bytes::from_static(b"ignored")));

    let end = timeout(Duration::from_secs(5), output.recv()).await.unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_spawn_failure_is_dead_with_error() {
    let factory = ProcessTranscoderFactory::new("/nonexistent/parley-transcoder");
    let mut pipeline = factory.create(&TranscodeSpec::capture());

    assert!(!pipeline.is_alive());
    let mut output = pipeline.take_output().unwrap();
    match output.recv().await {
        Some(Err(TranscodeError::Spawn { program, .. })) => {
            assert!(program.contains("parley-transcoder"))
        }
        other => panic!("expected spawn error, got {:?}", other),
    }
    assert!(output.recv().await.is_none());
}
