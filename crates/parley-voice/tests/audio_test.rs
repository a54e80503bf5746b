//! Capture and playback paths.

mod common;

use bytes::Bytes;
use common::{advance, harness, harness_with, settle, config};
use parley_model::protocol::{ClientMessage, FunctionCall};
use parley_model::{FunctionDeclaration, ModelEvent, Tool, ToolError, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_capture_output_forwarded_only_while_open() {
    let h = harness();
    let conn = h.join("g1", "lobby").await;
    let model = h.connector.model(0);

    conn.speak("alice");
    settle().await;
    assert!(conn.send_packet("alice", b"opus-or-pcm"));
    settle().await;

    let capture = h.transcoders.capture()[0].clone();
    assert_eq!(capture.drain_input(), vec![Bytes::from_static(b"opus-or-pcm")]);

    capture.produce(b"\x01\x00\x02\x00");
    settle().await;
    assert_eq!(model.count("audio"), 1);

    // Once the model is gone, captured audio is dropped, not queued.
    model.server_close("going away");
    settle().await;
    capture.produce(b"\x03\x00");
    settle().await;
    assert_eq!(model.count("audio"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stream_drop_keeps_transcoder_warm() {
    let h = harness();
    let conn = h.join("g1", "lobby").await;

    conn.speak("alice");
    settle().await;
    let first = h.transcoders.capture()[0].clone();

    conn.drop_subscription("alice");
    settle().await;
    assert!(first.liveness.is_alive());
    assert_eq!(h.bridge.sessions()[0].subscriptions, 0);

    conn.quiet("alice");
    conn.speak("alice");
    settle().await;

    // Same transcoder, fresh subscription.
    assert_eq!(h.transcoders.capture().len(), 1);
    assert_eq!(conn.subscribe_count("alice"), 2);
    assert!(conn.send_packet("alice", b"again"));
    settle().await;
    assert_eq!(first.drain_input(), vec![Bytes::from_static(b"again")]);
}

#[tokio::test(start_paused = true)]
async fn test_live_capture_is_not_resubscribed() {
    let h = harness();
    let conn = h.join("g1", "lobby").await;

    conn.speak("alice");
    conn.quiet("alice");
    conn.speak("alice");
    settle().await;

    assert_eq!(conn.subscribe_count("alice"), 1);
    assert_eq!(h.transcoders.capture().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dead_capture_transcoder_is_replaced() {
    let h = harness();
    let conn = h.join("g1", "lobby").await;

    conn.speak("alice");
    settle().await;
    h.transcoders.capture()[0].exit();
    conn.quiet("alice");
    conn.speak("alice");
    settle().await;

    assert_eq!(h.transcoders.capture().len(), 2);
    assert!(h.transcoders.capture()[1].liveness.is_alive());
    assert_eq!(conn.subscribe_count("alice"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_model_audio_is_written_in_order() {
    let h = harness();
    h.join("g1", "lobby").await;
    let model = h.connector.model(0);

    model.emit(ModelEvent::Audio(Bytes::from_static(b"one")));
    model.emit(ModelEvent::Audio(Bytes::from_static(b"two")));
    settle().await;

    assert_eq!(
        h.transcoders.playback()[0].drain_input(),
        vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_interruption_resets_playback_and_discards_queued_audio() {
    let h = harness();
    let conn = h.join("g1", "lobby").await;
    let model = h.connector.model(0);

    model.emit(ModelEvent::Audio(Bytes::from_static(b"stale")));
    model.emit(ModelEvent::Interrupted);
    model.emit(ModelEvent::Audio(Bytes::from_static(b"fresh")));
    settle().await;

    let playback = h.transcoders.playback();
    assert_eq!(playback.len(), 2);
    assert!(!playback[0].liveness.is_alive());
    assert!(playback[1].liveness.is_alive());
    assert_eq!(playback[1].drain_input(), vec![Bytes::from_static(b"fresh")]);
    // The new transcoder is bound as the channel's source.
    assert_eq!(conn.play_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_idle_player_with_live_transcoder_resets() {
    let h = harness();
    let conn = h.join("g1", "lobby").await;

    conn.emit(parley_voice::ConnectionEvent::PlayerIdle);
    settle().await;
    assert_eq!(h.transcoders.playback().len(), 2);
    assert!(h.transcoders.playback()[1].liveness.is_alive());
}

#[tokio::test(start_paused = true)]
async fn test_dead_playback_transcoder_is_replaced_on_write() {
    let h = harness();
    h.join("g1", "lobby").await;
    let model = h.connector.model(0);

    h.transcoders.playback()[0].exit();
    model.emit(ModelEvent::Audio(Bytes::from_static(b"pcm")));
    settle().await;

    let playback = h.transcoders.playback();
    assert_eq!(playback.len(), 2);
    assert_eq!(playback[1].drain_input(), vec![Bytes::from_static(b"pcm")]);
}

#[tokio::test(start_paused = true)]
async fn test_model_text_reaches_sink_and_sink_errors_are_swallowed() {
    let h = harness();
    h.join("g1", "lobby").await;
    let model = h.connector.model(0);

    model.emit(ModelEvent::Text("hello there".to_string()));
    settle().await;
    assert_eq!(h.texts(), vec!["hello there".to_string()]);

    let failing: parley_voice::TextSink = Arc::new(
        |_: &parley_types::GroupId, _: &str| -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err("channel gone".into())
        },
    );
    h.bridge
        .join(parley_types::GroupId::from("g2"), parley_types::ChannelId::from("x"), Some(failing))
        .await
        .unwrap();
    h.connector.model(1).emit(ModelEvent::Text("ignored".to_string()));
    settle().await;
    assert_eq!(h.bridge.sessions().len(), 2);
}

struct Weather;

#[async_trait::async_trait]
impl Tool for Weather {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: "weather".to_string(),
            description: "Current weather for a city".to_string(),
            parameters: Some(json!({ "type": "object", "properties": { "city": { "type": "string" } } })),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let city = args["city"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("city is required".to_string()))?;
        Ok(json!({ "city": city, "sky": "clear" }))
    }
}

#[tokio::test(start_paused = true)]
async fn test_tool_batch_gets_one_response_per_call() {
    let mut tools = ToolRegistry::default();
    tools.register(Arc::new(Weather));
    let h = harness_with(config(), tools);
    h.join("g1", "lobby").await;

    // Declarations were handed to the model at open.
    assert_eq!(h.connector.setups.lock().unwrap()[0].tools[0].name, "weather");

    let model = h.connector.model(0);
    model.emit(ModelEvent::ToolCall(vec![
        FunctionCall {
            id: "1".to_string(),
            name: "teleport".to_string(),
            args: json!({}),
        },
        FunctionCall {
            id: "2".to_string(),
            name: "weather".to_string(),
            args: json!({ "city": "Lisbon" }),
        },
    ]));
    advance(1).await;

    let sent = model.sent();
    let responses = sent
        .iter()
        .find_map(|m| match m {
            ClientMessage::ToolResponse(r) => Some(r.function_responses.clone()),
            _ => None,
        })
        .expect("tool response sent");

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, "1");
    assert_eq!(responses[0].response, json!({ "error": "unknown tool: teleport" }));
    assert_eq!(responses[1].id, "2");
    assert_eq!(responses[1].response["result"]["sky"], "clear");
}
