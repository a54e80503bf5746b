//! Fakes for the platform, model connector and transcoders.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parley_model::protocol::ClientMessage;
use parley_model::{
    ModelConnector, ModelError, ModelEvent, ModelSession, SessionCommand, SessionLink,
    SessionSetup, ToolRegistry,
};
use parley_transcode::{PipelineEnds, TranscoderFactory, TranscoderPipeline};
use parley_types::{ChannelId, GroupId, PcmFormat, TranscodeDirection, TranscodeSpec, UserId};
use parley_voice::{
    AudioSource, BridgeConfig, BridgeDeps, ConnectionEvent, JoinedChannel, PlatformError,
    RawAudioStream, TextSink, VoiceBridge, VoiceConnection, VoicePlatform,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

pub struct FakeConnection {
    pub channel: ChannelId,
    pub hang_on_ready: bool,
    pub events: mpsc::UnboundedSender<ConnectionEvent>,
    pub subscriptions: Mutex<HashMap<UserId, mpsc::UnboundedSender<Result<Bytes, PlatformError>>>>,
    pub subscribe_calls: Mutex<Vec<UserId>>,
    pub sources: Mutex<Vec<AudioSource>>,
    pub stopped: Mutex<u32>,
    pub destroyed: Mutex<u32>,
}

impl FakeConnection {
    pub fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    pub fn speak(&self, user: &str) {
        self.emit(ConnectionEvent::SpeakingStart(UserId::from(user)));
    }

    pub fn quiet(&self, user: &str) {
        self.emit(ConnectionEvent::SpeakingEnd(UserId::from(user)));
    }

    pub fn subscribe_count(&self, user: &str) -> usize {
        let user = UserId::from(user);
        self.subscribe_calls.lock().unwrap().iter().filter(|u| **u == user).count()
    }

    /// Sends a raw packet on the user's live subscription.
    pub fn send_packet(&self, user: &str, packet: &'static [u8]) -> bool {
        let subs = self.subscriptions.lock().unwrap();
        subs.get(&UserId::from(user))
            .map(|tx| tx.send(Ok(Bytes::from_static(packet))).is_ok())
            .unwrap_or(false)
    }

    /// Ends the user's subscription the way a platform stream drop would.
    pub fn drop_subscription(&self, user: &str) {
        self.subscriptions.lock().unwrap().remove(&UserId::from(user));
    }

    pub fn is_destroyed(&self) -> bool {
        *self.destroyed.lock().unwrap() > 0
    }

    pub fn play_count(&self) -> usize {
        self.sources.lock().unwrap().len()
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn ready(&self) -> Result<(), PlatformError> {
        if self.hang_on_ready {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn subscribe_user(&self, user: &UserId) -> Result<RawAudioStream, PlatformError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe_calls.lock().unwrap().push(user.clone());
        self.subscriptions.lock().unwrap().insert(user.clone(), tx);
        Ok(rx)
    }

    fn play(&self, source: AudioSource) {
        self.sources.lock().unwrap().push(source);
    }

    fn stop_player(&self) {
        *self.stopped.lock().unwrap() += 1;
    }

    fn destroy(&self) {
        *self.destroyed.lock().unwrap() += 1;
    }
}

#[derive(Default)]
pub struct FakePlatform {
    pub connections: Mutex<Vec<Arc<FakeConnection>>>,
    pub hang_on_ready: Mutex<bool>,
}

impl FakePlatform {
    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        Arc::clone(&self.connections.lock().unwrap()[index])
    }

    pub fn last(&self) -> Arc<FakeConnection> {
        Arc::clone(self.connections.lock().unwrap().last().expect("a connection"))
    }
}

#[async_trait]
impl VoicePlatform for FakePlatform {
    async fn join(&self, _group: &GroupId, channel: &ChannelId) -> Result<JoinedChannel, PlatformError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(FakeConnection {
            channel: channel.clone(),
            hang_on_ready: *self.hang_on_ready.lock().unwrap(),
            events: tx,
            subscriptions: Mutex::new(HashMap::new()),
            subscribe_calls: Mutex::new(Vec::new()),
            sources: Mutex::new(Vec::new()),
            stopped: Mutex::new(0),
            destroyed: Mutex::new(0),
        });
        self.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok(JoinedChannel {
            connection,
            events: rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

pub enum OpenScript {
    Succeed,
    Fail,
    /// Wait for the gate, then succeed.
    Gated(Arc<Notify>),
}

/// One session handed out by the fake connector.
pub struct FakeModel {
    pub events: mpsc::UnboundedSender<ModelEvent>,
    pub link: Mutex<SessionLink>,
    pub sent: Mutex<Vec<ClientMessage>>,
    pub closed_by_client: Mutex<bool>,
}

impl FakeModel {
    /// Drains queued commands into `sent`.
    fn drain(&self) {
        let mut link = self.link.lock().unwrap();
        let mut sent = self.sent.lock().unwrap();
        while let Ok(command) = link.commands.try_recv() {
            match command {
                SessionCommand::Send(message) => sent.push(message),
                SessionCommand::Close => {
                    link.open.set_closed();
                    *self.closed_by_client.lock().unwrap() = true;
                }
            }
        }
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.drain();
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent().iter().map(kind).collect()
    }

    pub fn count(&self, which: &str) -> usize {
        self.kinds().iter().filter(|k| **k == which).count()
    }

    pub fn was_closed_by_client(&self) -> bool {
        self.drain();
        *self.closed_by_client.lock().unwrap()
    }

    pub fn emit(&self, event: ModelEvent) {
        let _ = self.events.send(event);
    }

    /// The service drops the session.
    pub fn server_close(&self, reason: &str) {
        self.link.lock().unwrap().open.set_closed();
        self.emit(ModelEvent::Closed {
            reason: reason.to_string(),
        });
    }
}

pub fn kind(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::Setup(_) => "setup",
        ClientMessage::RealtimeInput(input) if input.activity_start.is_some() => "start",
        ClientMessage::RealtimeInput(input) if input.activity_end.is_some() => "end",
        ClientMessage::RealtimeInput(input) if input.audio.is_some() => "audio",
        ClientMessage::RealtimeInput(_) => "input",
        ClientMessage::ClientContent(_) => "text",
        ClientMessage::ToolResponse(_) => "tool",
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub script: Mutex<VecDeque<OpenScript>>,
    pub models: Mutex<Vec<Arc<FakeModel>>>,
    pub open_times: Mutex<Vec<Instant>>,
    pub setups: Mutex<Vec<SessionSetup>>,
}

impl FakeConnector {
    pub fn push(&self, step: OpenScript) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn model(&self, index: usize) -> Arc<FakeModel> {
        Arc::clone(&self.models.lock().unwrap()[index])
    }

    pub fn model_count(&self) -> usize {
        self.models.lock().unwrap().len()
    }

    pub fn open_count(&self) -> usize {
        self.open_times.lock().unwrap().len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.open_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelConnector for FakeConnector {
    async fn open(
        &self,
        setup: &SessionSetup,
        events: mpsc::UnboundedSender<ModelEvent>,
    ) -> Result<ModelSession, ModelError> {
        self.open_times.lock().unwrap().push(Instant::now());
        self.setups.lock().unwrap().push(setup.clone());
        let step = self.script.lock().unwrap().pop_front().unwrap_or(OpenScript::Succeed);
        match step {
            OpenScript::Succeed => {}
            OpenScript::Fail => return Err(ModelError::Connect("refused".to_string())),
            OpenScript::Gated(gate) => gate.notified().await,
        }

        let (session, link) = ModelSession::link(setup.input_format);
        link.open.set_open();
        self.models.lock().unwrap().push(Arc::new(FakeModel {
            events,
            link: Mutex::new(link),
            sent: Mutex::new(Vec::new()),
            closed_by_client: Mutex::new(false),
        }));
        Ok(session)
    }
}

// ---------------------------------------------------------------------------
// Transcoders
// ---------------------------------------------------------------------------

pub struct Created {
    pub spec: TranscodeSpec,
    pub liveness: parley_transcode::Liveness,
    pub ends: Mutex<Option<PipelineEnds>>,
}

impl Created {
    /// Everything written into this transcoder so far.
    pub fn drain_input(&self) -> Vec<Bytes> {
        let mut guard = self.ends.lock().unwrap();
        let mut out = Vec::new();
        if let Some(ends) = guard.as_mut() {
            while let Ok(chunk) = ends.input.try_recv() {
                out.push(chunk);
            }
        }
        out
    }

    /// Makes the backend produce `chunk`.
    pub fn produce(&self, chunk: &'static [u8]) {
        let guard = self.ends.lock().unwrap();
        if let Some(ends) = guard.as_ref() {
            let _ = ends.output.try_send(Ok(Bytes::from_static(chunk)));
        }
    }

    /// Simulates the process exiting.
    pub fn exit(&self) {
        self.liveness.mark_dead();
        self.ends.lock().unwrap().take();
    }
}

/// Loopback transcoders whose backend ends the test drives directly.
#[derive(Default)]
pub struct FakeTranscoders {
    pub created: Mutex<Vec<Arc<Created>>>,
}

impl FakeTranscoders {
    pub fn of(&self, direction: TranscodeDirection) -> Vec<Arc<Created>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.spec.direction == direction)
            .cloned()
            .collect()
    }

    pub fn playback(&self) -> Vec<Arc<Created>> {
        self.of(TranscodeDirection::Playback)
    }

    pub fn capture(&self) -> Vec<Arc<Created>> {
        self.of(TranscodeDirection::Capture)
    }
}

impl TranscoderFactory for FakeTranscoders {
    fn create(&self, spec: &TranscodeSpec) -> TranscoderPipeline {
        let (pipeline, ends) = TranscoderPipeline::channel(*spec);
        self.created.lock().unwrap().push(Arc::new(Created {
            spec: *spec,
            liveness: ends.liveness.clone(),
            ends: Mutex::new(Some(ends)),
        }));
        pipeline
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub bridge: VoiceBridge,
    pub platform: Arc<FakePlatform>,
    pub connector: Arc<FakeConnector>,
    pub transcoders: Arc<FakeTranscoders>,
    pub texts: Arc<Mutex<Vec<String>>>,
}

pub fn config() -> BridgeConfig {
    BridgeConfig {
        ready_timeout_ms: 1_000,
        debounce_ms: 300,
        reconnect_max_attempts: 3,
        reconnect_base_delay_ms: 2_000,
        reconnect_grace_ms: 30_000,
        failure_notice: "voice model unavailable".to_string(),
    }
}

pub fn harness() -> Harness {
    harness_with(config(), ToolRegistry::default())
}

pub fn harness_with(config: BridgeConfig, tools: ToolRegistry) -> Harness {
    let platform = Arc::new(FakePlatform::default());
    let connector = Arc::new(FakeConnector::default());
    let transcoders = Arc::new(FakeTranscoders::default());

    let setup = SessionSetup {
        model: "models/test".to_string(),
        system_instruction: "test".to_string(),
        voice: None,
        tools: Vec::new(),
        input_format: PcmFormat::new(16_000, 1),
    };
    let mut deps = BridgeDeps::new(platform.clone(), connector.clone(), transcoders.clone(), setup);
    deps.tools = Arc::new(tools);

    Harness {
        bridge: VoiceBridge::new(config, deps),
        platform,
        connector,
        transcoders,
        texts: Arc::new(Mutex::new(Vec::new())),
    }
}

impl Harness {
    pub fn sink(&self) -> TextSink {
        let texts = Arc::clone(&self.texts);
        Arc::new(
            move |_group: &GroupId, text: &str| -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
                texts.lock().unwrap().push(text.to_string());
                Ok(())
            },
        )
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub async fn join(&self, group: &str, channel: &str) -> Arc<FakeConnection> {
        self.bridge
            .join(GroupId::from(group), ChannelId::from(channel), Some(self.sink()))
            .await
            .expect("join succeeds");
        settle().await;
        self.platform.last()
    }
}

/// Lets spawned tasks run without letting any timer of 1 ms or more fire.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Advances the paused clock by `ms` and lets tasks react.
pub async fn advance(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}
