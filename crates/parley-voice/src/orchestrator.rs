//! The voice bridge: joins, event routing and reconnection.

use crate::capture::{CapturePipeline, DecodeEnd};
use crate::config::BridgeConfig;
use crate::decode::{DecoderFactory, PassthroughDecoderFactory};
use crate::error::VoiceError;
use crate::platform::{ConnectionEvent, JoinedChannel, VoicePlatform};
use crate::playback::PlaybackPipeline;
use crate::registry::SessionRegistry;
use crate::session::{SessionInner, SessionStatus, Subscription, TextSink, VoiceSession};
use parley_model::{ModelConnector, ModelEvent, ModelSession, SessionSetup, ToolRegistry};
use parley_transcode::TranscoderFactory;
use parley_types::{ChannelId, GroupId, SessionState, TranscodeSpec, UserId};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Collaborators the bridge is built from.
pub struct BridgeDeps {
    pub platform: Arc<dyn VoicePlatform>,
    pub connector: Arc<dyn ModelConnector>,
    pub transcoders: Arc<dyn TranscoderFactory>,
    pub decoders: Arc<dyn DecoderFactory>,
    pub tools: Arc<ToolRegistry>,
    /// Session setup template. Tool declarations are filled in from
    /// `tools` and the input format from `capture`.
    pub setup: SessionSetup,
    pub playback: TranscodeSpec,
    pub capture: TranscodeSpec,
}

impl BridgeDeps {
    /// Deps with passthrough decoding, no tools and the default formats.
    pub fn new(
        platform: Arc<dyn VoicePlatform>,
        connector: Arc<dyn ModelConnector>,
        transcoders: Arc<dyn TranscoderFactory>,
        setup: SessionSetup,
    ) -> Self {
        Self {
            platform,
            connector,
            transcoders,
            decoders: Arc::new(PassthroughDecoderFactory),
            tools: Arc::new(ToolRegistry::default()),
            setup,
            playback: TranscodeSpec::playback(),
            capture: TranscodeSpec::capture(),
        }
    }
}

struct BridgeInner {
    config: BridgeConfig,
    platform: Arc<dyn VoicePlatform>,
    connector: Arc<dyn ModelConnector>,
    transcoders: Arc<dyn TranscoderFactory>,
    decoders: Arc<dyn DecoderFactory>,
    tools: Arc<ToolRegistry>,
    setup: SessionSetup,
    playback: TranscodeSpec,
    capture: TranscodeSpec,
    registry: SessionRegistry,
}

/// Runs one voice session per channel group.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct VoiceBridge {
    inner: Arc<BridgeInner>,
}

impl VoiceBridge {
    pub fn new(config: BridgeConfig, deps: BridgeDeps) -> Self {
        let mut setup = deps.setup;
        setup.tools = deps.tools.declarations();
        setup.input_format = deps.capture.output;

        Self {
            inner: Arc::new(BridgeInner {
                config,
                platform: deps.platform,
                connector: deps.connector,
                transcoders: deps.transcoders,
                decoders: deps.decoders,
                tools: deps.tools,
                setup,
                playback: deps.playback,
                capture: deps.capture,
                registry: SessionRegistry::new(),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Joins `channel` for `group`.
    ///
    /// Rejoining the channel a live session is already in returns that
    /// session. A session for the same group in another channel, or one
    /// that gave up reconnecting, is torn down first.
    pub async fn join(
        &self,
        group: GroupId,
        channel: ChannelId,
        text_sink: Option<TextSink>,
    ) -> Result<Arc<VoiceSession>, VoiceError> {
        let bridge = &self.inner;

        if let Some(existing) = bridge.registry.get(&group) {
            if existing.channel() == &channel && existing.state().is_live() {
                debug!(group_id = %group, channel_id = %channel, "already joined");
                return Ok(existing);
            }
            if let Some(detached) = bridge.registry.remove_if_current(&existing) {
                info!(
                    group_id = %group,
                    from = %existing.channel(),
                    to = %channel,
                    "replacing voice session"
                );
                detached.teardown();
            }
        }

        let JoinedChannel { connection, events } = bridge.platform.join(&group, &channel).await?;

        match tokio::time::timeout(bridge.config.ready_timeout(), connection.ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                connection.destroy();
                return Err(e.into());
            }
            Err(_) => {
                connection.destroy();
                error!(group_id = %group, channel_id = %channel, "voice connection not ready in time");
                return Err(VoiceError::JoinTimeout(bridge.config.ready_timeout_ms));
            }
        }

        let session = Arc::new(VoiceSession::new(group.clone(), channel.clone(), connection, text_sink));
        if let Some(displaced) = bridge.registry.insert(Arc::clone(&session)) {
            // A concurrent join for the same group finished first.
            displaced.teardown();
        }

        {
            let mut inner = session.lock();
            inner.playback = Some(PlaybackPipeline::create(
                Arc::clone(&bridge.transcoders),
                Arc::clone(session.connection()),
                bridge.playback,
            ));
            inner.pumps.push(tokio::spawn(pump_connection_events(
                Arc::clone(bridge),
                Arc::downgrade(&session),
                events,
            )));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let model = match bridge.connector.open(&bridge.setup, events_tx).await {
            Ok(model) => model,
            Err(e) => {
                error!(group_id = %group, "failed to open model session: {}", e);
                if let Some(detached) = bridge.registry.remove_if_current(&session) {
                    detached.teardown();
                }
                return Err(e.into());
            }
        };

        if !bridge.registry.is_current(&session) {
            model.close();
            return Err(VoiceError::Cancelled);
        }
        if !bridge.install_model(&session, model, events_rx) {
            return Err(VoiceError::Cancelled);
        }

        info!(
            group_id = %group,
            channel_id = %channel,
            session_id = %session.id(),
            "voice session active"
        );
        Ok(session)
    }

    /// Leaves the group's channel and releases everything the session owns.
    pub fn leave(&self, group: &GroupId) -> Result<(), VoiceError> {
        match self.inner.registry.remove(group) {
            Some(detached) => {
                detached.teardown();
                Ok(())
            }
            None => Err(VoiceError::NotJoined(group.to_string())),
        }
    }

    /// Sends a complete user text turn to the group's model session.
    /// Returns whether it was sent.
    pub fn send_text(&self, group: &GroupId, text: &str) -> Result<bool, VoiceError> {
        let session = self
            .inner
            .registry
            .get(group)
            .ok_or_else(|| VoiceError::NotJoined(group.to_string()))?;
        Ok(session.current_model().is_some_and(|m| m.send_text(text)))
    }

    pub fn session(&self, group: &GroupId) -> Option<Arc<VoiceSession>> {
        self.inner.registry.get(group)
    }

    pub fn status(&self, group: &GroupId) -> Option<SessionStatus> {
        self.inner.registry.get(group).map(|s| s.status())
    }

    pub fn sessions(&self) -> Vec<SessionStatus> {
        self.inner.registry.sessions().iter().map(|s| s.status()).collect()
    }

    /// Leaves every group.
    pub fn shutdown(&self) {
        for session in self.inner.registry.sessions() {
            if let Some(detached) = self.inner.registry.remove_if_current(&session) {
                detached.teardown();
            }
        }
    }
}

impl BridgeInner {
    /// Installs a freshly opened model session and starts its event pump.
    /// A session torn down in the meantime gets nothing: the model is
    /// closed and `false` returned.
    fn install_model(
        self: &Arc<Self>,
        session: &Arc<VoiceSession>,
        model: ModelSession,
        events: mpsc::UnboundedReceiver<ModelEvent>,
    ) -> bool {
        let mut inner = session.lock();
        if inner.state == SessionState::Closed {
            model.close();
            return false;
        }
        let model = Arc::new(model);
        let model_id = model.id();

        inner.model = Some(Arc::clone(&model));
        inner.state = SessionState::Active;
        inner.activity.reset_segment();
        if inner.activity.resume(model.is_open()) {
            debug!(group_id = %session.group(), "resuming activity segment on new model session");
            model.send_activity_start();
        }

        inner.pumps.retain(|task| !task.is_finished());
        inner.pumps.push(tokio::spawn(pump_model_events(
            Arc::clone(self),
            Arc::clone(session),
            model_id,
            events,
        )));

        if inner.attempts > 0 {
            if let Some(timer) = inner.grace_timer.take() {
                timer.abort();
            }
            let grace = self.config.grace();
            let weak = Arc::downgrade(session);
            inner.grace_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let Some(session) = weak.upgrade() else {
                    return;
                };
                let mut inner = session.lock();
                if inner.model_is(model_id) && inner.model_open() {
                    debug!(group_id = %session.group(), "model session stable, resetting reconnect attempts");
                    inner.attempts = 0;
                }
            }));
        }
        true
    }

    fn on_speaking_start(&self, session: &Arc<VoiceSession>, user: UserId) {
        let mut inner = session.lock();
        if !matches!(inner.state, SessionState::Active | SessionState::Reconnecting) {
            return;
        }
        if let Some(timer) = inner.debounce_timer.take() {
            timer.abort();
        }

        // The capture path must exist before the segment opens.
        self.ensure_capture(session, &mut inner, &user);

        let model_open = inner.model_open();
        if inner.activity.speaking_started(user.clone(), model_open) {
            if let Some(model) = inner.model.as_ref() {
                debug!(group_id = %session.group(), user_id = %user, "activity start");
                model.send_activity_start();
            }
        }
    }

    fn on_speaking_end(&self, session: &Arc<VoiceSession>, user: UserId) {
        let mut inner = session.lock();
        let Some(token) = inner.activity.speaking_stopped(&user) else {
            return;
        };
        if let Some(timer) = inner.debounce_timer.take() {
            timer.abort();
        }

        let debounce = self.config.debounce();
        let weak = Arc::downgrade(session);
        inner.debounce_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(session) = weak.upgrade() else {
                return;
            };
            let mut inner = session.lock();
            if inner.activity.debounce_elapsed(token) {
                if let Some(model) = inner.model.as_ref() {
                    debug!(group_id = %session.group(), "activity end");
                    model.send_activity_end();
                }
            }
        }));
    }

    /// Makes sure `user` has a live capture transcoder and an active raw
    /// subscription feeding it. A warm transcoder is reused.
    fn ensure_capture(&self, session: &Arc<VoiceSession>, inner: &mut SessionInner, user: &UserId) {
        let alive = inner.captures.get(user).is_some_and(|c| c.is_alive());
        if alive && inner.subscriptions.contains_key(user) {
            return;
        }

        if let Some(stale) = inner.subscriptions.remove(user) {
            stale.stage.abort();
        }
        if !alive {
            if let Some(dead) = inner.captures.remove(user) {
                dead.kill();
            }
            let weak = Arc::downgrade(session);
            let capture = CapturePipeline::start(
                self.transcoders.as_ref(),
                &self.capture,
                user.clone(),
                move |pcm| {
                    if let Some(session) = weak.upgrade() {
                        session.forward_capture(pcm);
                    }
                },
            );
            debug!(group_id = %session.group(), user_id = %user, "capture pipeline started");
            inner.captures.insert(user.clone(), capture);
        }

        let stream = match session.connection().subscribe_user(user) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(group_id = %session.group(), user_id = %user, "audio subscription failed: {}", e);
                return;
            }
        };
        inner.next_subscription += 1;
        let token = inner.next_subscription;
        let Some(capture) = inner.captures.get(user) else {
            return;
        };

        let weak = Arc::downgrade(session);
        let end_user = user.clone();
        let stage = capture.attach(stream, self.decoders.create(), move |end| {
            match &end {
                DecodeEnd::Closed => debug!(user_id = %end_user, "audio subscription closed"),
                DecodeEnd::Failed(e) => warn!(user_id = %end_user, "audio subscription failed: {}", e),
            }
            if let Some(session) = weak.upgrade() {
                session.remove_subscription(&end_user, token);
            }
        });
        inner.subscriptions.insert(user.clone(), Subscription { token, stage });
    }

    fn on_player_idle(&self, session: &Arc<VoiceSession>) {
        let mut inner = session.lock();
        if let Some(playback) = inner.playback.as_mut() {
            if playback.is_alive() {
                debug!(group_id = %session.group(), "player idle with live transcoder, resetting playback");
                playback.reset();
            }
        }
    }

    fn on_model_closed(self: &Arc<Self>, session: &Arc<VoiceSession>, model_id: Uuid, reason: String) {
        if !self.registry.is_current(session) {
            debug!(group_id = %session.group(), "ignoring close of a session that was left");
            return;
        }
        let mut inner = session.lock();
        if !inner.model_is(model_id) || inner.state != SessionState::Active {
            return;
        }

        warn!(
            group_id = %session.group(),
            model_session_id = %model_id,
            reason = %reason,
            "model session closed, reconnecting"
        );
        inner.model = None;
        inner.state = SessionState::Reconnecting;
        inner.activity.reset_segment();
        for timer in [inner.debounce_timer.take(), inner.grace_timer.take()].into_iter().flatten() {
            timer.abort();
        }
        inner.reconnect_task = Some(tokio::spawn(reconnect(Arc::clone(self), Arc::clone(session))));
    }

    fn reconnect_gone(&self, session: &Arc<VoiceSession>) -> bool {
        if self.registry.is_current(session) {
            return false;
        }
        debug!(group_id = %session.group(), "session left during reconnect, giving up");
        true
    }
}

/// Reopens the model session with linear backoff until it sticks, the
/// session is left, or the attempt budget runs out.
async fn reconnect(bridge: Arc<BridgeInner>, session: Arc<VoiceSession>) {
    let mut closed = session.closed_signal();
    loop {
        let attempt = {
            let mut inner = session.lock();
            inner.attempts += 1;
            inner.attempts
        };

        if attempt >= bridge.config.reconnect_max_attempts {
            if bridge.reconnect_gone(&session) {
                return;
            }
            {
                let mut inner = session.lock();
                if inner.state != SessionState::Reconnecting {
                    return;
                }
                inner.state = SessionState::Failed;
            }
            error!(group_id = %session.group(), attempt, "model reconnect attempts exhausted");
            session.deliver_text(&bridge.config.failure_notice);
            return;
        }

        let delay = bridge.config.backoff(attempt);
        info!(
            group_id = %session.group(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = closed.wait_for(|closed| *closed) => {
                debug!(group_id = %session.group(), attempt, "reconnect backoff cancelled");
                return;
            }
        }
        if bridge.reconnect_gone(&session) {
            return;
        }
        // Leave cannot abort an in-flight open. A session left meanwhile is
        // caught by the check after it, and the closed signal ends any
        // later backoff.
        session.lock().reconnect_task.take();

        session.reset_playback();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        match bridge.connector.open(&bridge.setup, events_tx).await {
            Ok(model) => {
                if bridge.reconnect_gone(&session) {
                    model.close();
                    return;
                }
                if bridge.install_model(&session, model, events_rx) {
                    info!(group_id = %session.group(), attempt, "model session reopened");
                }
                return;
            }
            Err(e) => {
                warn!(group_id = %session.group(), attempt, "reconnect failed: {}", e);
            }
        }
    }
}

async fn pump_model_events(
    bridge: Arc<BridgeInner>,
    session: Arc<VoiceSession>,
    model_id: Uuid,
    mut events: mpsc::UnboundedReceiver<ModelEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ModelEvent::Audio(pcm) => session.play_model_audio(pcm),
            ModelEvent::Text(text) => session.deliver_text(&text),
            ModelEvent::InputTranscript(text) => {
                debug!(group_id = %session.group(), transcript = %text, "heard")
            }
            ModelEvent::Interrupted => {
                debug!(group_id = %session.group(), "model interrupted, resetting playback");
                session.reset_playback();
            }
            ModelEvent::TurnComplete => debug!(group_id = %session.group(), "turn complete"),
            ModelEvent::ToolCall(calls) => {
                let tools = Arc::clone(&bridge.tools);
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    let responses = tools.dispatch(calls).await;
                    let model = session.current_model().filter(|m| m.id() == model_id);
                    match model {
                        Some(model) => {
                            model.send_tool_responses(responses);
                        }
                        None => debug!(
                            group_id = %session.group(),
                            "model session replaced, dropping tool responses"
                        ),
                    }
                });
            }
            ModelEvent::ToolCallCancellation(ids) => {
                info!(group_id = %session.group(), ?ids, "model cancelled tool calls")
            }
            ModelEvent::GoAway { time_left } => {
                info!(group_id = %session.group(), ?time_left, "model service going away")
            }
            ModelEvent::Error(e) => warn!(group_id = %session.group(), "model session error: {}", e),
            ModelEvent::Closed { reason } => {
                bridge.on_model_closed(&session, model_id, reason);
                break;
            }
        }
    }
}

async fn pump_connection_events(
    bridge: Arc<BridgeInner>,
    session: Weak<VoiceSession>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        match event {
            ConnectionEvent::SpeakingStart(user) => bridge.on_speaking_start(&session, user),
            ConnectionEvent::SpeakingEnd(user) => bridge.on_speaking_end(&session, user),
            ConnectionEvent::PlayerIdle => bridge.on_player_idle(&session),
            ended @ (ConnectionEvent::Disconnected | ConnectionEvent::Destroyed) => {
                info!(group_id = %session.group(), event = ?ended, "voice connection ended");
                if let Some(detached) = bridge.registry.remove_if_current(&session) {
                    detached.teardown();
                }
                return;
            }
        }
    }
}
