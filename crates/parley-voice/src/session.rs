//! Per-group voice session state.

use crate::activity::ActivityTracker;
use crate::capture::CapturePipeline;
use crate::platform::VoiceConnection;
use crate::playback::PlaybackPipeline;
use bytes::Bytes;
use parley_model::ModelSession;
use parley_types::{ChannelId, GroupId, SessionState, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Best-effort delivery of model text to a hosting surface.
pub type TextSink =
    Arc<dyn Fn(&GroupId, &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub group_id: GroupId,
    pub channel_id: ChannelId,
    pub state: SessionState,
    pub model_open: bool,
    pub speaking: Vec<UserId>,
    pub segment_open: bool,
    pub captures: usize,
    pub subscriptions: usize,
    pub reconnect_attempts: u32,
}

/// A live raw-audio subscription and its decode stage.
pub(crate) struct Subscription {
    pub token: u64,
    pub stage: JoinHandle<()>,
}

pub(crate) struct SessionInner {
    pub state: SessionState,
    pub model: Option<Arc<ModelSession>>,
    pub playback: Option<PlaybackPipeline>,
    pub captures: HashMap<UserId, CapturePipeline>,
    pub subscriptions: HashMap<UserId, Subscription>,
    pub activity: ActivityTracker,
    pub attempts: u32,
    pub next_subscription: u64,
    pub debounce_timer: Option<JoinHandle<()>>,
    pub reconnect_task: Option<JoinHandle<()>>,
    pub grace_timer: Option<JoinHandle<()>>,
    pub pumps: Vec<JoinHandle<()>>,
}

impl SessionInner {
    pub fn model_is(&self, model_id: Uuid) -> bool {
        self.model.as_ref().is_some_and(|m| m.id() == model_id)
    }

    pub fn model_open(&self) -> bool {
        self.model.as_ref().is_some_and(|m| m.is_open())
    }
}

/// One joined channel group.
///
/// Holds the voice connection for its whole life. The model session and
/// playback pipeline are replaced on reconnect; capture pipelines persist.
/// All mutable state sits behind one lock that is never held across an
/// await.
pub struct VoiceSession {
    id: Uuid,
    group: GroupId,
    channel: ChannelId,
    connection: Arc<dyn VoiceConnection>,
    text_sink: Option<TextSink>,
    closed: watch::Sender<bool>,
    inner: Mutex<SessionInner>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("channel", &self.channel)
            .field("state", &self.state())
            .finish()
    }
}

impl VoiceSession {
    pub(crate) fn new(
        group: GroupId,
        channel: ChannelId,
        connection: Arc<dyn VoiceConnection>,
        text_sink: Option<TextSink>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            group,
            channel,
            connection,
            text_sink,
            closed: watch::Sender::new(false),
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                model: None,
                playback: None,
                captures: HashMap::new(),
                subscriptions: HashMap::new(),
                activity: ActivityTracker::new(),
                attempts: 0,
                next_subscription: 0,
                debounce_timer: None,
                reconnect_task: None,
                grace_timer: None,
                pumps: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn group(&self) -> &GroupId {
        &self.group
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub(crate) fn connection(&self) -> &Arc<dyn VoiceConnection> {
        &self.connection
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Flips to `true` once teardown starts.
    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.lock();
        let mut speaking: Vec<UserId> = inner.activity.speaking().cloned().collect();
        speaking.sort();
        SessionStatus {
            session_id: self.id,
            group_id: self.group.clone(),
            channel_id: self.channel.clone(),
            state: inner.state,
            model_open: inner.model_open(),
            speaking,
            segment_open: inner.activity.is_segment_open(),
            captures: inner.captures.len(),
            subscriptions: inner.subscriptions.len(),
            reconnect_attempts: inner.attempts,
        }
    }

    /// The installed model session, open or not.
    pub fn current_model(&self) -> Option<Arc<ModelSession>> {
        self.lock().model.clone()
    }

    /// Sends captured PCM to the model if it is open; drops it otherwise.
    pub(crate) fn forward_capture(&self, pcm: Bytes) {
        if let Some(model) = self.current_model() {
            if !model.send_audio(&pcm) {
                tracing::trace!(group_id = %self.group, "dropping captured audio, model not open");
            }
        }
    }

    /// Writes model audio to playback, replacing a dead transcoder first.
    pub(crate) fn play_model_audio(&self, pcm: Bytes) {
        let mut inner = self.lock();
        let Some(playback) = inner.playback.as_mut() else {
            return;
        };
        if !playback.is_alive() {
            tracing::warn!(group_id = %self.group, "playback transcoder died, resetting");
            playback.reset();
        }
        playback.write(pcm);
    }

    pub(crate) fn reset_playback(&self) {
        if let Some(playback) = self.lock().playback.as_mut() {
            playback.reset();
        }
    }

    /// Delivers text to the sink. Sink failures are logged and dropped.
    pub(crate) fn deliver_text(&self, text: &str) {
        let Some(sink) = self.text_sink.as_ref() else {
            return;
        };
        if let Err(e) = sink(&self.group, text) {
            tracing::warn!(group_id = %self.group, "text sink failed: {}", e);
        }
    }

    /// Drops a finished subscription unless a newer one replaced it.
    pub(crate) fn remove_subscription(&self, user: &UserId, token: u64) {
        let mut inner = self.lock();
        if inner.subscriptions.get(user).is_some_and(|s| s.token == token) {
            inner.subscriptions.remove(user);
        }
    }

    /// Releases every resource in order: model, playback, captures,
    /// subscriptions, timers, player, connection. Only reachable through
    /// [`crate::registry::DetachedSession`], so the session is already out of
    /// the registry when the model's close event arrives.
    pub(crate) fn teardown(&self) {
        self.closed.send_replace(true);
        let (model, playback, captures, subscriptions, timers) = {
            let mut inner = self.lock();
            inner.state = SessionState::Closed;
            inner.activity.reset_segment();
            let timers: Vec<JoinHandle<()>> = inner
                .debounce_timer
                .take()
                .into_iter()
                .chain(inner.reconnect_task.take())
                .chain(inner.grace_timer.take())
                .chain(inner.pumps.drain(..))
                .collect();
            (
                inner.model.take(),
                inner.playback.take(),
                std::mem::take(&mut inner.captures),
                std::mem::take(&mut inner.subscriptions),
                timers,
            )
        };

        if let Some(model) = model {
            model.close();
        }
        if let Some(playback) = playback {
            playback.kill();
        }
        for capture in captures.values() {
            capture.kill();
        }
        for subscription in subscriptions.values() {
            subscription.stage.abort();
        }
        for timer in timers {
            timer.abort();
        }
        self.connection.stop_player();
        self.connection.destroy();

        tracing::info!(
            group_id = %self.group,
            channel_id = %self.channel,
            session_id = %self.id,
            "voice session closed"
        );
    }
}
