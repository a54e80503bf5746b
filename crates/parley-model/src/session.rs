//! The connector-agnostic model session handle.

use crate::error::ModelError;
use crate::protocol::{
    Blob, ClientContent, ClientMessage, Content, Empty, FunctionCall, FunctionDeclaration,
    FunctionResponse, RealtimeInput, ToolResponse,
};
use async_trait::async_trait;
use bytes::Bytes;
use parley_types::PcmFormat;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Inbound event from a model session.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// Raw PCM to play.
    Audio(Bytes),
    /// Model text or a transcript of its speech.
    Text(String),
    /// Transcript of what the model heard.
    InputTranscript(String),
    /// Barge-in. Queued playback must be discarded.
    Interrupted,
    TurnComplete,
    /// A batch of tool calls, all of which need a response.
    ToolCall(Vec<FunctionCall>),
    /// Call ids the model no longer wants answered.
    ToolCallCancellation(Vec<String>),
    /// The service will close the connection soon.
    GoAway { time_left: Option<String> },
    /// The session is no longer open. Sent exactly once.
    Closed { reason: String },
    Error(String),
}

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub model: String,
    pub system_instruction: String,
    pub voice: Option<String>,
    pub tools: Vec<FunctionDeclaration>,
    /// Format of audio sent with [`ModelSession::send_audio`].
    pub input_format: PcmFormat,
}

/// Commands queued for the connection task.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Send(ClientMessage),
    Close,
}

/// Shared open flag, flipped by the connection task on close or error.
#[derive(Debug, Clone, Default)]
pub struct OpenFlag(Arc<AtomicBool>);

impl OpenFlag {
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_open(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` only for the call that closed the flag.
    pub fn set_closed(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Connection-side half of a [`ModelSession`].
#[derive(Debug)]
pub struct SessionLink {
    pub commands: mpsc::UnboundedReceiver<SessionCommand>,
    pub open: OpenFlag,
}

/// One bidirectional session with the remote model.
///
/// Sends are queued to the connection task and are silently skipped when
/// the session is not open.
#[derive(Debug)]
pub struct ModelSession {
    id: Uuid,
    commands: mpsc::UnboundedSender<SessionCommand>,
    open: OpenFlag,
    input_format: PcmFormat,
}

impl ModelSession {
    /// Creates a session handle plus the link a connection task drives.
    /// The session starts closed.
    pub fn link(input_format: PcmFormat) -> (Self, SessionLink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = OpenFlag::default();
        let session = Self {
            id: Uuid::new_v4(),
            commands: tx,
            open: open.clone(),
            input_format,
        };
        (
            session,
            SessionLink {
                commands: rx,
                open,
            },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.is_open()
    }

    fn send(&self, message: ClientMessage) -> bool {
        if !self.is_open() {
            return false;
        }
        self.commands.send(SessionCommand::Send(message)).is_ok()
    }

    pub fn send_audio(&self, pcm: &[u8]) -> bool {
        self.send(ClientMessage::RealtimeInput(RealtimeInput {
            audio: Some(Blob::encode(self.input_format.mime_type(), pcm)),
            ..Default::default()
        }))
    }

    /// Sends a complete user turn.
    pub fn send_text(&self, text: &str) -> bool {
        self.send(ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::text(Some("user"), text)],
            turn_complete: true,
        }))
    }

    pub fn send_activity_start(&self) -> bool {
        self.send(ClientMessage::RealtimeInput(RealtimeInput {
            activity_start: Some(Empty {}),
            ..Default::default()
        }))
    }

    pub fn send_activity_end(&self) -> bool {
        self.send(ClientMessage::RealtimeInput(RealtimeInput {
            activity_end: Some(Empty {}),
            ..Default::default()
        }))
    }

    pub fn send_tool_responses(&self, responses: Vec<FunctionResponse>) -> bool {
        if responses.is_empty() {
            return false;
        }
        self.send(ClientMessage::ToolResponse(ToolResponse {
            function_responses: responses,
        }))
    }

    /// Asks the connection task to close. Safe to call more than once.
    pub fn close(&self) {
        let _ = self.commands.send(SessionCommand::Close);
    }
}

/// Opens model sessions.
#[async_trait]
pub trait ModelConnector: Send + Sync {
    /// Opens a session and returns once it is ready for input. Inbound
    /// events, including the final [`ModelEvent::Closed`], go to `events`.
    async fn open(
        &self,
        setup: &SessionSetup,
        events: mpsc::UnboundedSender<ModelEvent>,
    ) -> Result<ModelSession, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_are_skipped_until_open() {
        let (session, mut link) = ModelSession::link(PcmFormat::new(16_000, 1));
        assert!(!session.send_activity_start());
        assert!(!session.send_audio(&[0, 0]));
        assert!(link.commands.try_recv().is_err());

        link.open.set_open();
        assert!(session.send_activity_start());
        assert!(session.send_audio(&[0, 0]));

        match link.commands.try_recv().unwrap() {
            SessionCommand::Send(ClientMessage::RealtimeInput(input)) => {
                assert!(input.activity_start.is_some())
            }
            other => panic!("unexpected command {:?}", other),
        }
        match link.commands.try_recv().unwrap() {
            SessionCommand::Send(ClientMessage::RealtimeInput(input)) => {
                assert_eq!(input.audio.unwrap().mime_type, "audio/pcm;rate=16000")
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn closing_the_flag_stops_sends() {
        let (session, link) = ModelSession::link(PcmFormat::new(16_000, 1));
        link.open.set_open();
        assert!(link.open.set_closed());
        assert!(!link.open.set_closed());
        assert!(!session.send_text("hello"));
    }

    #[test]
    fn close_is_queued_even_when_closed() {
        let (session, mut link) = ModelSession::link(PcmFormat::new(16_000, 1));
        session.close();
        session.close();
        assert_eq!(link.commands.try_recv().unwrap(), SessionCommand::Close);
        assert_eq!(link.commands.try_recv().unwrap(), SessionCommand::Close);
    }

    #[test]
    fn empty_tool_response_batches_are_not_sent() {
        let (session, mut link) = ModelSession::link(PcmFormat::new(16_000, 1));
        link.open.set_open();
        assert!(!session.send_tool_responses(Vec::new()));
        assert!(link.commands.try_recv().is_err());
    }
}
