//! Gemini Live connector over a WebSocket.

use crate::config::ModelConfig;
use crate::error::ModelError;
use crate::protocol::{
    AutomaticActivityDetection, ClientMessage, Content, Empty, GenerationConfig,
    PrebuiltVoiceConfig, RealtimeInputConfig, ServerMessage, Setup, SpeechConfig, ToolSet,
    VoiceConfig,
};
use crate::session::{
    ModelConnector, ModelEvent, ModelSession, SessionCommand, SessionLink, SessionSetup,
};
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Builds the first frame of a session.
///
/// The service's own voice-activity detection is always disabled: turn
/// boundaries come from explicit activity-start/activity-end signals.
pub fn setup_message(setup: &SessionSetup) -> ClientMessage {
    let speech_config = setup.voice.as_ref().map(|voice| SpeechConfig {
        voice_config: VoiceConfig {
            prebuilt_voice_config: PrebuiltVoiceConfig {
                voice_name: voice.clone(),
            },
        },
    });

    let tools = if setup.tools.is_empty() {
        Vec::new()
    } else {
        vec![ToolSet {
            function_declarations: setup.tools.clone(),
        }]
    };

    let system_instruction = if setup.system_instruction.trim().is_empty() {
        None
    } else {
        Some(Content::text(None, setup.system_instruction.clone()))
    };

    ClientMessage::Setup(Setup {
        model: setup.model.clone(),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config,
        },
        system_instruction,
        tools,
        realtime_input_config: RealtimeInputConfig {
            automatic_activity_detection: AutomaticActivityDetection { disabled: true },
        },
        input_audio_transcription: Some(Empty {}),
        output_audio_transcription: Some(Empty {}),
    })
}

/// Opens sessions against the Gemini Live bidirectional endpoint.
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    config: ModelConfig,
}

impl GeminiLiveConnector {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

fn redact(message: String, key: &str) -> String {
    message.replace(key, "[REDACTED]")
}

fn parse_frame(message: &Message) -> Option<Result<ServerMessage, serde_json::Error>> {
    match message {
        Message::Text(text) => Some(serde_json::from_str(text.as_str())),
        Message::Binary(data) => Some(serde_json::from_slice(data)),
        _ => None,
    }
}

fn close_reason(message: &Message) -> Option<String> {
    match message {
        Message::Close(Some(frame)) => Some(format!("{} {}", u16::from(frame.code), frame.reason.as_str())),
        Message::Close(None) => Some("closed by server".to_string()),
        _ => None,
    }
}

async fn wait_for_setup_complete<S, E>(stream: &mut S) -> Result<(), ModelError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| ModelError::Connect(e.to_string()))?;
        if let Some(reason) = close_reason(&frame) {
            return Err(ModelError::SetupRejected(reason));
        }
        match parse_frame(&frame) {
            Some(Ok(message)) if message.is_setup_complete() => return Ok(()),
            Some(Ok(_)) => debug!("ignoring frame received before setup completed"),
            Some(Err(e)) => return Err(ModelError::Protocol(e)),
            None => {}
        }
    }
    Err(ModelError::SetupRejected(
        "connection ended before setup completed".to_string(),
    ))
}

#[async_trait]
impl ModelConnector for GeminiLiveConnector {
    async fn open(
        &self,
        setup: &SessionSetup,
        events: mpsc::UnboundedSender<ModelEvent>,
    ) -> Result<ModelSession, ModelError> {
        let key = self.config.api_key().ok_or(ModelError::MissingApiKey)?;
        let url = format!("{}?key={}", self.config.endpoint, key);
        let setup_frame = serde_json::to_string(&setup_message(setup))?;

        let handshake = async {
            let (mut ws, _) = connect_async(url.as_str())
                .await
                .map_err(|e| ModelError::Connect(redact(e.to_string(), key)))?;
            ws.send(Message::Text(setup_frame.into()))
                .await
                .map_err(|e| ModelError::Connect(redact(e.to_string(), key)))?;
            wait_for_setup_complete(&mut ws).await?;
            Ok::<_, ModelError>(ws)
        };

        let ws = tokio::time::timeout(self.config.setup_timeout(), handshake)
            .await
            .map_err(|_| ModelError::SetupTimeout(self.config.setup_timeout_ms))??;

        let (session, link) = ModelSession::link(setup.input_format);
        link.open.set_open();
        info!(model_session_id = %session.id(), model = %setup.model, "model session open");

        let (sink, stream) = ws.split();
        tokio::spawn(run_connection(session.id(), sink, stream, link, events));

        Ok(session)
    }
}

/// Pumps outbound commands and inbound frames until either side closes,
/// then marks the session closed and reports why.
async fn run_connection<K, S, E>(
    session_id: Uuid,
    mut sink: K,
    mut stream: S,
    mut link: SessionLink,
    events: mpsc::UnboundedSender<ModelEvent>,
) where
    K: futures_util::Sink<Message> + Unpin,
    K::Error: std::fmt::Display,
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let reason = loop {
        tokio::select! {
            command = link.commands.recv() => match command {
                Some(SessionCommand::Send(message)) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(model_session_id = %session_id, "failed to encode client message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        let _ = events.send(ModelEvent::Error(e.to_string()));
                        break format!("send failed: {}", e);
                    }
                }
                Some(SessionCommand::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break "closed by client".to_string();
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(message)) => {
                    if let Some(reason) = close_reason(&message) {
                        break reason;
                    }
                    match parse_frame(&message) {
                        Some(Ok(server)) => {
                            for event in server.into_events() {
                                if let ModelEvent::GoAway { time_left } = &event {
                                    info!(model_session_id = %session_id, ?time_left, "model service going away");
                                }
                                let _ = events.send(event);
                            }
                        }
                        Some(Err(e)) => {
                            warn!(model_session_id = %session_id, "unparseable frame from model service: {}", e)
                        }
                        None => {}
                    }
                }
                Some(Err(e)) => {
                    let _ = events.send(ModelEvent::Error(e.to_string()));
                    break format!("connection error: {}", e);
                }
                None => break "connection ended".to_string(),
            },
        }
    };

    if link.open.set_closed() {
        info!(model_session_id = %session_id, reason = %reason, "model session closed");
        let _ = events.send(ModelEvent::Closed { reason });
    }
}
