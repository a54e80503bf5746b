//! Client for the remote multimodal model used by the voice bridge.
//!
//! A [`ModelSession`] is one persistent bidirectional session. It carries
//! audio, text, manual activity boundaries and tool responses out, and
//! delivers [`ModelEvent`]s in. Sessions are opened through a
//! [`ModelConnector`]; [`GeminiLiveConnector`] speaks the Gemini Live
//! WebSocket protocol.
//!
//! Tool calls are answered through a [`ToolRegistry`], which bounds every
//! call with a deadline and turns failures into error payloads.

pub mod config;
pub mod error;
pub mod gemini;
pub mod protocol;
pub mod session;
pub mod tools;

pub use config::{ModelConfig, ToolConfig, DEFAULT_ENDPOINT};
pub use error::{ModelError, ToolError};
pub use gemini::{setup_message, GeminiLiveConnector};
pub use protocol::{ClientMessage, FunctionCall, FunctionDeclaration, FunctionResponse};
pub use session::{
    ModelConnector, ModelEvent, ModelSession, OpenFlag, SessionCommand, SessionLink,
    SessionSetup,
};
pub use tools::{Tool, ToolRegistry};
