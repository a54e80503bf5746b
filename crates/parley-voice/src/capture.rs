//! One user's microphone to the model.
//!
//! A [`CapturePipeline`] owns a long-lived capture transcoder and forwards
//! everything it produces through a hook. Decode stages come and go with
//! the platform's per-user subscription and write into the same
//! transcoder.

use crate::decode::FrameDecoder;
use crate::platform::RawAudioStream;
use bytes::Bytes;
use parley_transcode::{TranscoderFactory, TranscoderPipeline};
use parley_types::{TranscodeSpec, UserId};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Why a decode stage stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEnd {
    /// The platform ended the subscription.
    Closed,
    /// The subscription reported an error.
    Failed(String),
}

pub struct CapturePipeline {
    user: UserId,
    transcoder: Arc<TranscoderPipeline>,
    forwarder: JoinHandle<()>,
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("user", &self.user)
            .field("transcoder", &self.transcoder.id())
            .field("alive", &self.transcoder.is_alive())
            .finish()
    }
}

impl CapturePipeline {
    /// Starts a capture transcoder for `user`. Each converted chunk is
    /// passed to `forward`, which decides whether it goes anywhere.
    pub fn start<F>(factory: &dyn TranscoderFactory, spec: &TranscodeSpec, user: UserId, forward: F) -> Self
    where
        F: Fn(Bytes) + Send + 'static,
    {
        let mut transcoder = factory.create(spec);
        let output = transcoder.take_output();
        let forward_user = user.clone();

        let forwarder = tokio::spawn(async move {
            let Some(mut output) = output else {
                return;
            };
            while let Some(chunk) = output.recv().await {
                match chunk {
                    Ok(pcm) => forward(pcm),
                    Err(e) => {
                        tracing::warn!(user_id = %forward_user, "capture transcoder error: {}", e);
                    }
                }
            }
            tracing::debug!(user_id = %forward_user, "capture transcoder output ended");
        });

        Self {
            user,
            transcoder: Arc::new(transcoder),
            forwarder,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn is_alive(&self) -> bool {
        self.transcoder.is_alive()
    }

    pub fn transcoder_id(&self) -> u64 {
        self.transcoder.id()
    }

    /// Starts a decode stage that pipes `stream` through `decoder` into
    /// this pipeline's transcoder. `on_end` runs once when the stream
    /// closes or fails; it does not run if the stage is aborted.
    pub fn attach<E>(&self, stream: RawAudioStream, decoder: Box<dyn FrameDecoder>, on_end: E) -> JoinHandle<()>
    where
        E: FnOnce(DecodeEnd) + Send + 'static,
    {
        let transcoder = Arc::clone(&self.transcoder);
        tokio::spawn(run_decode_stage(stream, decoder, transcoder, on_end))
    }

    /// Kills the transcoder and stops forwarding.
    pub fn kill(&self) {
        self.transcoder.kill();
        self.forwarder.abort();
    }
}

async fn run_decode_stage<E>(
    mut stream: RawAudioStream,
    mut decoder: Box<dyn FrameDecoder>,
    transcoder: Arc<TranscoderPipeline>,
    on_end: E,
) where
    E: FnOnce(DecodeEnd) + Send + 'static,
{
    let end = loop {
        match stream.recv().await {
            Some(Ok(packet)) => {
                if let Some(pcm) = decoder.decode(&packet) {
                    transcoder.write(pcm);
                }
            }
            Some(Err(e)) => break DecodeEnd::Failed(e.to_string()),
            None => break DecodeEnd::Closed,
        }
    };
    on_end(end);
}
