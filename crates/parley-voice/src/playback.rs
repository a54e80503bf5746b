//! Model audio to the voice channel.

use crate::platform::{AudioSource, VoiceConnection};
use bytes::Bytes;
use parley_transcode::{TranscoderFactory, TranscoderPipeline};
use parley_types::TranscodeSpec;
use std::sync::Arc;

/// Feeds model PCM through a playback transcoder whose output is bound as
/// the channel's audio source.
pub struct PlaybackPipeline {
    factory: Arc<dyn TranscoderFactory>,
    connection: Arc<dyn VoiceConnection>,
    spec: TranscodeSpec,
    transcoder: TranscoderPipeline,
    resets: u64,
}

impl std::fmt::Debug for PlaybackPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackPipeline")
            .field("spec", &self.spec)
            .field("transcoder", &self.transcoder.id())
            .field("alive", &self.transcoder.is_alive())
            .field("resets", &self.resets)
            .finish()
    }
}

fn bind(
    factory: &dyn TranscoderFactory,
    connection: &dyn VoiceConnection,
    spec: &TranscodeSpec,
) -> TranscoderPipeline {
    let mut transcoder = factory.create(spec);
    if let Some(output) = transcoder.take_output() {
        connection.play(AudioSource {
            format: spec.output,
            output,
        });
    }
    transcoder
}

impl PlaybackPipeline {
    pub fn create(
        factory: Arc<dyn TranscoderFactory>,
        connection: Arc<dyn VoiceConnection>,
        spec: TranscodeSpec,
    ) -> Self {
        let transcoder = bind(factory.as_ref(), connection.as_ref(), &spec);
        Self {
            factory,
            connection,
            spec,
            transcoder,
            resets: 0,
        }
    }

    /// Queues PCM without waiting. Returns `false` if the transcoder is
    /// dead and the chunk was dropped.
    pub fn write(&self, pcm: Bytes) -> bool {
        self.transcoder.write(pcm)
    }

    pub fn is_alive(&self) -> bool {
        self.transcoder.is_alive()
    }

    pub fn transcoder_id(&self) -> u64 {
        self.transcoder.id()
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Discards everything in flight and starts over with a fresh
    /// transcoder bound as the channel's source.
    pub fn reset(&mut self) {
        self.transcoder.kill();
        self.transcoder = bind(self.factory.as_ref(), self.connection.as_ref(), &self.spec);
        self.resets += 1;
        tracing::debug!(
            transcoder_id = self.transcoder.id(),
            alive = self.transcoder.is_alive(),
            "playback reset"
        );
    }

    pub fn kill(&self) {
        self.transcoder.kill();
    }
}
