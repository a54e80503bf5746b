//! The transcoder pipeline handle shared by every backend.
//!
//! A [`TranscoderPipeline`] is the owner-side view of one transcoder: an
//! input sink that never blocks, an output source that can be taken once,
//! and a liveness flag. Backends (the ffmpeg process wrapper, or test
//! doubles) drive the other half through [`PipelineEnds`].

use crate::error::TranscodeError;
use bytes::Bytes;
use parley_types::TranscodeSpec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Number of output chunks buffered between the backend and the consumer.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// One chunk read from a transcoder's output.
pub type TranscodeChunk = Result<Bytes, TranscodeError>;

/// Receiving half of a transcoder's output.
pub type TranscodeOutput = mpsc::Receiver<TranscodeChunk>;

/// Shared liveness flag of a transcoder.
///
/// Transitions from alive to dead exactly once.
#[derive(Debug, Clone)]
pub struct Liveness {
    inner: Arc<LivenessInner>,
}

#[derive(Debug)]
struct LivenessInner {
    alive: AtomicBool,
    kill: Notify,
}

impl Liveness {
    fn new(alive: bool) -> Self {
        Self {
            inner: Arc::new(LivenessInner {
                alive: AtomicBool::new(alive),
                kill: Notify::new(),
            }),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Flips the flag to dead. Returns `true` only for the call that made
    /// the transition.
    pub fn mark_dead(&self) -> bool {
        self.inner.alive.swap(false, Ordering::AcqRel)
    }

    /// Resolves once the owner has asked for the backend to be killed.
    pub async fn kill_requested(&self) {
        self.inner.kill.notified().await;
    }

    fn request_kill(&self) {
        self.inner.kill.notify_one();
    }
}

/// Backend half of a pipeline.
#[derive(Debug)]
pub struct PipelineEnds {
    /// Chunks written by the owner, in order.
    pub input: mpsc::UnboundedReceiver<Bytes>,
    /// Where converted audio goes. Dropping it ends the owner's output.
    pub output: mpsc::Sender<TranscodeChunk>,
    pub liveness: Liveness,
}

/// Owner half of a transcoder.
#[derive(Debug)]
pub struct TranscoderPipeline {
    id: u64,
    spec: TranscodeSpec,
    input: mpsc::UnboundedSender<Bytes>,
    output: Option<TranscodeOutput>,
    liveness: Liveness,
}

impl TranscoderPipeline {
    /// Creates a live pipeline and the ends a backend drives.
    pub fn channel(spec: TranscodeSpec) -> (Self, PipelineEnds) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let liveness = Liveness::new(true);

        let pipeline = Self {
            id: NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed),
            spec,
            input: input_tx,
            output: Some(output_rx),
            liveness: liveness.clone(),
        };
        let ends = PipelineEnds {
            input: input_rx,
            output: output_tx,
            liveness,
        };
        (pipeline, ends)
    }

    /// A pipeline whose backend never started: dead from the outset, with
    /// an output that yields `error` once and then ends.
    pub fn failed(spec: TranscodeSpec, error: TranscodeError) -> Self {
        let (input_tx, _) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::channel(1);
        // Capacity 1 and a fresh channel: this cannot fail.
        let _ = output_tx.try_send(Err(error));

        Self {
            id: NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed),
            spec,
            input: input_tx,
            output: Some(output_rx),
            liveness: Liveness::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn spec(&self) -> &TranscodeSpec {
        &self.spec
    }

    /// Queues `chunk` for the backend without waiting for earlier writes to
    /// drain. Dropped silently once the pipeline is dead; returns whether
    /// the chunk was accepted.
    pub fn write(&self, chunk: Bytes) -> bool {
        if !self.liveness.is_alive() {
            return false;
        }
        self.input.send(chunk).is_ok()
    }

    /// Takes the output source. Only the first call returns `Some`.
    pub fn take_output(&mut self) -> Option<TranscodeOutput> {
        self.output.take()
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Kills the backend. Safe to call any number of times, including on a
    /// pipeline that already died.
    pub fn kill(&self) {
        if self.liveness.mark_dead() {
            tracing::debug!(
                pipeline_id = self.id,
                direction = self.spec.direction.as_str(),
                "killing transcoder"
            );
        }
        self.liveness.request_kill();
    }
}

impl Drop for TranscoderPipeline {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Creates transcoder pipelines for a direction.
///
/// Implemented by the process wrapper; an in-process resampler could
/// satisfy the same contract without touching callers.
pub trait TranscoderFactory: Send + Sync {
    fn create(&self, spec: &TranscodeSpec) -> TranscoderPipeline;
}
