//! ffmpeg-backed transcoder: one child process per pipeline, raw s16le on
//! both stdin and stdout.

use crate::config::TranscoderConfig;
use crate::error::TranscodeError;
use crate::locate::{locate_binary, FFMPEG};
use crate::pipeline::{Liveness, PipelineEnds, TranscodeChunk, TranscoderFactory, TranscoderPipeline};
use bytes::Bytes;
use parley_types::TranscodeSpec;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Builds the command-line arguments for a spec.
pub type ArgBuilder = fn(&TranscodeSpec) -> Vec<OsString>;

/// Arguments for converting raw s16le between the two formats of a `TranscodeSpec`.
pub fn ffmpeg_args(spec: &TranscodeSpec) -> Vec<OsString> {
    [
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        spec.input.sample_rate.to_string(),
        "-ac".to_string(),
        spec.input.channels.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        spec.output.sample_rate.to_string(),
        "-ac".to_string(),
        spec.output.channels.to_string(),
        "pipe:1".to_string(),
    ]
    .into_iter()
    .map(OsString::from)
    .collect()
}

/// Spawns an external process per pipeline.
#[derive(Debug, Clone)]
pub struct ProcessTranscoderFactory {
    program: PathBuf,
    args: ArgBuilder,
    read_chunk_ms: u32,
}

impl ProcessTranscoderFactory {
    /// Uses `program` with ffmpeg arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: ffmpeg_args,
            read_chunk_ms: 20,
        }
    }

    /// Locates ffmpeg according to `config`.
    pub fn from_config(config: &TranscoderConfig) -> Result<Self, TranscodeError> {
        let program = locate_binary(config.binary_path.as_deref(), FFMPEG)?;
        tracing::info!(path = %program.display(), "using transcoder binary");
        Ok(Self {
            program,
            args: ffmpeg_args,
            read_chunk_ms: config.read_chunk_ms.max(1),
        })
    }

    /// Replaces the argument builder, for transcoders with a different CLI.
    pub fn with_args(mut self, args: ArgBuilder) -> Self {
        self.args = args;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl TranscoderFactory for ProcessTranscoderFactory {
    fn create(&self, spec: &TranscodeSpec) -> TranscoderPipeline {
        let mut command = Command::new(&self.program);
        command
            .args((self.args)(spec))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    program = %self.program.display(),
                    direction = spec.direction.as_str(),
                    "failed to spawn transcoder: {}",
                    e
                );
                return TranscoderPipeline::failed(
                    *spec,
                    TranscodeError::Spawn {
                        program: self.program.display().to_string(),
                        reason: e.to_string(),
                    },
                );
            }
        };

        let (pipeline, ends) = TranscoderPipeline::channel(*spec);
        let PipelineEnds {
            input,
            output,
            liveness,
        } = ends;

        tracing::debug!(
            pipeline_id = pipeline.id(),
            pid = child.id(),
            direction = spec.direction.as_str(),
            input = %spec.input,
            output = %spec.output,
            "spawned transcoder"
        );

        let read_size = spec.output.bytes_for_millis(self.read_chunk_ms).max(256);

        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(feed_stdin(stdin, input));
        }
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_stdout(stdout, output, read_size));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr, pipeline.id()));
        }
        tokio::spawn(supervise(child, liveness, pipeline.id()));

        pipeline
    }
}

/// Copies owner writes into the child's stdin until either side goes away.
async fn feed_stdin<W>(mut stdin: W, mut input: mpsc::UnboundedReceiver<Bytes>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = input.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            tracing::debug!("transcoder stdin closed: {}", e);
            break;
        }
    }
    // Dropping stdin signals EOF.
}

/// Forwards stdout to the owner. Ends the output when the child closes it.
async fn drain_stdout<R>(mut stdout: R, output: mpsc::Sender<TranscodeChunk>, read_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; read_size];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if output
                    .send(Ok(Bytes::copy_from_slice(&buf[..n])))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                let _ = output.send(Err(TranscodeError::Io(e.to_string()))).await;
                break;
            }
        }
    }
}

async fn log_stderr<R>(stderr: R, pipeline_id: u64)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(pipeline_id, "transcoder: {}", line);
    }
}

/// Waits for the child to exit or for the owner to kill it, then marks the
/// pipeline dead.
async fn supervise(mut child: Child, liveness: Liveness, pipeline_id: u64) {
    let killed = tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => tracing::debug!(pipeline_id, %status, "transcoder exited"),
                Err(e) => tracing::warn!(pipeline_id, "failed to wait for transcoder: {}", e),
            }
            false
        }
        _ = liveness.kill_requested() => true,
    };

    if killed {
        if let Err(e) = child.kill().await {
            tracing::debug!(pipeline_id, "transcoder already gone: {}", e);
        }
    }

    liveness.mark_dead();
}
