use std::{
    io::{self, ErrorKind},
    path::PathBuf,
    process::Stdio,
    time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{io::AsyncReadExt, process::Command};
use tracing::{debug, info, warn};

use super::{DecoderInvocation, FrameExtractor, PipelineError};

/// Extracts frames by spawning an ffmpeg-compatible binary.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    binary: PathBuf,
}

impl FfmpegExtractor {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract(&self, invocation: &DecoderInvocation) -> Result<Bytes, PipelineError> {
        let started_at = Instant::now();
        debug!(
            target = "application::pipeline::ffmpeg",
            op = "ffmpeg::extract",
            binary = %self.binary.display(),
            args = ?invocation.args(),
            "Spawning decoder"
        );

        let mut child = Command::new(&self.binary)
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| {
                warn!(
                    target = "application::pipeline::ffmpeg",
                    op = "ffmpeg::extract",
                    result = "error",
                    error_code = "spawn",
                    binary = %self.binary.display(),
                    error = %err,
                    "Failed to spawn decoder"
                );
                if err.kind() == ErrorKind::NotFound {
                    PipelineError::NotFound(err)
                } else {
                    PipelineError::Spawn(err)
                }
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| {
            PipelineError::Stream(io::Error::other("decoder stdout was not captured"))
        })?;

        let mut buffer = Vec::new();
        let copied = stdout.read_to_end(&mut buffer).await;
        // The pipe must be closed before waiting on the child.
        drop(stdout);
        let status = child.wait().await.map_err(PipelineError::Stream)?;

        if let Err(err) = copied {
            warn!(
                target = "application::pipeline::ffmpeg",
                op = "ffmpeg::extract",
                result = "error",
                error_code = "stream_copy",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "Failed to read decoder output"
            );
            return Err(PipelineError::Stream(err));
        }

        if !status.success() {
            let exit_code = status.code();
            warn!(
                target = "application::pipeline::ffmpeg",
                op = "ffmpeg::extract",
                result = "error",
                error_code = "exit_status",
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Decoder exited unsuccessfully"
            );
            return Err(PipelineError::Exit { exit_code });
        }

        if buffer.is_empty() {
            return Err(PipelineError::EmptyOutput);
        }

        info!(
            target = "application::pipeline::ffmpeg",
            op = "ffmpeg::extract",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            image_bytes = buffer.len(),
            "Decoder produced image"
        );

        Ok(Bytes::from(buffer))
    }
}
