//! Thumbnail generation pipeline: decoder parameters and the process that runs them.

mod ffmpeg;
mod params;

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use ffmpeg::FfmpegExtractor;
pub use params::{DecoderInvocation, content_type_for};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported format type `{format}`")]
    UnsupportedFormat { format: String },
    #[error("decoder binary unavailable: {0}")]
    NotFound(io::Error),
    #[error("failed to start decoder: {0}")]
    Spawn(io::Error),
    #[error("failed to read decoder output: {0}")]
    Stream(io::Error),
    #[error("decoder exited with status {exit_code:?}")]
    Exit { exit_code: Option<i32> },
    #[error("decoder produced no image")]
    EmptyOutput,
}

/// Runs a decoder invocation and returns the complete encoded image.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract(&self, invocation: &DecoderInvocation) -> Result<Bytes, PipelineError>;
}
