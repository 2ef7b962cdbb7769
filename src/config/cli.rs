use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::signature::{
    DEFAULT_FORMAT, DEFAULT_LENGTH_SECS, DEFAULT_OFFSET_SECS, DEFAULT_WIDTH,
};

/// Command-line arguments for the thumbgen binary.
#[derive(Debug, Parser)]
#[command(name = "thumbgen", version, about = "Video thumbnail server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "THUMBGEN_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Default source video URL; requests may not override it when set.
    #[arg(long = "source-url", env = "SOURCE_URL", value_name = "URL", global = true)]
    pub source_url: Option<String>,

    /// Name of the preview bucket.
    #[arg(
        long = "storage-bucket",
        env = "STORAGE_BUCKET",
        value_name = "NAME",
        global = true
    )]
    pub storage_bucket: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the thumbnail and probe HTTP listeners.
    Serve(Box<ServeArgs>),
    /// Generate a single thumbnail and write it to a file.
    Generate(GenerateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the preview store backend (filesystem|memory).
    #[arg(long = "storage-backend", value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Override the directory holding preview buckets.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PipelineOverrides {
    /// Override the ffmpeg executable path.
    #[arg(long = "ffmpeg-path", value_name = "PATH")]
    pub ffmpeg_path: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub storage: StorageOverrides,

    #[command(flatten)]
    pub pipeline: PipelineOverrides,

    /// Override the thumbnail listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the thumbnail listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the probe listener host.
    #[arg(long = "probe-host", value_name = "HOST")]
    pub probe_host: Option<String>,

    /// Override the probe listener port.
    #[arg(long = "probe-port", value_name = "PORT")]
    pub probe_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override how long an idle cached generator is kept.
    #[arg(long = "pool-ttl-seconds", value_name = "SECONDS")]
    pub pool_ttl_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,

    #[command(flatten)]
    pub pipeline: PipelineOverrides,

    /// Source video URL; falls back to the configured default source.
    #[arg(long, value_name = "URL")]
    pub source: Option<String>,

    /// Seek position in seconds.
    #[arg(long, default_value_t = DEFAULT_OFFSET_SECS)]
    pub offset: u64,

    /// Scene-detection window in seconds; 0 takes the frame at the offset.
    #[arg(long, default_value_t = DEFAULT_LENGTH_SECS)]
    pub length: u64,

    /// Output image format.
    #[arg(long, default_value = DEFAULT_FORMAT)]
    pub format: String,

    /// Output width in pixels; 0 keeps the source width.
    #[arg(long, default_value_t = DEFAULT_WIDTH)]
    pub width: u32,

    /// Content hash used for the storage key.
    #[arg(long = "info-hash", value_name = "HASH", requires = "path")]
    pub info_hash: Option<String>,

    /// Path inside the content used for the storage key.
    #[arg(long, value_name = "PATH", requires = "info_hash")]
    pub path: Option<String>,

    /// File to write the image to.
    #[arg(
        short,
        long,
        value_name = "FILE",
        value_hint = ValueHint::FilePath
    )]
    pub output: PathBuf,
}
