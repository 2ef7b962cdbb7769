//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{
    CliArgs, Command, GenerateArgs, PipelineOverrides, ServeArgs, ServeOverrides,
    StorageOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "thumbgen";
const ENV_PREFIX: &str = "THUMBGEN";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PROBE_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PROBE_PORT: u16 = 8081;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORAGE_DIR: &str = "previews";
const DEFAULT_STORAGE_BUCKET: &str = "thumbnails";
const DEFAULT_POOL_TTL_SECS: u64 = 60 * 60;
const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub source: SourceSettings,
    pub storage: StorageSettings,
    pub pool: PoolSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub probe_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Default)]
pub struct SourceSettings {
    /// When set, every request reads from this URL and `X-Source-Url` is ignored.
    pub default_url: Option<Url>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub directory: PathBuf,
    pub bucket: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Filesystem,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "fs" => Ok(Self::Filesystem),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown backend `{other}` (expected filesystem or memory)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub ffmpeg_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_global_overrides(cli);

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Generate(args)) => {
            raw.apply_storage_overrides(&args.storage);
            raw.apply_pipeline_overrides(&args.pipeline);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    source: RawSourceSettings,
    storage: RawStorageSettings,
    pool: RawPoolSettings,
    pipeline: RawPipelineSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, cli: &CliArgs) {
        if let Some(url) = cli.source_url.as_ref() {
            self.source.default_url = Some(url.clone());
        }
        if let Some(bucket) = cli.storage_bucket.as_ref() {
            self.storage.bucket = Some(bucket.clone());
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(host) = overrides.probe_host.as_ref() {
            self.server.probe_host = Some(host.clone());
        }
        if let Some(port) = overrides.probe_port {
            self.server.probe_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(ttl) = overrides.pool_ttl_seconds {
            self.pool.ttl_seconds = Some(ttl);
        }
        self.apply_storage_overrides(&overrides.storage);
        self.apply_pipeline_overrides(&overrides.pipeline);
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(backend) = overrides.backend.as_ref() {
            self.storage.backend = Some(backend.clone());
        }
        if let Some(directory) = overrides.directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
    }

    fn apply_pipeline_overrides(&mut self, overrides: &PipelineOverrides) {
        if let Some(path) = overrides.ffmpeg_path.as_ref() {
            self.pipeline.ffmpeg_path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            server: build_server_settings(raw.server)?,
            logging: build_logging_settings(raw.logging)?,
            source: build_source_settings(raw.source)?,
            storage: build_storage_settings(raw.storage)?,
            pool: build_pool_settings(raw.pool)?,
            pipeline: build_pipeline_settings(raw.pipeline)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let probe_host = server
        .probe_host
        .unwrap_or_else(|| DEFAULT_PROBE_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let probe_port = server.probe_port.unwrap_or(DEFAULT_PROBE_PORT);
    if probe_port == 0 {
        return Err(LoadError::invalid(
            "server.probe_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let probe_addr = parse_socket_addr(&probe_host, probe_port)
        .map_err(|reason| LoadError::invalid("server.probe_addr", reason))?;
    if public_addr == probe_addr {
        return Err(LoadError::invalid(
            "server.probe_port",
            "probe listener must not share the thumbnail listener address",
        ));
    }

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        probe_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_source_settings(source: RawSourceSettings) -> Result<SourceSettings, LoadError> {
    let default_url = match source.default_url.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(
            Url::parse(value)
                .map_err(|err| LoadError::invalid("source.default_url", err.to_string()))?,
        ),
    };
    Ok(SourceSettings { default_url })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let backend = match storage.backend {
        Some(value) => StorageBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("storage.backend", reason))?,
        None => StorageBackend::Filesystem,
    };

    let directory = storage
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.directory",
            "path must not be empty",
        ));
    }

    let bucket = storage
        .bucket
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_STORAGE_BUCKET.to_string());
    if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
        return Err(LoadError::invalid(
            "storage.bucket",
            "must be a single non-empty path segment",
        ));
    }

    Ok(StorageSettings {
        backend,
        directory,
        bucket,
    })
}

fn build_pool_settings(pool: RawPoolSettings) -> Result<PoolSettings, LoadError> {
    let ttl_seconds = pool.ttl_seconds.unwrap_or(DEFAULT_POOL_TTL_SECS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "pool.ttl_seconds",
            "must be greater than zero",
        ));
    }
    Ok(PoolSettings {
        ttl: Duration::from_secs(ttl_seconds),
    })
}

fn build_pipeline_settings(pipeline: RawPipelineSettings) -> Result<PipelineSettings, LoadError> {
    let ffmpeg_path = pipeline
        .ffmpeg_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG_PATH));
    if ffmpeg_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "pipeline.ffmpeg_path",
            "path must not be empty",
        ));
    }
    Ok(PipelineSettings { ffmpeg_path })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    probe_host: Option<String>,
    probe_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSourceSettings {
    default_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    backend: Option<String>,
    directory: Option<PathBuf>,
    bucket: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPoolSettings {
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPipelineSettings {
    ffmpeg_path: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
