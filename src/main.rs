use std::{future::IntoFuture, process, sync::Arc};

use thumbgen::{
    application::{
        error::AppError,
        pipeline::{FfmpegExtractor, FrameExtractor},
    },
    cache::{GeneratorPool, PoolConfig},
    config::{self, StorageBackend},
    domain::signature::{ContentIdentity, RequestSignature, parse_source},
    infra::{
        error::InfraError,
        http::{self, HttpState},
        storage::{FsPreviewStore, MemoryPreviewStore, PreviewStore},
        telemetry,
    },
};
use tokio::{net::TcpListener, sync::watch, time::timeout, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(InfraError::from)?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Generate(args) => run_generate(settings, args).await,
    }
}

fn build_pool(settings: &config::Settings) -> GeneratorPool {
    let store: Arc<dyn PreviewStore> = match settings.storage.backend {
        StorageBackend::Filesystem => Arc::new(FsPreviewStore::new(
            settings.storage.directory.clone(),
            settings.storage.bucket.clone(),
        )),
        StorageBackend::Memory => Arc::new(MemoryPreviewStore::new()),
    };
    let extractor: Arc<dyn FrameExtractor> =
        Arc::new(FfmpegExtractor::new(settings.pipeline.ffmpeg_path.clone()));

    info!(
        target = "thumbgen::bootstrap",
        backend = ?settings.storage.backend,
        directory = %settings.storage.directory.display(),
        bucket = %settings.storage.bucket,
        ffmpeg = %settings.pipeline.ffmpeg_path.display(),
        ttl_secs = settings.pool.ttl.as_secs(),
        "Generator pool configured"
    );

    GeneratorPool::new(&PoolConfig::from(&settings.pool), store, extractor)
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let pool = build_pool(&settings);
    let state = HttpState::new(pool.clone(), settings.source.default_url.clone());

    let result = serve_http(&settings, state).await;
    pool.shutdown();
    result
}

async fn run_generate(
    settings: config::Settings,
    args: config::GenerateArgs,
) -> Result<(), AppError> {
    let source = match args.source.as_deref() {
        Some(value) => parse_source(value)?,
        None => settings.source.default_url.clone().ok_or_else(|| {
            AppError::validation("generate requires --source or a configured default source")
        })?,
    };

    let signature = RequestSignature::new(source)
        .with_offset_secs(args.offset)
        .with_length_secs(args.length)
        .with_format(&args.format)
        .with_width(args.width)
        .with_identity(ContentIdentity::from_parts(
            args.info_hash.as_deref().unwrap_or_default(),
            args.path.as_deref().unwrap_or_default(),
        ));

    let pool = build_pool(&settings);
    let generator = pool.get(signature).await;
    let outcome = generator.get().await;
    pool.shutdown();
    let bytes = outcome?;

    tokio::fs::write(&args.output, &bytes)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "thumbgen::generate",
        key = %generator.key(),
        path = %args.output.display(),
        image_bytes = bytes.len(),
        "Thumbnail written"
    );
    Ok(())
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let public_router = http::build_router(state);
    let probe_router = http::build_probe_router();

    let public_listener = TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let probe_listener = TcpListener::bind(settings.server.probe_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "thumbgen::serve",
        public_addr = %settings.server.public_addr,
        probe_addr = %settings.server.probe_addr,
        "Listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()))
        .into_future();
    let probe_server = axum::serve(probe_listener, probe_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .into_future();

    let servers = async { try_join!(public_server, probe_server).map(|_| ()) };
    tokio::pin!(servers);

    tokio::select! {
        result = &mut servers => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = shutdown_signal() => {
            info!(target = "thumbgen::serve", "Shutdown requested, draining connections");
            let _ = shutdown_tx.send(true);
            match timeout(settings.server.graceful_shutdown, &mut servers).await {
                Ok(result) => {
                    result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
                }
                Err(_) => warn!(
                    target = "thumbgen::serve",
                    timeout_secs = settings.server.graceful_shutdown.as_secs(),
                    "Graceful shutdown timed out"
                ),
            }
        }
    }

    Ok(())
}

async fn wait_for_shutdown(mut signal: watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
