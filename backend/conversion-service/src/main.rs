//! Conversion Service - Main entry point
//!
//! Startup order: logging, configuration, metrics, size limits, renderer
//! probe, object storage, result producer, worker pool and dispatcher, task
//! consumer, probe server. Shutdown runs the other way round: the consumer
//! stops claiming, in-flight tasks drain, the producer flushes and the probe
//! server stops last.

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use conversion_service::config::LoggerConfig;
use conversion_service::{
    health, Config, Dispatcher, FileSizeLimiter, KafkaResultPublisher, LibreOffice, Metrics,
    Readiness, ResultPublisher, TaskConsumer, WorkerDeps, WorkerPool, WorkerSettings,
};
use s3_utils::{ObjectStore, S3Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const STORAGE_RETRY_INTERVAL: Duration = Duration::from_secs(5);
const PRODUCER_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let logger = LoggerConfig::from_env().context("Failed to load logger configuration")?;
    init_tracing(&logger);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting conversion service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let metrics = Metrics::new().context("Failed to register metrics")?;

    let limiter = FileSizeLimiter::from_file(&config.service.file_size_limit_settings_file)
        .context("Failed to load file size limits")?;

    let renderer = LibreOffice::new(&config.service.path_to_converter_executable);
    renderer
        .probe_version()
        .await
        .context("Renderer is not available")?;

    let local_files_folder = config.storage.local_files_folder.clone();
    tokio::fs::create_dir_all(&local_files_folder)
        .await
        .with_context(|| format!("Failed to create {}", local_files_folder.display()))?;

    let s3 = S3Client::with_config(config.storage.clone()).await;
    if !s3
        .wait_until_ready(STORAGE_RETRY_INTERVAL, shutdown_rx.clone())
        .await
    {
        info!("Shutdown requested before object storage became ready");
        return Ok(());
    }
    let storage: Arc<dyn ObjectStore> = Arc::new(s3);

    let producer = Arc::new(
        KafkaResultPublisher::new(&config.output).context("Failed to create Kafka producer")?,
    );
    let publisher: Arc<dyn ResultPublisher> = producer.clone();

    let deps = WorkerDeps {
        storage,
        renderer: Arc::new(renderer),
        limiter: Arc::new(limiter),
        metrics: metrics.clone(),
        settings: Arc::new(WorkerSettings {
            local_files_folder,
            small_png_max_side: config.service.small_png_image_maximum_side_dimension,
            large_png_max_side: config.service.large_png_image_maximum_side_dimension,
        }),
    };
    let pool = WorkerPool::new(
        config.service.workers_count,
        deps,
        config.service.use_libreoffice_multiple_user_installations,
    )
    .await
    .context("Failed to create worker pool")?;

    let dispatcher = Dispatcher::new(pool.clone(), publisher.clone(), metrics.clone());
    dispatcher.start().await?;

    let consumer = Arc::new(
        TaskConsumer::new(config.input.clone(), dispatcher.clone(), metrics.clone())
            .context("Failed to create Kafka consumer")?,
    );
    let readiness = Readiness::new(consumer.readiness(), publisher, pool);

    let consumer_task = {
        let consumer = consumer.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    let bind_address = config.http.bind_address();
    let http_metrics = metrics.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(readiness.clone()))
            .app_data(web::Data::new(http_metrics.clone()))
            .configure(health::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {bind_address}"))?
    .shutdown_timeout(config.http.shutdown_timeout_secs)
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);
    info!(address = %bind_address, "Probe server is running");

    // Returns once shutdown is requested, or early when consuming fails.
    match consumer_task.await {
        Ok(Ok(())) => info!("Kafka consumer stopped"),
        Ok(Err(e)) => error!(error = %e, "Kafka consumer failed"),
        Err(e) => error!(error = %e, "Kafka consumer task failed"),
    }

    if let Err(e) = dispatcher.stop().await {
        warn!(error = %e, "Dispatcher stop failed");
    }

    if let Err(e) = producer.flush(PRODUCER_FLUSH_TIMEOUT) {
        warn!(error = %e, "Kafka producer flush failed");
    }

    server_handle.stop(true).await;
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Probe server error: {}", e),
        Err(e) => error!("Probe server task error: {}", e),
    }

    info!("Conversion service shut down");
    Ok(())
}

fn init_tracing(logger: &LoggerConfig) {
    let default_directive = if logger.is_debug_enabled {
        "conversion_service=debug,s3_utils=debug,rdkafka=warn,info"
    } else {
        "conversion_service=info,s3_utils=info,rdkafka=warn,info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into());

    let registry = tracing_subscriber::registry().with(filter);
    if logger.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
