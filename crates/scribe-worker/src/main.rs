//! Chunk transcription worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scribe_orchestrator::{Finalizer, TranscriptSink};
use scribe_queue::RedisTaskQueue;
use scribe_storage::{ObjectStore, S3Client, S3Config};
use scribe_store::{JobStore, PgJobStore, StoreConfig};
use scribe_worker::{
    ChunkHandler, FfmpegExtractor, GeminiTranscriber, TaskExecutor, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting scribe-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let store_config = StoreConfig::from_env();
    let pg = PgJobStore::connect(&store_config)
        .await
        .context("Failed to connect to job store")?;
    pg.migrate().await.context("Failed to run migrations")?;
    let store: Arc<dyn JobStore> = Arc::new(pg);

    let s3_config = S3Config::from_env().context("Invalid storage configuration")?;
    let objects: Arc<dyn ObjectStore> = Arc::new(S3Client::new(&s3_config));

    let queue = RedisTaskQueue::from_env().context("Failed to create task queue")?;

    let sink = TranscriptSink::new(
        objects.clone(),
        s3_config.bucket_name.clone(),
        s3_config.transcript_prefix.clone(),
    );
    let finalizer = Finalizer::new(store.clone(), sink).with_policy(store_config.retry_policy());

    let transcriber = GeminiTranscriber::from_env().context("Invalid Gemini configuration")?;
    let handler = ChunkHandler::new(
        store,
        objects,
        Arc::new(FfmpegExtractor::default()),
        Arc::new(transcriber),
        finalizer,
        config.work_dir.clone(),
    );

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Failed to create work dir {}", config.work_dir.display()))?;

    let executor = Arc::new(TaskExecutor::new(config, queue, handler));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        return Err(e.into());
    }

    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env().add_directive("sqlx=warn".parse()?);
    for target in [
        "scribe_worker",
        "scribe_orchestrator",
        "scribe_store",
        "scribe_storage",
        "scribe_queue",
        "scribe_media",
    ] {
        env_filter = env_filter.add_directive(format!("{target}=info").parse()?);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
    Ok(())
}
