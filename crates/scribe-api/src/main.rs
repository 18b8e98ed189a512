//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scribe_api::{create_router, metrics, ApiConfig, AppState};
use scribe_orchestrator::{Finalizer, TranscriptSink};
use scribe_queue::{RedisTaskQueue, TaskDispatcher};
use scribe_storage::{ObjectStore, S3Client, S3Config};
use scribe_store::{JobStore, PgJobStore, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    init_tracing()?;

    info!("Starting scribe-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    let store_config = StoreConfig::from_env();
    let pg = PgJobStore::connect(&store_config)
        .await
        .context("Failed to connect to job store")?;
    pg.migrate().await.context("Failed to run migrations")?;
    let store: Arc<dyn JobStore> = Arc::new(pg);

    let s3_config = S3Config::from_env().context("Invalid storage configuration")?;
    let objects: Arc<dyn ObjectStore> = Arc::new(S3Client::new(&s3_config));

    let queue = RedisTaskQueue::from_env().context("Failed to create task queue")?;
    let task_deadline = queue.config().task_deadline;
    let dispatcher: Arc<dyn TaskDispatcher> = Arc::new(queue);

    let finalizer = Finalizer::new(
        Arc::clone(&store),
        TranscriptSink::new(
            Arc::clone(&objects),
            s3_config.bucket_name.clone(),
            s3_config.transcript_prefix.clone(),
        ),
    )
    .with_policy(store_config.retry_policy());

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install Prometheus recorder")?)
    } else {
        None
    };

    let state = AppState::new(
        config.clone(),
        store,
        objects,
        dispatcher,
        finalizer,
        task_deadline,
    );
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env()
        .add_directive("scribe_api=info".parse()?)
        .add_directive("sqlx=warn".parse()?);
    for target in ["scribe_orchestrator", "scribe_store", "scribe_storage", "scribe_queue"] {
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

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
