mod config;
mod db;
mod errors;
mod events;
mod ingest;
mod jobs;
mod learning;
mod llm_client;
mod matching;
mod models;
mod parser;
mod routes;
mod state;
mod storage;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db::create_pool;
use crate::events::{forward_to_redis, EventBus};
use crate::ingest::{DriveSyncer, GoogleDriveClient, IngestionService};
use crate::jobs::queue::QueueName;
use crate::jobs::{RedisJobQueue, ScheduleConfig, Scheduler, TaskRunner, WorkerConfig, WorkerPool};
use crate::learning::{LearningSettings, LearningStore, PgVectorStore};
use crate::llm_client::embeddings::{Embedder, EmbeddingClient};
use crate::llm_client::fine_tune::FineTuneClient;
use crate::llm_client::{ChatModel, LlmClient, LlmSettings};
use crate::parser::entities::{EntityExtractor, HttpNerBackend, NerBackend};
use crate::parser::structurer::Structurer;
use crate::parser::text_extractor::TextExtractor;
use crate::parser::ResumeParser;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::postgres::PgStore;
use crate::storage::blob::S3BlobStore;
use crate::storage::PipelineStore;

const EVENT_BUS_CAPACITY: usize = 1024;
const FORWARDER_DRAIN: Duration = Duration::from_secs(5);
/// Connections reserved for the HTTP handlers on top of one per worker.
const HTTP_DB_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume pipeline v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let workers = config.workers_resume_processing + config.workers_matching + config.workers_drive_sync;
    let db = create_pool(&config.database_url, HTTP_DB_CONNECTIONS + workers as u32).await?;
    let store: Arc<dyn PipelineStore> = Arc::new(PgStore::new(db.clone()));

    // Initialize Redis: one connection for the queue, one for event fan-out
    let redis = redis::Client::open(config.redis_url.clone())?;
    let queue = Arc::new(RedisJobQueue::new(redis.get_multiplexed_async_connection().await?));
    let events = EventBus::new(EVENT_BUS_CAPACITY);
    let forwarder = tokio::spawn(forward_to_redis(
        events.subscribe(),
        redis.get_multiplexed_async_connection().await?,
    ));
    info!("Redis client initialized");

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    let blobs = Arc::new(S3BlobStore::new(s3, config.s3_bucket.clone()));
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    // LLM services are optional; without a key parsing degrades to rule-based
    let (chat, embedder, fine_tune) = match &config.llm_api_key {
        Some(key) => {
            let settings = |model: &str| {
                LlmSettings::new(key.clone(), model.to_string()).with_base_url(config.llm_base_url.clone())
            };
            let chat: Arc<dyn ChatModel> = Arc::new(LlmClient::new(settings(&config.llm_model))?);
            let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(settings(&config.embedding_model))?);
            let fine_tune = Arc::new(FineTuneClient::new(settings(&config.llm_model))?);
            info!("LLM client initialized (model: {})", config.llm_model);
            (Some(chat), Some(embedder), Some(fine_tune))
        }
        None => {
            warn!("LLM_API_KEY not set; resumes will be structured without an LLM");
            (None, None, None)
        }
    };

    let learning = Arc::new(LearningStore::new(
        store.clone(),
        Arc::new(PgVectorStore::new(db.clone())),
        embedder,
        fine_tune,
        LearningSettings {
            training_min_accuracy: config.training_min_accuracy,
            training_min_examples: config.training_min_examples,
            auto_fine_tune: config.auto_fine_tune,
            fine_tune_poll_interval: config.fine_tune_poll_interval,
            few_shot_min_accuracy: config.few_shot_min_accuracy,
        },
    ));

    let ner: Option<Arc<dyn NerBackend>> = match &config.ner_base_url {
        Some(url) => Some(Arc::new(HttpNerBackend::new(url.clone())?)),
        None => None,
    };
    let parser = Arc::new(
        ResumeParser::new(
            TextExtractor::with_system_tools(),
            EntityExtractor::new(ner, &config.phone_default_region),
            Structurer::new(chat),
        )
        .with_examples(learning.clone(), config.few_shot_examples),
    );

    let ingest = Arc::new(IngestionService::new(
        store.clone(),
        blobs.clone(),
        queue.clone(),
        config.job_max_retries,
    ));

    let mut runner = TaskRunner::new(
        store.clone(),
        blobs,
        queue.clone(),
        parser,
        learning.clone(),
        events.clone(),
    )
    .with_retry_base(config.job_retry_base)
    .with_job_retention_days(config.job_retention_days);

    if config.drive.is_configured() {
        let drive = Arc::new(GoogleDriveClient::new(config.drive.clone())?);
        runner = runner.with_drive(Arc::new(DriveSyncer::new(
            store.clone(),
            drive,
            ingest.clone(),
            events.clone(),
            config.task_hard_timeout,
        )));
        info!(folders = config.drive_folders.len(), "Google Drive sync enabled");
    } else if !config.drive_folders.is_empty() {
        warn!("DRIVE_FOLDERS set without Google Drive credentials; sync tasks will be skipped");
    }
    let runner = Arc::new(runner);

    // One worker pool per queue
    let worker_handles: Vec<_> = QueueName::ALL
        .into_iter()
        .map(|name| {
            let concurrency = match name {
                QueueName::ResumeProcessing => config.workers_resume_processing,
                QueueName::Matching => config.workers_matching,
                QueueName::DriveSync => config.workers_drive_sync,
            };
            let worker_config = WorkerConfig::new(name, concurrency)
                .with_poll_interval(config.queue_poll_interval)
                .with_timeouts(config.task_soft_timeout, config.task_hard_timeout);
            WorkerPool::new(queue.clone(), runner.clone(), worker_config).start()
        })
        .collect();

    let scheduler = Scheduler::new(
        queue.clone(),
        ScheduleConfig {
            drive_folders: config.drive_folders.clone(),
            drive_sync_interval: config.drive_sync_interval,
            match_refresh_interval: config.match_refresh_interval,
            cleanup_interval: config.job_cleanup_interval,
        },
    )
    .start();

    // Build app state
    let state = AppState {
        store,
        ingest,
        runner,
        learning,
        training_export_dir: config.training_export_dir.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped; draining workers");
    scheduler.shutdown().await;
    for handle in worker_handles {
        handle.shutdown().await;
    }
    // Give the forwarder a moment to flush the final events.
    drop(events);
    if tokio::time::timeout(FORWARDER_DRAIN, forwarder).await.is_err() {
        warn!("Event forwarder still running at shutdown; remaining events dropped");
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
    }
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "resume-pipeline-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
