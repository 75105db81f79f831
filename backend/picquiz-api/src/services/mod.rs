use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use redis::aio::ConnectionManager;

use crate::config::{Config, StorageBackend};
use image_migrator::ImageMigrator;
use object_storage::ObjectStorageClient;
use question_generator::QuestionGenerator;
use question_server::QuestionServer;
use session_store::{InMemorySessionStore, RedisSessionStore, SessionStore};
use storage::{InMemoryObjectStore, InMemoryStorage, MongoStorage, ObjectStore, StorageGateway};
use supply_controller::SupplyController;
use worker::{JobQueue, SupplyWorker};

pub mod answer_service;
pub mod auth_service;
pub mod image_migrator;
pub mod object_storage;
pub mod question_generator;
pub mod question_server;
pub mod session_store;
pub mod storage;
pub mod supply_controller;
pub mod worker;

pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn StorageGateway>,
    pub sessions: Arc<dyn SessionStore>,
    pub jobs: JobQueue,
    pub supply: Arc<SupplyController>,
    pub migrator: Arc<ImageMigrator>,
    pub questions: Arc<QuestionServer>,
}

impl AppState {
    /// Connects the configured backends and starts the supply worker.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let (storage, sessions, objects) = match config.storage_backend {
            StorageBackend::Mongo => {
                let storage = connect_mongo(&config).await?;
                let sessions: Arc<dyn SessionStore> = Arc::new(RedisSessionStore::new(
                    connect_redis(&config).await?,
                    config.session_ttl_secs,
                ));
                let objects: Arc<dyn ObjectStore> = Arc::new(ObjectStorageClient::new(
                    &config.object_storage,
                    &config.app_env,
                )?);
                (storage, sessions, objects)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                let storage: Arc<dyn StorageGateway> = Arc::new(InMemoryStorage::new());
                let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
                let objects: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new(
                    config.object_storage.public_url_base(),
                ));
                (storage, sessions, objects)
            }
        };

        Self::from_parts(config, storage, sessions, objects)
    }

    /// Wires services over already-built backends. Must run inside a Tokio
    /// runtime since it spawns the worker.
    pub fn from_parts(
        config: Config,
        storage: Arc<dyn StorageGateway>,
        sessions: Arc<dyn SessionStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> anyhow::Result<Self> {
        let (jobs, receiver) = JobQueue::new();

        let supply = Arc::new(SupplyController::new(
            storage.clone(),
            QuestionGenerator::new(config.workflow.clone()),
            jobs.clone(),
            config.quiz.clone(),
        ));
        let migrator = Arc::new(ImageMigrator::new(
            storage.clone(),
            objects,
            config.migration.clone(),
            config.permanent_url_marker(),
        )?);

        let questions = Arc::new(QuestionServer::new(
            storage.clone(),
            jobs.clone(),
            config.quiz.page_size,
        ));

        SupplyWorker::new(receiver, supply.clone(), migrator.clone()).spawn();

        Ok(Self {
            config,
            storage,
            sessions,
            jobs,
            supply,
            migrator,
            questions,
        })
    }
}

pub async fn connect_mongo(config: &Config) -> anyhow::Result<Arc<dyn StorageGateway>> {
    let client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let storage = MongoStorage::new(client.database(&config.mongo_database));
    storage.ensure_indexes().await?;
    tracing::info!("MongoDB connected");
    Ok(Arc::new(storage))
}

async fn connect_redis(config: &Config) -> anyhow::Result<ConnectionManager> {
    let redis_client =
        redis::Client::open(config.redis_uri.clone()).context("Failed to create Redis client")?;

    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(
        Duration::from_secs(30),
        ConnectionManager::new(redis_client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}
