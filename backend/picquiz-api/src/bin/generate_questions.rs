//! Offline question generation: `generate-questions [count]`.
//!
//! Generates, persists and migrates images synchronously against the
//! configured storage, then prints a summary.

use std::sync::Arc;

use anyhow::{bail, Context};
use picquiz_api::{
    config::{Config, StorageBackend},
    services::{
        connect_mongo,
        image_migrator::{ImageMigrator, MigrationReport},
        object_storage::ObjectStorageClient,
        question_generator::QuestionGenerator,
        storage::{InMemoryObjectStore, InMemoryStorage, ObjectStore, StorageGateway},
        supply_controller::persist,
    },
    telemetry,
};

const DEFAULT_COUNT: usize = 5;

fn parse_count(arg: Option<String>) -> anyhow::Result<usize> {
    match arg {
        None => Ok(DEFAULT_COUNT),
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(0) | Err(_) => bail!("count must be a positive integer, got {:?}", raw),
            Ok(count) => Ok(count),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let telemetry = telemetry::init("picquiz-generate-questions")?;

    let count = parse_count(std::env::args().nth(1))?;
    let config = Config::load().context("Failed to load configuration")?;

    let (storage, objects) = match config.storage_backend {
        StorageBackend::Mongo => {
            let storage = connect_mongo(&config).await?;
            let objects: Arc<dyn ObjectStore> = Arc::new(ObjectStorageClient::new(
                &config.object_storage,
                &config.app_env,
            )?);
            (storage, objects)
        }
        StorageBackend::Memory => {
            tracing::warn!("In-memory backend selected; results are discarded on exit");
            let storage: Arc<dyn StorageGateway> = Arc::new(InMemoryStorage::new());
            let objects: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new(
                config.object_storage.public_url_base(),
            ));
            (storage, objects)
        }
    };

    let generator = QuestionGenerator::new(config.workflow.clone());
    if !generator.is_configured() {
        bail!("COZE_API_KEY and COZE_WORKFLOW_ID must be set");
    }
    let migrator = ImageMigrator::new(
        storage.clone(),
        objects,
        config.migration.clone(),
        config.permanent_url_marker(),
    )?;

    println!("Generating {} question(s)...", count);
    let candidates = generator.generate_batch(count).await;
    let outcome = persist(storage.as_ref(), &candidates).await;

    let mut migration = MigrationReport::default();
    for ids in outcome.ids.chunks(config.migration.page_size.max(1)) {
        let report = migrator.migrate_pending(Some(ids)).await;
        migration.migrated += report.migrated;
        migration.total += report.total;
    }

    println!(
        "Done: requested {}, generated {}, saved {}, images migrated {}/{}",
        count,
        candidates.len(),
        outcome.saved,
        migration.migrated,
        migration.total
    );

    telemetry.shutdown();
    Ok(())
}
