use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use rand::Rng;
use reqwest::{header::LOCATION, redirect, Client};
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::config::MigrationSettings;
use crate::error::PipelineError;
use crate::metrics::IMAGES_MIGRATED_TOTAL;
use crate::services::storage::{ObjectStore, StorageGateway, UploadOptions};

const KEY_SUFFIX_LEN: usize = 6;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub total: usize,
}

/// Copies generated images from their temporary URLs into the bucket and
/// rewrites `image_url` to the permanent location.
pub struct ImageMigrator {
    http: Client,
    storage: Arc<dyn StorageGateway>,
    objects: Arc<dyn ObjectStore>,
    settings: MigrationSettings,
    marker: String,
}

impl ImageMigrator {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        objects: Arc<dyn ObjectStore>,
        settings: MigrationSettings,
        marker: String,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .context("Failed to build image download client")?;

        Ok(Self {
            http,
            storage,
            objects,
            settings,
            marker,
        })
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Downloads `url` and stores it in the bucket, returning the public URL.
    /// The download timeout covers the whole redirect chain.
    pub async fn migrate(&self, url: &str) -> Result<String, PipelineError> {
        let limit = self.settings.download_timeout();
        let bytes = tokio::time::timeout(limit, self.download(url))
            .await
            .map_err(|_| PipelineError::Timeout(limit))??;
        let key = object_key(Utc::now().timestamp_millis());
        let options = UploadOptions {
            content_type: self.settings.content_type.clone(),
            cache_control: self.settings.cache_control.clone(),
        };

        self.objects
            .upload(&key, bytes, &options)
            .await
            .map_err(|err| PipelineError::Upload(format!("{:#}", err)))?;

        Ok(self.objects.public_url(&key))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        let mut current =
            Url::parse(url).map_err(|err| PipelineError::Download(format!("{}: {}", url, err)))?;
        let mut redirects = 0;

        loop {
            if !matches!(current.scheme(), "http" | "https") {
                return Err(PipelineError::Download(format!(
                    "unsupported scheme: {}",
                    current.scheme()
                )));
            }

            let response = self
                .http
                .get(current.clone())
                .send()
                .await
                .map_err(|err| self.download_error(err))?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| {
                        PipelineError::Download(format!("{} without Location from {}", status, current))
                    })?;

                redirects += 1;
                if redirects > self.settings.max_redirects {
                    return Err(PipelineError::Download(format!(
                        "too many redirects (limit {})",
                        self.settings.max_redirects
                    )));
                }

                current = current.join(location).map_err(|err| {
                    PipelineError::Download(format!("invalid redirect {}: {}", location, err))
                })?;
                continue;
            }

            if !status.is_success() {
                return Err(PipelineError::Download(format!(
                    "{} returned {}",
                    current, status
                )));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|err| self.download_error(err))?;
            return Ok(bytes.to_vec());
        }
    }

    fn download_error(&self, err: reqwest::Error) -> PipelineError {
        PipelineError::Download(err.to_string())
    }

    /// Migrates one page of questions still pointing at temporary URLs,
    /// optionally restricted to `ids`. Failures are logged per item.
    pub async fn migrate_pending(&self, ids: Option<&[String]>) -> MigrationReport {
        let ids = ids.filter(|ids| !ids.is_empty());
        let pending = match self
            .storage
            .list_unmigrated(&self.marker, ids, self.settings.page_size)
            .await
        {
            Ok(pending) => pending,
            Err(err) => {
                let err = PipelineError::Storage(format!("{:#}", err));
                warn!(error = %err, "Failed to select questions for migration");
                return MigrationReport::default();
            }
        };

        let mut report = MigrationReport {
            migrated: 0,
            total: pending.len(),
        };

        for question in pending {
            let permanent = match self.migrate(&question.image_url).await {
                Ok(url) => url,
                Err(err) => {
                    IMAGES_MIGRATED_TOTAL.with_label_values(&["failed"]).inc();
                    warn!(
                        question_id = %question.id,
                        kind = err.kind(),
                        error = %err,
                        "Image migration failed"
                    );
                    continue;
                }
            };

            match self.storage.update_image_url(&question.id, &permanent).await {
                Ok(true) => {
                    IMAGES_MIGRATED_TOTAL.with_label_values(&["migrated"]).inc();
                    report.migrated += 1;
                }
                Ok(false) => {
                    warn!(question_id = %question.id, "Question vanished before image_url update");
                }
                Err(err) => {
                    IMAGES_MIGRATED_TOTAL.with_label_values(&["failed"]).inc();
                    warn!(question_id = %question.id, error = %err, "Failed to update image_url");
                }
            }
        }

        info!(
            migrated = report.migrated,
            total = report.total,
            "Image migration pass finished"
        );
        report
    }
}

fn object_key(millis: i64) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..KEY_SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("questions/{}-{}.png", millis, suffix)
}
