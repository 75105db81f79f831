use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::QuizSettings;
use crate::error::PipelineError;
use crate::metrics::QUESTIONS_SAVED_TOTAL;
use crate::models::Candidate;
use crate::services::question_generator::QuestionGenerator;
use crate::services::storage::StorageGateway;
use crate::services::worker::{Job, JobQueue};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub saved: usize,
    /// Ids of the questions inserted by this call, in candidate order.
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SupplyReport {
    pub requested: usize,
    pub generated: usize,
    pub saved: usize,
}

/// Upserts candidates keyed on `answer`, ignoring duplicates. Incomplete
/// candidates are skipped and a failed insert does not stop the batch.
pub async fn persist(storage: &dyn StorageGateway, candidates: &[Candidate]) -> PersistOutcome {
    let mut outcome = PersistOutcome::default();

    for candidate in candidates {
        if !candidate.is_complete() {
            warn!(?candidate, "Skipping incomplete candidate");
            continue;
        }

        match storage
            .insert_question_if_absent(candidate, Utc::now())
            .await
        {
            Ok(Some(id)) => {
                QUESTIONS_SAVED_TOTAL.inc();
                outcome.saved += 1;
                outcome.ids.push(id);
            }
            Ok(None) => {
                info!(answer = %candidate.answer, "Question already exists, skipping");
            }
            Err(err) => {
                let err = PipelineError::Persistence(format!("{:#}", err));
                warn!(answer = %candidate.answer, error = %err, "Failed to save question");
            }
        }
    }

    outcome
}

/// Keeps every user's pool of unanswered questions topped up.
pub struct SupplyController {
    storage: Arc<dyn StorageGateway>,
    generator: QuestionGenerator,
    jobs: JobQueue,
    settings: QuizSettings,
}

impl SupplyController {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        generator: QuestionGenerator,
        jobs: JobQueue,
        settings: QuizSettings,
    ) -> Self {
        Self {
            storage,
            generator,
            jobs,
            settings,
        }
    }

    /// Runs a generation cycle when the user is close to running out of
    /// questions. Returns `None` when no cycle was needed or the counts could
    /// not be read.
    pub async fn ensure_supply(&self, user_id: &str) -> Option<SupplyReport> {
        let remaining = match self.remaining_for(user_id).await {
            Ok(remaining) => remaining,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Failed to check question supply");
                return None;
            }
        };

        if remaining > self.settings.supply_threshold {
            return None;
        }

        info!(
            user_id = %user_id,
            remaining,
            batch = self.settings.supply_batch_size,
            "Question supply low, generating"
        );
        Some(
            self.generate_and_persist(self.settings.supply_batch_size)
                .await,
        )
    }

    async fn remaining_for(&self, user_id: &str) -> Result<u64, PipelineError> {
        let total = self
            .storage
            .count_questions()
            .await
            .map_err(|err| PipelineError::Storage(format!("{:#}", err)))?;
        let answered = self
            .storage
            .count_answers(Some(user_id))
            .await
            .map_err(|err| PipelineError::Storage(format!("{:#}", err)))?;
        Ok(total.saturating_sub(answered))
    }

    pub async fn persist(&self, candidates: &[Candidate]) -> PersistOutcome {
        persist(self.storage.as_ref(), candidates).await
    }

    /// Generates `count` candidates, persists them and schedules migration of
    /// the newly inserted images.
    pub async fn generate_and_persist(&self, count: usize) -> SupplyReport {
        let candidates = self.generator.generate_batch(count).await;
        let outcome = self.persist(&candidates).await;

        if !outcome.ids.is_empty() {
            self.jobs.enqueue(Job::MigrateImages {
                ids: outcome.ids.clone(),
            });
        }

        let report = SupplyReport {
            requested: count,
            generated: candidates.len(),
            saved: outcome.saved,
        };
        info!(
            requested = report.requested,
            generated = report.generated,
            saved = report.saved,
            "Generation cycle finished"
        );
        report
    }
}
