use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use rand::seq::IndexedRandom;
use tracing::debug;

use crate::metrics::QUESTIONS_SERVED_TOTAL;
use crate::models::{NextQuestion, QuestionView, QuizSession, SessionPatch};
use crate::services::storage::StorageGateway;
use crate::services::worker::{Job, JobQueue};

/// Picks the next unanswered question for a session. The caller owns the
/// session and applies the returned [`SessionPatch`].
pub struct QuestionServer {
    storage: Arc<dyn StorageGateway>,
    jobs: JobQueue,
    page_size: usize,
}

impl QuestionServer {
    pub fn new(storage: Arc<dyn StorageGateway>, jobs: JobQueue, page_size: usize) -> Self {
        Self {
            storage,
            jobs,
            page_size,
        }
    }

    pub async fn next_question(
        &self,
        session: &QuizSession,
    ) -> Result<(NextQuestion, SessionPatch)> {
        self.jobs.enqueue(Job::EnsureSupply {
            user_id: session.user_id.clone(),
        });

        let answered: HashSet<String> = self
            .storage
            .answers_for_user(&session.user_id)
            .await?
            .into_iter()
            .map(|answer| answer.question_id)
            .collect();

        if let Some(current) = session
            .current_question_id
            .as_deref()
            .filter(|id| !answered.contains(*id))
        {
            if let Some(question) = self.storage.find_question(current).await? {
                debug!(question_id = %question.id, "Serving pinned question");
                QUESTIONS_SERVED_TOTAL.with_label_values(&["pinned"]).inc();
                return Ok((
                    NextQuestion::Question(QuestionView::from(&question)),
                    SessionPatch::Unchanged,
                ));
            }
        }

        let exclude: Vec<String> = answered.into_iter().collect();
        let page = self
            .storage
            .list_questions_excluding(&exclude, self.page_size)
            .await?;

        match page.choose(&mut rand::rng()) {
            Some(question) => {
                QUESTIONS_SERVED_TOTAL.with_label_values(&["picked"]).inc();
                Ok((
                    NextQuestion::Question(QuestionView::from(question)),
                    SessionPatch::Pin(question.id.clone()),
                ))
            }
            None => {
                QUESTIONS_SERVED_TOTAL.with_label_values(&["exhausted"]).inc();
                Ok((NextQuestion::no_question(), SessionPatch::Clear))
            }
        }
    }
}
