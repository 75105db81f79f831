use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::metrics::ANSWERS_SUBMITTED_TOTAL;
use crate::models::answer::{AnswerStatistics, SubmitAnswerRequest, SubmitAnswerResponse};
use crate::models::{QuizSession, SessionPatch, UserAnswer};
use crate::services::storage::StorageGateway;

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("questionId and answer are required")]
    MissingFields,
    #[error("question not found")]
    QuestionNotFound,
    #[error("question already answered")]
    AlreadyAnswered,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Case-insensitive comparison ignoring surrounding whitespace.
pub fn is_correct(submitted: &str, expected: &str) -> bool {
    submitted.trim().to_lowercase() == expected.trim().to_lowercase()
}

pub struct AnswerService {
    storage: Arc<dyn StorageGateway>,
}

impl AnswerService {
    pub fn new(storage: Arc<dyn StorageGateway>) -> Self {
        Self { storage }
    }

    pub async fn submit(
        &self,
        session: &QuizSession,
        req: &SubmitAnswerRequest,
    ) -> Result<(SubmitAnswerResponse, SessionPatch), AnswerError> {
        let question_id = req.question_id.trim();
        if question_id.is_empty() || req.answer.trim().is_empty() {
            return Err(AnswerError::MissingFields);
        }

        let question = self
            .storage
            .find_question(question_id)
            .await?
            .ok_or(AnswerError::QuestionNotFound)?;

        if self
            .storage
            .find_answer(&session.user_id, &question.id)
            .await?
            .is_some()
        {
            return Err(AnswerError::AlreadyAnswered);
        }

        let correct = is_correct(&req.answer, &question.answer);
        let recorded = self
            .storage
            .insert_answer(&UserAnswer {
                user_id: session.user_id.clone(),
                question_id: question.id.clone(),
                is_correct: correct,
                created_at: Utc::now(),
            })
            .await?;
        if !recorded {
            // Lost a race with a concurrent submission of the same question.
            return Err(AnswerError::AlreadyAnswered);
        }

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if correct { "true" } else { "false" }])
            .inc();
        tracing::info!(
            user_id = %session.user_id,
            question_id = %question.id,
            correct,
            "Answer recorded"
        );

        let patch = if session.current_question_id.as_deref() == Some(question.id.as_str()) {
            SessionPatch::Clear
        } else {
            SessionPatch::Unchanged
        };

        Ok((
            SubmitAnswerResponse {
                is_correct: correct,
                correct_answer: question.answer,
            },
            patch,
        ))
    }

    pub async fn statistics(&self, user_id: &str) -> anyhow::Result<AnswerStatistics> {
        let answers = self.storage.answers_for_user(user_id).await?;
        let correct = answers.iter().filter(|answer| answer.is_correct).count();
        Ok(AnswerStatistics::from_counts(
            answers.len() as u64,
            correct as u64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::InMemoryStorage;

    fn request(question_id: &str, answer: &str) -> SubmitAnswerRequest {
        SubmitAnswerRequest {
            question_id: question_id.into(),
            answer: answer.into(),
        }
    }

    #[test]
    fn comparison_ignores_case_and_whitespace() {
        assert!(is_correct("Cat ", "cat"));
        assert!(is_correct("  DOG", "dog  "));
        assert!(!is_correct("cats", "cat"));
    }

    #[tokio::test]
    async fn submit_records_once_and_clears_matching_pin() {
        let storage = Arc::new(InMemoryStorage::new());
        let question = storage.seed_question("https://tmp/1.png", "cat").await;
        let service = AnswerService::new(storage.clone());
        let mut session = QuizSession::new("u1", "u1@example.com");
        session.current_question_id = Some(question.id.clone());

        let (response, patch) = service
            .submit(&session, &request(&question.id, "Cat "))
            .await
            .unwrap();
        assert!(response.is_correct);
        assert_eq!(response.correct_answer, "cat");
        assert_eq!(patch, SessionPatch::Clear);

        let again = service.submit(&session, &request(&question.id, "cat")).await;
        assert!(matches!(again, Err(AnswerError::AlreadyAnswered)));
        assert_eq!(storage.count_answers(Some("u1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn submit_validates_input_and_question() {
        let storage = Arc::new(InMemoryStorage::new());
        let service = AnswerService::new(storage);
        let session = QuizSession::new("u1", "u1@example.com");

        assert!(matches!(
            service.submit(&session, &request("", "cat")).await,
            Err(AnswerError::MissingFields)
        ));
        assert!(matches!(
            service.submit(&session, &request("missing", "cat")).await,
            Err(AnswerError::QuestionNotFound)
        ));
    }

    #[tokio::test]
    async fn statistics_count_correct_and_wrong() {
        let storage = Arc::new(InMemoryStorage::new());
        let q1 = storage.seed_question("https://tmp/1.png", "cat").await;
        let q2 = storage.seed_question("https://tmp/2.png", "dog").await;
        let q3 = storage.seed_question("https://tmp/3.png", "fox").await;
        let service = AnswerService::new(storage);
        let session = QuizSession::new("u1", "u1@example.com");

        service.submit(&session, &request(&q1.id, "cat")).await.unwrap();
        service.submit(&session, &request(&q2.id, "dog")).await.unwrap();
        service.submit(&session, &request(&q3.id, "wolf")).await.unwrap();

        let stats = service.statistics("u1").await.unwrap();
        assert_eq!(stats.total_answered, 3);
        assert_eq!(stats.correct_count, 2);
        assert_eq!(stats.wrong_count, 1);
        assert_eq!(stats.accuracy, "67%");
    }
}
