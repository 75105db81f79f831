use axum::{extract::State, response::IntoResponse, Extension, Json};
use std::sync::Arc;

use super::ApiError;
use crate::{
    extractors::AppJson,
    models::{answer::SubmitAnswerRequest, QuizSession},
    services::{
        answer_service::{AnswerError, AnswerService},
        AppState,
    },
};

impl From<AnswerError> for ApiError {
    fn from(err: AnswerError) -> Self {
        match err {
            AnswerError::MissingFields => {
                ApiError::bad_request(err.to_string()).with_code("MISSING_FIELDS")
            }
            AnswerError::QuestionNotFound => {
                ApiError::not_found(err.to_string(), "QUESTION_NOT_FOUND")
            }
            AnswerError::AlreadyAnswered => {
                ApiError::bad_request(err.to_string()).with_code("ALREADY_ANSWERED")
            }
            AnswerError::Storage(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

/// POST /api/answers/submit - Check and record an answer
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(mut session): Extension<QuizSession>,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (response, patch) = AnswerService::new(state.storage.clone())
        .submit(&session, &req)
        .await?;

    if session.apply(patch) {
        state
            .sessions
            .save(&session)
            .await
            .map_err(ApiError::internal)?;
    }

    Ok(Json(response))
}
