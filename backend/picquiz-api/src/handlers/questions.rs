use axum::{extract::State, response::IntoResponse, Extension, Json};
use std::sync::Arc;

use super::ApiError;
use crate::{models::QuizSession, services::AppState};

/// GET /api/questions/next - Pinned question or a random unanswered one
pub async fn next_question(
    State(state): State<Arc<AppState>>,
    Extension(mut session): Extension<QuizSession>,
) -> Result<impl IntoResponse, ApiError> {
    let (next, patch) = state
        .questions
        .next_question(&session)
        .await
        .map_err(ApiError::internal)?;

    if session.apply(patch) {
        state
            .sessions
            .save(&session)
            .await
            .map_err(ApiError::internal)?;
    }

    Ok(Json(next))
}
