use axum::{body::Bytes, extract::State, response::IntoResponse, Json};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::ApiError;
use crate::services::AppState;

pub const DEFAULT_GENERATE_COUNT: usize = 5;
pub const MAX_GENERATE_COUNT: usize = 20;

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub count: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MigrateRequest {
    #[serde(default)]
    pub ids: Option<Vec<String>>,
}

/// Accepts numbers or numeric strings; anything unusable or zero falls back
/// to the default. The result is clamped to `1..=MAX_GENERATE_COUNT`.
pub fn requested_count(count: Option<&Value>) -> usize {
    let requested = match count {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite() && *n != 0.0)
    .unwrap_or(DEFAULT_GENERATE_COUNT as f64);

    requested.floor().clamp(1.0, MAX_GENERATE_COUNT as f64) as usize
}

/// Optional JSON body: empty means defaults.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ApiError::bad_request(format!("Failed to parse JSON request body: {}", e))
            .with_code("INVALID_JSON")
    })
}

/// GET /api/admin/health - Table counts
pub async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let questions = state
        .storage
        .count_questions()
        .await
        .map_err(ApiError::internal)?;
    let users = state
        .storage
        .count_users()
        .await
        .map_err(ApiError::internal)?;
    let answers = state
        .storage
        .count_answers(None)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "ok": true,
        "timestamp": Utc::now().to_rfc3339(),
        "counts": {
            "questions": questions,
            "users": users,
            "answers": answers,
        },
        "server": {
            "environment": state.config.app_env,
        }
    })))
}

/// POST /api/admin/generate - Synchronous generation cycle
pub async fn generate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: GenerateRequest = optional_body(&body)?;
    let count = requested_count(req.count.as_ref());

    tracing::info!(count, "Admin triggered question generation");
    let report = state.supply.generate_and_persist(count).await;

    Ok(Json(json!({
        "ok": true,
        "requested": report.requested,
        "generated": report.generated,
        "saved": report.saved,
    })))
}

/// POST /api/admin/migrate - Synchronous image migration pass
pub async fn migrate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: MigrateRequest = optional_body(&body)?;

    tracing::info!(ids = ?req.ids, "Admin triggered image migration");
    let report = state.migrator.migrate_pending(req.ids.as_deref()).await;

    Ok(Json(json!({
        "ok": true,
        "migrated": report.migrated,
        "total": report.total,
    })))
}
