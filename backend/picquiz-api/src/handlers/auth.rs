use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::ApiError;
use crate::{
    extractors::AppJson,
    middlewares::auth::{JwtService, SESSION_COOKIE},
    models::{
        user::{normalize_email, AuthResponse, LoginRequest, RegisterRequest, UserSummary},
        QuizSession,
    },
    services::{
        answer_service::AnswerService,
        auth_service::{AuthError, AuthService, SignedIn},
        AppState,
    },
};

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.storage.clone(),
        state.sessions.clone(),
        JwtService::new(&state.config.jwt_secret),
        state.config.session_ttl_secs,
        state.config.bcrypt_cost,
    )
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(state.config.cookie_secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(state.config.session_ttl_secs as i64))
        .build()
}

fn signed_in_response(
    state: &AppState,
    jar: CookieJar,
    signed_in: SignedIn,
    message: &str,
) -> (CookieJar, Json<AuthResponse>) {
    let jar = jar.add(session_cookie(state, signed_in.token.clone()));
    let body = AuthResponse {
        message: message.to_string(),
        user: UserSummary::from(&signed_in.user),
        token: signed_in.token,
    };
    (jar, Json(body))
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::EmailTaken => {
                ApiError::bad_request(err.to_string()).with_code("EMAIL_TAKEN")
            }
            AuthError::UserNotFound => ApiError::not_found(err.to_string(), "USER_NOT_FOUND"),
            AuthError::InvalidPassword => {
                ApiError::unauthorized(err.to_string(), "INVALID_PASSWORD")
            }
            AuthError::Internal(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

/// POST /api/auth/register - Register a new user
pub async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    AppJson(mut req): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.email = normalize_email(&req.email);
    if let Err(e) = req.validate() {
        return Err(ApiError::bad_request(format!("Validation error: {}", e))
            .with_code("VALIDATION_ERROR"));
    }

    let signed_in = auth_service(&state).register(&req).await?;
    let (jar, body) = signed_in_response(&state, jar, signed_in, "Registered");
    Ok((StatusCode::CREATED, jar, body))
}

/// POST /api/auth/login - Login with email and password
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    AppJson(mut req): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.email = normalize_email(&req.email);
    if let Err(e) = req.validate() {
        return Err(ApiError::bad_request(format!("Validation error: {}", e))
            .with_code("VALIDATION_ERROR"));
    }

    let signed_in = auth_service(&state).login(&req).await?;
    Ok(signed_in_response(&state, jar, signed_in, "Logged in"))
}

/// POST /api/auth/logout - Report statistics and end the session
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<QuizSession>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let statistics = AnswerService::new(state.storage.clone())
        .statistics(&session.user_id)
        .await
        .map_err(ApiError::internal)?;

    auth_service(&state)
        .logout(&session.user_id)
        .await
        .map_err(ApiError::internal)?;

    // Expire the cookie even when the client authenticated with a bearer token.
    let jar = jar.add(
        Cookie::build((SESSION_COOKIE, ""))
            .path("/")
            .http_only(true)
            .max_age(time::Duration::ZERO)
            .build(),
    );
    Ok((
        jar,
        Json(json!({
            "message": "Logged out",
            "statistics": statistics,
        })),
    ))
}

/// GET /api/auth/me - Current session
pub async fn me(Extension(session): Extension<QuizSession>) -> impl IntoResponse {
    Json(json!({
        "user": { "id": session.user_id, "email": session.email },
        "currentQuestionId": session.current_question_id,
    }))
}
