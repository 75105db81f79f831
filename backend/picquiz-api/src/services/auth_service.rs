use std::sync::Arc;

use anyhow::Context;
use bcrypt::{hash, verify};
use chrono::Utc;
use thiserror::Error;

use crate::middlewares::auth::JwtService;
use crate::models::user::{normalize_email, LoginRequest, RegisterRequest, User};
use crate::models::QuizSession;
use crate::services::session_store::SessionStore;
use crate::services::storage::StorageGateway;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Email is already registered")]
    EmailTaken,
    #[error("User not found")]
    UserNotFound,
    #[error("Invalid password")]
    InvalidPassword,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// A signed-in user with a live session.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: User,
    pub token: String,
}

pub struct AuthService {
    storage: Arc<dyn StorageGateway>,
    sessions: Arc<dyn SessionStore>,
    jwt_service: JwtService,
    session_ttl_secs: u64,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        sessions: Arc<dyn SessionStore>,
        jwt_service: JwtService,
        session_ttl_secs: u64,
        bcrypt_cost: u32,
    ) -> Self {
        Self {
            storage,
            sessions,
            jwt_service,
            session_ttl_secs,
            bcrypt_cost,
        }
    }

    async fn hash_password(&self, password: &str) -> anyhow::Result<String> {
        let password = password.to_string();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .context("Password hashing task panicked")?
            .context("Failed to hash password")
    }

    async fn verify_password(&self, password: &str, password_hash: &str) -> anyhow::Result<bool> {
        let password = password.to_string();
        let password_hash = password_hash.to_string();
        tokio::task::spawn_blocking(move || verify(password, &password_hash))
            .await
            .context("Password verification task panicked")?
            .context("Failed to verify password")
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<SignedIn, AuthError> {
        let email = normalize_email(&req.email);

        if self.storage.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = self.hash_password(&req.password).await?;
        let user = self
            .storage
            .insert_user(&email, &password_hash, Utc::now())
            .await?
            .ok_or(AuthError::EmailTaken)?;

        tracing::info!(user_id = %user.id, "User registered");
        self.start_session(user, None).await
    }

    pub async fn login(&self, req: &LoginRequest) -> Result<SignedIn, AuthError> {
        let email = normalize_email(&req.email);
        let user = self
            .storage
            .find_user_by_email(&email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !self.verify_password(&req.password, &user.password_hash).await? {
            return Err(AuthError::InvalidPassword);
        }

        // Keep the pinned question from a previous login.
        let existing = self.sessions.load(&user.id).await?;
        tracing::info!(user_id = %user.id, resumed = existing.is_some(), "User logged in");
        self.start_session(user, existing).await
    }

    async fn start_session(
        &self,
        user: User,
        existing: Option<QuizSession>,
    ) -> Result<SignedIn, AuthError> {
        let session = existing.unwrap_or_else(|| QuizSession::new(&user.id, &user.email));
        self.sessions.save(&session).await?;

        let token = self
            .jwt_service
            .issue(&user.id, &user.email, self.session_ttl_secs)
            .map_err(|e| anyhow::anyhow!("Failed to issue token: {}", e))?;

        Ok(SignedIn { user, token })
    }

    pub async fn logout(&self, user_id: &str) -> anyhow::Result<()> {
        self.sessions.destroy(user_id).await?;
        tracing::info!(user_id = %user_id, "User logged out");
        Ok(())
    }
}
