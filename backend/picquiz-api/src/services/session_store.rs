use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;

use crate::metrics::track_cache_operation;
use crate::models::QuizSession;

/// Per-user session bag. Keyed by user id so a re-login keeps the pinned
/// question.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<QuizSession>>;

    async fn save(&self, session: &QuizSession) -> Result<()>;

    async fn destroy(&self, user_id: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

fn session_key(user_id: &str) -> String {
    format!("quiz:session:{}", user_id)
}

pub struct RedisSessionStore {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl RedisSessionStore {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, user_id: &str) -> Result<Option<QuizSession>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(session_key(user_id))
                .query_async(&mut conn)
                .await
                .context("Failed to load session from Redis")
        })
        .await?;

        raw.map(|json| serde_json::from_str(&json).context("Corrupted session payload"))
            .transpose()
    }

    async fn save(&self, session: &QuizSession) -> Result<()> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(session)?;
        track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(session_key(&session.user_id))
                .arg(self.ttl_secs)
                .arg(payload)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to save session to Redis")
        })
        .await
    }

    async fn destroy(&self, user_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        track_cache_operation("del", async {
            redis::cmd("DEL")
                .arg(session_key(user_id))
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to delete session from Redis")
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Redis ping failed")?;
        Ok(())
    }
}

/// Session store without expiry, for tests and the in-memory backend.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, QuizSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, user_id: &str) -> Result<Option<QuizSession>> {
        Ok(self.sessions.read().await.get(user_id).cloned())
    }

    async fn save(&self, session: &QuizSession) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.user_id.clone(), session.clone());
        Ok(())
    }

    async fn destroy(&self, user_id: &str) -> Result<()> {
        self.sessions.write().await.remove(user_id);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
