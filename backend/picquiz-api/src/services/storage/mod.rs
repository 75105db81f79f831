//! Storage gateway: the table and object APIs the quiz relies on.
//!
//! Production uses MongoDB for tables and an S3-compatible bucket for
//! objects; the in-memory backends serve tests and local development.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{user::User, Candidate, Question, UserAnswer};

pub mod memory;
pub mod mongo;

pub use memory::{InMemoryObjectStore, InMemoryStorage};
pub use mongo::MongoStorage;

#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn count_questions(&self) -> Result<u64>;

    async fn find_question(&self, id: &str) -> Result<Option<Question>>;

    /// Up to `limit` questions whose id is not in `exclude`, oldest first.
    async fn list_questions_excluding(&self, exclude: &[String], limit: usize)
        -> Result<Vec<Question>>;

    /// Upsert-ignore keyed on `answer`. Returns the new id, or `None` when a
    /// question with the same answer already exists.
    async fn insert_question_if_absent(
        &self,
        candidate: &Candidate,
        created_at: DateTime<Utc>,
    ) -> Result<Option<String>>;

    /// Up to `limit` questions whose `image_url` does not contain `marker`,
    /// optionally restricted to `ids`.
    async fn list_unmigrated(
        &self,
        marker: &str,
        ids: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Question>>;

    /// Returns `false` when the question no longer exists.
    async fn update_image_url(&self, id: &str, image_url: &str) -> Result<bool>;

    /// Counts answers, for one user or for everyone.
    async fn count_answers(&self, user_id: Option<&str>) -> Result<u64>;

    async fn answers_for_user(&self, user_id: &str) -> Result<Vec<UserAnswer>>;

    async fn find_answer(&self, user_id: &str, question_id: &str) -> Result<Option<UserAnswer>>;

    /// Returns `false` when the `(user_id, question_id)` pair is already recorded.
    async fn insert_answer(&self, answer: &UserAnswer) -> Result<bool>;

    async fn count_users(&self) -> Result<u64>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Returns `None` when the email is already registered.
    async fn insert_user(
        &self,
        email: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Option<User>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: String,
    pub cache_control: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, key: &str, bytes: Vec<u8>, options: &UploadOptions) -> Result<()>;

    fn public_url(&self, key: &str) -> String;
}
