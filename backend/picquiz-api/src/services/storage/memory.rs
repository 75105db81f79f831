use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{ObjectStore, StorageGateway, UploadOptions};
use crate::models::{user::User, Candidate, Question, UserAnswer};

#[derive(Default)]
struct Tables {
    questions: Vec<Question>,
    answers: Vec<UserAnswer>,
    users: Vec<User>,
}

/// Process-local tables with the same uniqueness rules as the Mongo indexes.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a question directly, bypassing deduplication.
    pub async fn seed_question(&self, image_url: &str, answer: &str) -> Question {
        let question = Question {
            id: new_id(),
            image_url: image_url.to_string(),
            answer: answer.to_string(),
            created_at: Utc::now(),
        };
        self.tables.write().await.questions.push(question.clone());
        question
    }

    pub async fn questions(&self) -> Vec<Question> {
        self.tables.read().await.questions.clone()
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[async_trait]
impl StorageGateway for InMemoryStorage {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn count_questions(&self) -> Result<u64> {
        Ok(self.tables.read().await.questions.len() as u64)
    }

    async fn find_question(&self, id: &str) -> Result<Option<Question>> {
        let tables = self.tables.read().await;
        Ok(tables.questions.iter().find(|q| q.id == id).cloned())
    }

    async fn list_questions_excluding(
        &self,
        exclude: &[String],
        limit: usize,
    ) -> Result<Vec<Question>> {
        let tables = self.tables.read().await;
        Ok(tables
            .questions
            .iter()
            .filter(|q| !exclude.contains(&q.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_question_if_absent(
        &self,
        candidate: &Candidate,
        created_at: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let mut tables = self.tables.write().await;
        if tables.questions.iter().any(|q| q.answer == candidate.answer) {
            return Ok(None);
        }

        let id = new_id();
        tables.questions.push(Question {
            id: id.clone(),
            image_url: candidate.image_url.clone(),
            answer: candidate.answer.clone(),
            created_at,
        });
        Ok(Some(id))
    }

    async fn list_unmigrated(
        &self,
        marker: &str,
        ids: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Question>> {
        let tables = self.tables.read().await;
        Ok(tables
            .questions
            .iter()
            .filter(|q| !q.image_url.contains(marker))
            .filter(|q| ids.map_or(true, |ids| ids.contains(&q.id)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_image_url(&self, id: &str, image_url: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.questions.iter_mut().find(|q| q.id == id) {
            Some(question) => {
                question.image_url = image_url.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_answers(&self, user_id: Option<&str>) -> Result<u64> {
        let tables = self.tables.read().await;
        let count = tables
            .answers
            .iter()
            .filter(|a| user_id.map_or(true, |user_id| a.user_id == user_id))
            .count();
        Ok(count as u64)
    }

    async fn answers_for_user(&self, user_id: &str) -> Result<Vec<UserAnswer>> {
        let tables = self.tables.read().await;
        Ok(tables
            .answers
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_answer(&self, user_id: &str, question_id: &str) -> Result<Option<UserAnswer>> {
        let tables = self.tables.read().await;
        Ok(tables
            .answers
            .iter()
            .find(|a| a.user_id == user_id && a.question_id == question_id)
            .cloned())
    }

    async fn insert_answer(&self, answer: &UserAnswer) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let duplicate = tables
            .answers
            .iter()
            .any(|a| a.user_id == answer.user_id && a.question_id == answer.question_id);
        if duplicate {
            return Ok(false);
        }
        tables.answers.push(answer.clone());
        Ok(true)
    }

    async fn count_users(&self) -> Result<u64> {
        Ok(self.tables.read().await.users.len() as u64)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert_user(
        &self,
        email: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|u| u.email == email) {
            return Ok(None);
        }

        let user = User {
            id: new_id(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at,
        };
        tables.users.push(user.clone());
        Ok(Some(user))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub options: UploadOptions,
}

pub struct InMemoryObjectStore {
    public_base: String,
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new(public_base: impl Into<String>) -> Self {
        Self {
            public_base: public_base.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>, options: &UploadOptions) -> Result<()> {
        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                bytes,
                options: options.clone(),
            },
        );
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key.trim_start_matches('/'))
    }
}
