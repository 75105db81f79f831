use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime as BsonDateTime, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use super::StorageGateway;
use crate::models::{user::User, Candidate, Question, UserAnswer};
use crate::utils::time::{bson_to_chrono, chrono_to_bson};

const QUESTIONS: &str = "questions";
const USER_ANSWERS: &str = "user_answers";
const USERS: &str = "users";

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Serialize, Deserialize)]
struct QuestionDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    image_url: String,
    answer: String,
    created_at: BsonDateTime,
}

impl From<QuestionDocument> for Question {
    fn from(doc: QuestionDocument) -> Self {
        Self {
            id: doc.id.to_hex(),
            image_url: doc.image_url,
            answer: doc.answer,
            created_at: bson_to_chrono(doc.created_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AnswerDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    user_id: String,
    question_id: String,
    is_correct: bool,
    created_at: BsonDateTime,
}

impl From<AnswerDocument> for UserAnswer {
    fn from(doc: AnswerDocument) -> Self {
        Self {
            user_id: doc.user_id,
            question_id: doc.question_id,
            is_correct: doc.is_correct,
            created_at: bson_to_chrono(doc.created_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    email: String,
    password_hash: String,
    created_at: BsonDateTime,
}

impl From<UserDocument> for User {
    fn from(doc: UserDocument) -> Self {
        Self {
            id: doc.id.to_hex(),
            email: doc.email,
            password_hash: doc.password_hash,
            created_at: bson_to_chrono(doc.created_at),
        }
    }
}

/// MongoDB-backed tables. Uniqueness is enforced by the indexes created in
/// [`MongoStorage::ensure_indexes`].
#[derive(Clone)]
pub struct MongoStorage {
    db: Database,
}

impl MongoStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn questions(&self) -> Collection<QuestionDocument> {
        self.db.collection(QUESTIONS)
    }

    fn answers(&self) -> Collection<AnswerDocument> {
        self.db.collection(USER_ANSWERS)
    }

    fn users(&self) -> Collection<UserDocument> {
        self.db.collection(USERS)
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.questions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "answer": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .context("Failed to create questions.answer index")?;

        self.answers()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "question_id": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .context("Failed to create user_answers index")?;

        self.users()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .context("Failed to create users.email index")?;

        Ok(())
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

fn object_ids(ids: &[String]) -> Vec<Bson> {
    ids.iter()
        .filter_map(|id| ObjectId::parse_str(id).ok())
        .map(Bson::ObjectId)
        .collect()
}

#[async_trait]
impl StorageGateway for MongoStorage {
    async fn ping(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }

    async fn count_questions(&self) -> Result<u64> {
        self.questions()
            .count_documents(doc! {})
            .await
            .context("Failed to count questions")
    }

    async fn find_question(&self, id: &str) -> Result<Option<Question>> {
        let Ok(object_id) = ObjectId::parse_str(id) else {
            return Ok(None);
        };
        let question = self
            .questions()
            .find_one(doc! { "_id": object_id })
            .await
            .context("Failed to load question")?;
        Ok(question.map(Question::from))
    }

    async fn list_questions_excluding(
        &self,
        exclude: &[String],
        limit: usize,
    ) -> Result<Vec<Question>> {
        let filter = doc! { "_id": { "$nin": object_ids(exclude) } };
        let docs: Vec<QuestionDocument> = self
            .questions()
            .find(filter)
            .sort(doc! { "created_at": 1 })
            .limit(limit as i64)
            .await
            .context("Failed to query questions")?
            .try_collect()
            .await
            .context("Failed to read questions cursor")?;
        Ok(docs.into_iter().map(Question::from).collect())
    }

    async fn insert_question_if_absent(
        &self,
        candidate: &Candidate,
        created_at: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let update = doc! {
            "$setOnInsert": {
                "image_url": &candidate.image_url,
                "created_at": chrono_to_bson(created_at),
            }
        };
        let result = self
            .questions()
            .update_one(doc! { "answer": &candidate.answer }, update)
            .upsert(true)
            .await;

        match result {
            Ok(outcome) => Ok(outcome
                .upserted_id
                .and_then(|id| id.as_object_id())
                .map(|id| id.to_hex())),
            // Concurrent upsert of the same answer lost the race.
            Err(err) if is_duplicate_key(&err) => Ok(None),
            Err(err) => Err(err).context("Failed to upsert question"),
        }
    }

    async fn list_unmigrated(
        &self,
        marker: &str,
        ids: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Question>> {
        let mut filter = Document::new();
        filter.insert(
            "image_url",
            doc! { "$not": { "$regex": regex::escape(marker) } },
        );
        if let Some(ids) = ids {
            filter.insert("_id", doc! { "$in": object_ids(ids) });
        }

        let docs: Vec<QuestionDocument> = self
            .questions()
            .find(filter)
            .sort(doc! { "created_at": 1 })
            .limit(limit as i64)
            .await
            .context("Failed to query unmigrated questions")?
            .try_collect()
            .await
            .context("Failed to read questions cursor")?;
        Ok(docs.into_iter().map(Question::from).collect())
    }

    async fn update_image_url(&self, id: &str, image_url: &str) -> Result<bool> {
        let object_id = ObjectId::parse_str(id).context("Invalid question ID format")?;
        let result = self
            .questions()
            .update_one(
                doc! { "_id": object_id },
                doc! { "$set": { "image_url": image_url } },
            )
            .await
            .context("Failed to update image_url")?;
        Ok(result.matched_count > 0)
    }

    async fn count_answers(&self, user_id: Option<&str>) -> Result<u64> {
        let filter = match user_id {
            Some(user_id) => doc! { "user_id": user_id },
            None => doc! {},
        };
        self.answers()
            .count_documents(filter)
            .await
            .context("Failed to count answers")
    }

    async fn answers_for_user(&self, user_id: &str) -> Result<Vec<UserAnswer>> {
        let docs: Vec<AnswerDocument> = self
            .answers()
            .find(doc! { "user_id": user_id })
            .await
            .context("Failed to query answers")?
            .try_collect()
            .await
            .context("Failed to read answers cursor")?;
        Ok(docs.into_iter().map(UserAnswer::from).collect())
    }

    async fn find_answer(&self, user_id: &str, question_id: &str) -> Result<Option<UserAnswer>> {
        let answer = self
            .answers()
            .find_one(doc! { "user_id": user_id, "question_id": question_id })
            .await
            .context("Failed to load answer")?;
        Ok(answer.map(UserAnswer::from))
    }

    async fn insert_answer(&self, answer: &UserAnswer) -> Result<bool> {
        let document = AnswerDocument {
            id: None,
            user_id: answer.user_id.clone(),
            question_id: answer.question_id.clone(),
            is_correct: answer.is_correct,
            created_at: chrono_to_bson(answer.created_at),
        };
        match self.answers().insert_one(document).await {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(err) => Err(err).context("Failed to insert answer"),
        }
    }

    async fn count_users(&self) -> Result<u64> {
        self.users()
            .count_documents(doc! {})
            .await
            .context("Failed to count users")
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .users()
            .find_one(doc! { "email": email })
            .await
            .context("Failed to load user")?;
        Ok(user.map(User::from))
    }

    async fn insert_user(
        &self,
        email: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let document = UserDocument {
            id: ObjectId::new(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: chrono_to_bson(created_at),
        };
        let user = User {
            id: document.id.to_hex(),
            email: document.email.clone(),
            password_hash: document.password_hash.clone(),
            created_at: bson_to_chrono(document.created_at),
        };

        match self.users().insert_one(document).await {
            Ok(_) => Ok(Some(user)),
            Err(err) if is_duplicate_key(&err) => Ok(None),
            Err(err) => Err(err).context("Failed to insert user"),
        }
    }
}
