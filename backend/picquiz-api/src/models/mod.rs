use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod answer;
pub mod user;

pub const NO_QUESTION_CODE: &str = "NO_QUESTION";

/// A stored picture question. `answer` is unique across the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub image_url: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

/// A generated `{image_url, answer}` pair that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub image_url: String,
    pub answer: String,
}

impl Candidate {
    pub fn new(image_url: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            answer: answer.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.image_url.trim().is_empty() && !self.answer.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAnswer {
    pub user_id: String,
    pub question_id: String,
    pub is_correct: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-user session bag kept in the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSession {
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub current_question_id: Option<String>,
}

impl QuizSession {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            current_question_id: None,
        }
    }

    /// Applies a patch and reports whether anything changed.
    pub fn apply(&mut self, patch: SessionPatch) -> bool {
        let next = match patch {
            SessionPatch::Unchanged => return false,
            SessionPatch::Pin(id) => Some(id),
            SessionPatch::Clear => None,
        };
        if self.current_question_id == next {
            return false;
        }
        self.current_question_id = next;
        true
    }
}

/// Change to the pinned question requested by the question server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPatch {
    Unchanged,
    Pin(String),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionView {
    pub id: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            image_url: question.image_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NextQuestion {
    Question(QuestionView),
    Exhausted { code: &'static str },
}

impl NextQuestion {
    pub fn no_question() -> Self {
        NextQuestion::Exhausted {
            code: NO_QUESTION_CODE,
        }
    }

    pub fn question_id(&self) -> Option<&str> {
        match self {
            NextQuestion::Question(view) => Some(&view.id),
            NextQuestion::Exhausted { .. } => None,
        }
    }
}
