use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    #[serde(default)]
    pub question_id: String,
    #[serde(default)]
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerResponse {
    pub is_correct: bool,
    pub correct_answer: String,
}

/// Per-user totals reported on logout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerStatistics {
    pub total_answered: u64,
    pub correct_count: u64,
    pub wrong_count: u64,
    pub accuracy: String,
}

impl AnswerStatistics {
    pub fn from_counts(total_answered: u64, correct_count: u64) -> Self {
        let accuracy = if total_answered > 0 {
            ((correct_count as f64 / total_answered as f64) * 100.0).round() as u64
        } else {
            0
        };

        Self {
            total_answered,
            correct_count,
            wrong_count: total_answered.saturating_sub(correct_count),
            accuracy: format!("{}%", accuracy),
        }
    }
}
