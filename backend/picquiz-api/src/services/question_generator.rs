//! Client for the external workflow API that draws a picture and names it.
//!
//! Each workflow run yields at most one [`Candidate`]. Batches are exposed as a
//! lazy stream so callers can stop early; runs are paced to respect the
//! upstream rate limits.

use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::WorkflowSettings;
use crate::error::PipelineError;
use crate::metrics::{QUESTIONS_GENERATED_TOTAL, WORKFLOW_CALLS_TOTAL};
use crate::models::Candidate;

#[derive(Debug, Serialize)]
struct WorkflowRunRequest<'a> {
    workflow_id: &'a str,
    parameters: WorkflowParameters<'a>,
}

#[derive(Debug, Serialize)]
struct WorkflowParameters<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone)]
struct Credentials {
    api_key: String,
    workflow_id: String,
}

#[derive(Clone)]
pub struct QuestionGenerator {
    http: Client,
    settings: WorkflowSettings,
}

impl QuestionGenerator {
    pub fn new(settings: WorkflowSettings) -> Self {
        Self {
            http: Client::new(),
            settings,
        }
    }

    fn credentials(&self) -> Result<Credentials, PipelineError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("COZE_API_KEY is not set".into()))?;
        let workflow_id = self
            .settings
            .workflow_id
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("COZE_WORKFLOW_ID is not set".into()))?;

        Ok(Credentials {
            api_key: api_key.to_string(),
            workflow_id: workflow_id.to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    /// Lazily runs the workflow up to `count` times, yielding every candidate
    /// produced. Failed or empty runs are logged and skipped.
    pub fn generate(&self, count: usize) -> BoxStream<'static, Candidate> {
        let credentials = match self.credentials() {
            Ok(credentials) => credentials,
            Err(err) => {
                warn!(error = %err, "Question generation unavailable");
                return stream::empty().boxed();
            }
        };

        let state = BatchState {
            generator: self.clone(),
            credentials,
            attempt: 0,
            count,
            delay: None,
        };

        stream::unfold(state, |mut state| async move {
            while state.attempt < state.count {
                if let Some(delay) = state.delay.take() {
                    sleep(delay).await;
                }
                state.attempt += 1;

                match state.generator.run_workflow(&state.credentials).await {
                    Ok(Some(candidate)) => {
                        debug!(
                            attempt = state.attempt,
                            answer = %candidate.answer,
                            "Workflow produced a candidate"
                        );
                        state.delay = Some(state.generator.settings.pacing());
                        return Some((candidate, state));
                    }
                    Ok(None) => {
                        info!(attempt = state.attempt, "Workflow returned no candidate");
                        state.delay = Some(state.generator.settings.pacing());
                    }
                    Err(err) => {
                        warn!(
                            attempt = state.attempt,
                            kind = err.kind(),
                            error = %err,
                            "Workflow call failed"
                        );
                        state.delay = Some(state.generator.settings.failure_backoff());
                    }
                }
            }
            None
        })
        .boxed()
    }

    pub async fn generate_batch(&self, count: usize) -> Vec<Candidate> {
        self.generate(count).collect().await
    }

    async fn run_workflow(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<Candidate>, PipelineError> {
        let result = self.call_workflow(credentials).await;
        let outcome = match &result {
            Ok(Some(_)) => "candidate",
            Ok(None) => "empty",
            Err(PipelineError::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        WORKFLOW_CALLS_TOTAL.with_label_values(&[outcome]).inc();
        if matches!(result, Ok(Some(_))) {
            QUESTIONS_GENERATED_TOTAL.inc();
        }
        result
    }

    async fn call_workflow(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<Candidate>, PipelineError> {
        let url = format!(
            "{}/v1/workflow/run",
            self.settings.base_url.trim_end_matches('/')
        );
        let timeout = self.settings.timeout();
        let payload = WorkflowRunRequest {
            workflow_id: &credentials.workflow_id,
            parameters: WorkflowParameters {
                input: &self.settings.trigger_input,
            },
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&credentials.api_key)
            .json(&payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| transport_error(err, timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| transport_error(err, timeout))?;

        if !status.is_success() {
            return Err(PipelineError::Upstream(format!(
                "workflow API returned {}: {}",
                status, body
            )));
        }

        parse_run_response(&body)
    }
}

struct BatchState {
    generator: QuestionGenerator,
    credentials: Credentials,
    attempt: usize,
    count: usize,
    delay: Option<Duration>,
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> PipelineError {
    if err.is_timeout() {
        PipelineError::Timeout(timeout)
    } else {
        PipelineError::Upstream(err.to_string())
    }
}

/// Decodes a workflow run response. `data` is usually a JSON document
/// serialized into a string, so it may need a second decode.
fn parse_run_response(body: &str) -> Result<Option<Candidate>, PipelineError> {
    let response: WorkflowRunResponse = serde_json::from_str(body)
        .map_err(|err| PipelineError::Upstream(format!("malformed response: {}", err)))?;

    if response.code != 0 {
        let message = response
            .msg
            .filter(|msg| !msg.is_empty())
            .unwrap_or_else(|| format!("API error: {}", response.code));
        return Err(PipelineError::Upstream(message));
    }

    let data = match response.data {
        Value::String(raw) => serde_json::from_str::<Value>(&raw)
            .map_err(|err| PipelineError::Upstream(format!("malformed data payload: {}", err)))?,
        other => other,
    };

    let field = |name: &str| data.get(name).and_then(Value::as_str).unwrap_or_default();
    let candidate = Candidate::new(field("output"), field("output2"));

    Ok(candidate.is_complete().then_some(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_stringified_data() {
        let data = json!({ "output": "https://tmp/cat.png", "output2": "cat" }).to_string();
        let body = json!({ "code": 0, "msg": "Success", "data": data }).to_string();

        let candidate = parse_run_response(&body).unwrap().unwrap();
        assert_eq!(candidate, Candidate::new("https://tmp/cat.png", "cat"));
    }

    #[test]
    fn accepts_object_data() {
        let body = json!({
            "code": 0,
            "data": { "output": "https://tmp/dog.png", "output2": "dog" }
        })
        .to_string();

        assert_eq!(
            parse_run_response(&body).unwrap(),
            Some(Candidate::new("https://tmp/dog.png", "dog"))
        );
    }

    #[test]
    fn missing_answer_is_not_a_candidate() {
        let data = json!({ "output": "https://tmp/cat.png" }).to_string();
        let body = json!({ "code": 0, "data": data }).to_string();
        assert_eq!(parse_run_response(&body).unwrap(), None);
    }

    #[test]
    fn non_zero_code_is_upstream_error() {
        let body = json!({ "code": 4100, "msg": "token expired" }).to_string();
        match parse_run_response(&body) {
            Err(PipelineError::Upstream(message)) => assert_eq!(message, "token expired"),
            other => panic!("unexpected result: {:?}", other),
        }

        let body = json!({ "code": 7 }).to_string();
        match parse_run_response(&body) {
            Err(PipelineError::Upstream(message)) => assert_eq!(message, "API error: 7"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn malformed_json_is_upstream_error() {
        assert!(matches!(
            parse_run_response("<html>bad gateway</html>"),
            Err(PipelineError::Upstream(_))
        ));
        let body = json!({ "code": 0, "data": "{not json" }).to_string();
        assert!(matches!(
            parse_run_response(&body),
            Err(PipelineError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn missing_credentials_yield_no_candidates() {
        let generator = QuestionGenerator::new(WorkflowSettings::default());
        assert!(!generator.is_configured());
        assert!(generator.generate_batch(5).await.is_empty());
    }
}
