mod common;

use futures::StreamExt;
use picquiz_api::{models::Candidate, services::question_generator::QuestionGenerator};
use std::time::{Duration, Instant};

use common::{test_config, with_workflow, FakeWorkflow, WorkflowReply};

fn reply(n: usize) -> WorkflowReply {
    WorkflowReply::candidate(format!("https://tmp.example/{}.png", n), format!("answer-{}", n))
}

fn generator_for(workflow: &FakeWorkflow) -> QuestionGenerator {
    QuestionGenerator::new(with_workflow(test_config(), workflow).workflow)
}

#[tokio::test]
async fn test_timed_out_call_is_skipped() {
    let workflow = FakeWorkflow::start(vec![
        reply(1),
        reply(2),
        WorkflowReply::Hang,
        reply(4),
        reply(5),
    ])
    .await;
    let generator = generator_for(&workflow);

    let candidates = generator.generate_batch(5).await;

    assert_eq!(workflow.call_count(), 5);
    let answers: Vec<&str> = candidates.iter().map(|c| c.answer.as_str()).collect();
    assert_eq!(answers, vec!["answer-1", "answer-2", "answer-4", "answer-5"]);
}

#[tokio::test]
async fn test_failed_and_incomplete_runs_are_skipped() {
    let workflow = FakeWorkflow::start(vec![
        WorkflowReply::ObjectCandidate {
            image_url: "https://tmp.example/a.png".into(),
            answer: "apple".into(),
        },
        WorkflowReply::MissingAnswer,
        WorkflowReply::Error {
            code: 4100,
            msg: "quota exceeded".into(),
        },
        WorkflowReply::Error {
            code: 500,
            msg: String::new(),
        },
        WorkflowReply::Malformed,
        reply(6),
    ])
    .await;
    let generator = generator_for(&workflow);

    let candidates = generator.generate_batch(6).await;

    assert_eq!(workflow.call_count(), 6);
    assert_eq!(
        candidates,
        vec![
            Candidate::new("https://tmp.example/a.png", "apple"),
            Candidate::new("https://tmp.example/6.png", "answer-6"),
        ]
    );
}

#[tokio::test]
async fn test_request_carries_credentials_and_trigger_input() {
    let workflow = FakeWorkflow::start(vec![reply(1)]).await;
    let generator = generator_for(&workflow);

    generator.generate_batch(1).await;

    let calls = workflow.calls();
    assert_eq!(calls.len(), 1);
    let (auth, body) = &calls[0];
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(body["workflow_id"], "wf-123");
    assert_eq!(body["parameters"]["input"], test_config().workflow.trigger_input);
}

#[tokio::test]
async fn test_missing_credentials_yield_nothing() {
    let workflow = FakeWorkflow::start(vec![reply(1)]).await;
    let mut settings = with_workflow(test_config(), &workflow).workflow;
    settings.api_key = None;
    let generator = QuestionGenerator::new(settings);

    assert!(!generator.is_configured());
    assert!(generator.generate_batch(3).await.is_empty());
    assert_eq!(workflow.call_count(), 0);
}

#[tokio::test]
async fn test_stream_is_lazy() {
    let workflow = FakeWorkflow::start(vec![reply(1), reply(2), reply(3)]).await;
    let generator = generator_for(&workflow);

    let first: Vec<Candidate> = generator.generate(3).take(1).collect().await;

    assert_eq!(first.len(), 1);
    assert_eq!(workflow.call_count(), 1);
}

#[tokio::test]
async fn test_calls_are_paced() {
    let workflow = FakeWorkflow::start(vec![reply(1), reply(2), reply(3)]).await;
    let mut config = with_workflow(test_config(), &workflow);
    config.workflow.pacing_ms = 100;
    let generator = QuestionGenerator::new(config.workflow);

    let started = Instant::now();
    let candidates = generator.generate_batch(3).await;

    assert_eq!(candidates.len(), 3);
    // Two gaps between three calls, none after the last one.
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_failed_call_backs_off_before_next_attempt() {
    let workflow = FakeWorkflow::start(vec![
        WorkflowReply::Error {
            code: 4100,
            msg: "busy".into(),
        },
        reply(2),
        reply(3),
        reply(4),
    ])
    .await;
    let mut config = with_workflow(test_config(), &workflow);
    config.workflow.pacing_ms = 0;
    config.workflow.failure_backoff_ms = 400;
    let generator = QuestionGenerator::new(config.workflow);

    let started = Instant::now();
    let candidates = generator.generate_batch(2).await;
    assert_eq!(candidates.len(), 1);
    assert!(started.elapsed() >= Duration::from_millis(400));

    // Successful calls only wait for the (zero) pacing delay.
    let started = Instant::now();
    let candidates = generator.generate_batch(2).await;
    assert_eq!(candidates.len(), 2);
    assert!(started.elapsed() < Duration::from_millis(400));
}
