mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::create_test_app;

#[tokio::test]
async fn test_answer_is_graded_case_insensitively() {
    let app = create_test_app().await;
    let question = app.storage.seed_question("https://tmp.example/cat.png", "cat").await;
    let (_, token) = app.register_random().await;

    let (status, body) = app
        .post(
            "/api/answers/submit",
            &token,
            json!({ "questionId": question.id, "answer": "  Cat " }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isCorrect"], true);
    assert_eq!(body["correctAnswer"], "cat");
}

#[tokio::test]
async fn test_wrong_answer_reveals_correct_one() {
    let app = create_test_app().await;
    let question = app.storage.seed_question("https://tmp.example/owl.png", "Owl").await;
    let (_, token) = app.register_random().await;

    let (status, body) = app
        .post(
            "/api/answers/submit",
            &token,
            json!({ "questionId": question.id, "answer": "eagle" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isCorrect"], false);
    assert_eq!(body["correctAnswer"], "Owl");
}

#[tokio::test]
async fn test_second_answer_is_rejected() {
    let app = create_test_app().await;
    let question = app.storage.seed_question("https://tmp.example/fox.png", "fox").await;
    let (_, token) = app.register_random().await;
    let submit = json!({ "questionId": question.id, "answer": "fox" });

    let (status, _) = app.post("/api/answers/submit", &token, submit.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.post("/api/answers/submit", &token, submit).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ALREADY_ANSWERED");

    let (_, health) = {
        let admin = app.register(common::ADMIN_EMAIL).await.1;
        app.get("/api/admin/health", &admin).await
    };
    assert_eq!(health["counts"]["answers"], 1);
}

#[tokio::test]
async fn test_unknown_question_is_not_found() {
    let app = create_test_app().await;
    let (_, token) = app.register_random().await;

    let (status, body) = app
        .post(
            "/api/answers/submit",
            &token,
            json!({ "questionId": "does-not-exist", "answer": "x" }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "QUESTION_NOT_FOUND");
}

#[tokio::test]
async fn test_missing_fields_are_rejected() {
    let app = create_test_app().await;
    let (_, token) = app.register_random().await;

    let (status, body) = app
        .post("/api/answers/submit", &token, json!({ "answer": "cat" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MISSING_FIELDS");

    let (status, body) = app
        .post(
            "/api/answers/submit",
            &token,
            json!({ "questionId": "abc", "answer": "   " }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MISSING_FIELDS");
}

#[tokio::test]
async fn test_submit_requires_login() {
    let app = create_test_app().await;

    let (status, _, body) = app
        .request(
            "POST",
            "/api/answers/submit",
            None,
            Some(json!({ "questionId": "abc", "answer": "cat" })),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "NOT_LOGGED_IN");
}
