#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    extract::{Path, State},
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use picquiz_api::{
    config::Config,
    create_router,
    services::{
        session_store::InMemorySessionStore,
        storage::{InMemoryObjectStore, InMemoryStorage},
        AppState,
    },
};

pub const ADMIN_EMAIL: &str = "admin@test.com";
pub const PUBLIC_BASE: &str = "https://cdn.picquiz.test/images";
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-image";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub storage: Arc<InMemoryStorage>,
    pub objects: Arc<InMemoryObjectStore>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.jwt_secret = "integration-test-secret".to_string();
    config.bcrypt_cost = 4;
    config.admin_emails = vec![ADMIN_EMAIL.to_string()];
    config.object_storage.public_base_url = Some(PUBLIC_BASE.to_string());
    config.workflow.pacing_ms = 0;
    config.workflow.failure_backoff_ms = 0;
    config.workflow.timeout_ms = 300;
    config.migration.download_timeout_ms = 2_000;
    config
}

/// Points the generator at a fake workflow server.
pub fn with_workflow(mut config: Config, workflow: &FakeWorkflow) -> Config {
    config.workflow.base_url = workflow.base_url();
    config.workflow.api_key = Some("test-key".to_string());
    config.workflow.workflow_id = Some("wf-123".to_string());
    config
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(test_config()).await
}

pub async fn create_test_app_with(config: Config) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let storage = Arc::new(InMemoryStorage::new());
    let objects = Arc::new(InMemoryObjectStore::new(PUBLIC_BASE));
    let state = Arc::new(
        AppState::from_parts(
            config,
            storage.clone(),
            Arc::new(InMemorySessionStore::new()),
            objects.clone(),
        )
        .expect("Failed to initialize test app state"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
        storage,
        objects,
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(body) => {
                builder = builder.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        read_response(response).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        let (status, _, body) = self.request("GET", uri, Some(token), None).await;
        (status, body)
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        let (status, _, body) = self.request("POST", uri, Some(token), Some(body)).await;
        (status, body)
    }

    /// Registers a user and returns `(user_id, token)`.
    pub async fn register(&self, email: &str) -> (String, String) {
        let (status, _, body) = self
            .request(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({ "email": email, "password": "secret123" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    pub async fn register_random(&self) -> (String, String) {
        self.register(&format!("player-{}@test.com", uuid::Uuid::new_v4()))
            .await
    }

    pub async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.state.jobs.wait_idle())
            .await
            .expect("background jobs did not finish");
    }
}

pub async fn read_response(response: Response) -> (StatusCode, HeaderMap, Value) {
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, headers, body)
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// One scripted response of the fake workflow API.
#[derive(Debug, Clone)]
pub enum WorkflowReply {
    /// `data` serialized into a string, as the real API does.
    Candidate { image_url: String, answer: String },
    /// `data` as a plain object.
    ObjectCandidate { image_url: String, answer: String },
    /// Success without `output2`.
    MissingAnswer,
    Error { code: i64, msg: String },
    Malformed,
    /// Sleeps past any sane client timeout.
    Hang,
}

impl WorkflowReply {
    pub fn candidate(image_url: impl Into<String>, answer: impl Into<String>) -> Self {
        WorkflowReply::Candidate {
            image_url: image_url.into(),
            answer: answer.into(),
        }
    }
}

#[derive(Default)]
struct WorkflowScript {
    replies: Mutex<VecDeque<WorkflowReply>>,
    fallback: Mutex<Option<WorkflowReply>>,
    calls: Mutex<Vec<(Option<String>, Value)>>,
}

pub struct FakeWorkflow {
    addr: SocketAddr,
    script: Arc<WorkflowScript>,
}

impl FakeWorkflow {
    pub async fn start(replies: Vec<WorkflowReply>) -> Self {
        let script = Arc::new(WorkflowScript {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        });
        let router = Router::new()
            .route("/v1/workflow/run", post(workflow_run))
            .with_state(script.clone());
        FakeWorkflow {
            addr: serve(router).await,
            script,
        }
    }

    /// Reply used once the scripted replies run out.
    pub fn set_fallback(&self, reply: WorkflowReply) {
        *self.script.fallback.lock().unwrap() = Some(reply);
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn call_count(&self) -> usize {
        self.script.calls.lock().unwrap().len()
    }

    /// `(authorization header, JSON body)` of every call so far.
    pub fn calls(&self) -> Vec<(Option<String>, Value)> {
        self.script.calls.lock().unwrap().clone()
    }
}

async fn workflow_run(
    State(script): State<Arc<WorkflowScript>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    script.calls.lock().unwrap().push((auth, body));

    let reply = {
        let next = script.replies.lock().unwrap().pop_front();
        next.or_else(|| script.fallback.lock().unwrap().clone())
    };

    match reply {
        Some(WorkflowReply::Candidate { image_url, answer }) => {
            let data = json!({ "output": image_url, "output2": answer }).to_string();
            Json(json!({ "code": 0, "msg": "Success", "data": data })).into_response()
        }
        Some(WorkflowReply::ObjectCandidate { image_url, answer }) => Json(json!({
            "code": 0,
            "data": { "output": image_url, "output2": answer }
        }))
        .into_response(),
        Some(WorkflowReply::MissingAnswer) => {
            let data = json!({ "output": "https://tmp.example/x.png" }).to_string();
            Json(json!({ "code": 0, "data": data })).into_response()
        }
        Some(WorkflowReply::Error { code, msg }) => {
            Json(json!({ "code": code, "msg": msg })).into_response()
        }
        Some(WorkflowReply::Malformed) => (StatusCode::OK, "<html>oops</html>").into_response(),
        Some(WorkflowReply::Hang) => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "code": 0, "data": "{}" })).into_response()
        }
        None => Json(json!({ "code": 4000, "msg": "script exhausted" })).into_response(),
    }
}

/// Serves images plus redirect shapes used by the migrator tests.
pub struct FakeImageHost {
    addr: SocketAddr,
}

impl FakeImageHost {
    pub async fn start() -> Self {
        let router = Router::new()
            .route("/img/{name}", get(image))
            .route("/hop/{n}", get(hop))
            .route("/slow-hop/{n}", get(slow_hop))
            .route("/absolute-hop", get(absolute_hop))
            .route("/no-location", get(no_location))
            .route("/loop", get(redirect_loop))
            .route("/missing", get(missing));
        FakeImageHost {
            addr: serve(router).await,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn image() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES)
}

/// `/hop/n` redirects to `/hop/{n-1}` with a relative Location; `/hop/0` is the image.
async fn hop(Path(n): Path<u32>) -> Response {
    if n == 0 {
        return image().await.into_response();
    }
    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("{}", n - 1))],
    )
        .into_response()
}

/// Like `/hop/n` but every response takes 150 ms.
async fn slow_hop(Path(n): Path<u32>) -> Response {
    tokio::time::sleep(Duration::from_millis(150)).await;
    hop(Path(n)).await
}

async fn absolute_hop(headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, format!("http://{}/img/final.png", host))],
    )
        .into_response()
}

async fn no_location() -> StatusCode {
    StatusCode::FOUND
}

async fn redirect_loop() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/loop")]).into_response()
}

async fn missing() -> StatusCode {
    StatusCode::NOT_FOUND
}
