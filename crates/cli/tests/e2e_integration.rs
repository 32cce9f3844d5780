//! End-to-end tests for the Dexter run server.
//!
//! These drive the full pipeline: HTTP submit, the blocking worker running
//! the default executor against a scripted provider, and the SSE stream.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use dexter_agent::{DirectExecutorFactory, StepLimits};
use dexter_config::AppConfig;
use dexter_core::error::ProviderError;
use dexter_core::message::Message;
use dexter_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use dexter_core::{ProgressStatus, RunEvent};
use dexter_gateway::{AppState, build_router};
use dexter_providers::{LlmInvoker, RetryPolicy};
use http_body_util::BodyExt;
use tower::ServiceExt;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that replays scripted results in sequence.
struct ScriptedProvider {
    results: std::sync::Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    call_count: std::sync::Mutex<usize>,
}

impl ScriptedProvider {
    fn new(results: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            results: std::sync::Mutex::new(results),
            call_count: std::sync::Mutex::new(0),
        }
    }

    fn text(response: &str) -> Self {
        Self::new(vec![Ok(text_response(response))])
    }

    fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        let results = self.results.lock().unwrap();
        if *count >= results.len() {
            panic!(
                "ScriptedProvider exhausted: call #{}, have {}",
                *count,
                results.len()
            );
        }
        let result = results[*count].clone();
        *count += 1;
        result
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn state_with(provider: Arc<ScriptedProvider>, retry: RetryPolicy) -> Arc<AppState> {
    let invoker = Arc::new(
        LlmInvoker::new(
            provider,
            &AppConfig::default(),
            tokio::runtime::Handle::current(),
        )
        .with_retry(retry),
    );
    let factory = Arc::new(DirectExecutorFactory::new(invoker));
    Arc::new(AppState::new(factory, StepLimits::default()))
}

async fn submit(app: axum::Router, body: serde_json::Value) -> String {
    let req = Request::builder()
        .method("POST")
        .uri("/api/run")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    value["run_id"].as_str().unwrap().to_string()
}

fn parse_sse(text: &str) -> Vec<RunEvent> {
    text.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim_start()).unwrap())
        .collect()
}

async fn stream(app: axum::Router, run_id: &str) -> Vec<RunEvent> {
    let req = Request::builder()
        .uri(format!("/api/run/{run_id}/events"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    parse_sse(&String::from_utf8(bytes.to_vec()).unwrap())
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_run_streams_progress_then_done() {
    let provider = Arc::new(ScriptedProvider::text("Apple's FY24 revenue was $391B."));
    let state = state_with(provider.clone(), RetryPolicy::no_retry());
    let app = build_router(state.clone());

    let run_id = submit(
        app.clone(),
        serde_json::json!({"query": "What was Apple's FY24 revenue?"}),
    )
    .await;
    let events = stream(app, &run_id).await;

    let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec!["header", "user_query", "progress", "progress", "answer", "done"]
    );
    assert_eq!(
        events[3],
        RunEvent::Progress {
            status: ProgressStatus::Complete,
            message: "Thinking ✓".into()
        }
    );
    assert_eq!(
        events[5],
        RunEvent::Done {
            answer: "Apple's FY24 revenue was $391B.".into()
        }
    );
    assert_eq!(provider.calls(), 1);
    assert!(state.registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_provider_failure_ends_with_error_event() {
    let provider = Arc::new(ScriptedProvider::new(vec![Err(
        ProviderError::AuthenticationFailed("Invalid API key".into()),
    )]));
    let state = state_with(provider.clone(), RetryPolicy::default());
    let app = build_router(state);

    let run_id = submit(app.clone(), serde_json::json!({"query": "q"})).await;
    let events = stream(app, &run_id).await;

    assert!(events.iter().any(|e| matches!(
        e,
        RunEvent::Progress { status: ProgressStatus::Error, .. }
    )));
    match events.last() {
        Some(RunEvent::Error { message }) => assert!(message.contains("Invalid API key")),
        other => panic!("expected terminal error, got {other:?}"),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_transient_failures_are_retried() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(ProviderError::Network("connection reset".into())),
        Err(ProviderError::Timeout("read timed out".into())),
        Ok(text_response("third time lucky")),
    ]));
    let retry = RetryPolicy {
        initial_delay: Duration::from_millis(10),
        ..RetryPolicy::default()
    };
    let state = state_with(provider.clone(), retry);
    let app = build_router(state);

    let run_id = submit(app.clone(), serde_json::json!({"query": "q"})).await;
    let events = stream(app, &run_id).await;

    assert_eq!(
        events.last(),
        Some(&RunEvent::Done {
            answer: "third time lucky".into()
        })
    );
    assert_eq!(provider.calls(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_zero_step_budget_uses_default() {
    let provider = Arc::new(ScriptedProvider::text("fine"));
    let state = state_with(provider, RetryPolicy::no_retry());
    let app = build_router(state);

    let run_id = submit(
        app.clone(),
        serde_json::json!({"query": "q", "max_steps": 0, "max_steps_per_task": 0}),
    )
    .await;
    let events = stream(app, &run_id).await;
    assert_eq!(
        events.last(),
        Some(&RunEvent::Done {
            answer: "fine".into()
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_over_tcp() {
    let provider = Arc::new(ScriptedProvider::text("served over the wire ✓"));
    let app = build_router(state_with(provider, RetryPolicy::no_retry()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let health: serde_json::Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, serde_json::json!({"status": "ok"}));

    let submitted: serde_json::Value = client
        .post(format!("http://{addr}/api/run"))
        .json(&serde_json::json!({"query": "hello"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let run_id = submitted["run_id"].as_str().unwrap();

    let response = client
        .get(format!("http://{addr}/api/run/{run_id}/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let text = response.text().await.unwrap();

    assert!(text.contains("served over the wire ✓"));
    let events = parse_sse(&text);
    assert!(matches!(events.last(), Some(RunEvent::Done { .. })));

    let missing = client
        .get(format!("http://{addr}/api/run/{run_id}/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    server.abort();
}
