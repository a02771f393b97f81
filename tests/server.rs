mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use compliance_harness::server::{router, AppState};

use common::*;

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_question(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/question")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_question_accepted_then_status_served() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "local", "");
    let h = harness(&config, ScriptedInference::new(), FakeSearch::new());
    let app = router(AppState {
        coordinator: h.engine.coordinator.clone(),
    });

    let body = json!({ "question": QUESTION, "targets": ["Inmobiliaria Andes"] }).to_string();
    let (status, accepted) = send(app.clone(), post_question(&body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = accepted["runId"].as_str().unwrap().to_string();
    assert_eq!(run_id.len(), 32);

    h.engine.coordinator.join(&run_id).await.unwrap();

    let (status, record) = send(app, get(&format!("/runs/{}", run_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["id"], run_id.as_str());
    assert_eq!(record["status"], "completed");
    assert_eq!(record["targets"], json!(["Inmobiliaria Andes"]));
    assert!(record["answer"]["obligations"].is_array());
    assert!(record["metrics"]["toolCalls"].is_array());
}

#[tokio::test]
async fn test_invalid_payload_rejected_without_creating_run() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "local", "");
    let h = harness(&config, ScriptedInference::new(), FakeSearch::new());
    let app = router(AppState {
        coordinator: h.engine.coordinator.clone(),
    });

    let (status, body) = send(app.clone(), post_question(r#"{"question": "   ", "targets": "x"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["details"].as_array().unwrap().len(), 2);

    let (status, body) = send(app, post_question("not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    assert_eq!(h.store.writes(), 0);
}

#[tokio::test]
async fn test_unknown_run_is_404() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "local", "");
    let h = harness(&config, ScriptedInference::new(), FakeSearch::new());
    let app = router(AppState {
        coordinator: h.engine.coordinator.clone(),
    });

    let (status, body) = send(app, get("/runs/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "local", "");
    let h = harness(&config, ScriptedInference::new(), FakeSearch::new());
    let app = router(AppState {
        coordinator: h.engine.coordinator.clone(),
    });

    let (status, body) = send(app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
