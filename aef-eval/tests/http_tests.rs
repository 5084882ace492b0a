//! HTTP scoring backend, HTTP adapter and HTTP dataset store against a mock
//! server.

use std::sync::Arc;
use std::time::Duration;

use aef_eval::adapters::HTTP_ADAPTER;
use aef_eval::{
    AdapterParams, AdapterRegistry, BatchRequest, ColumnMapping, DatasetLocation, DelegatedMetric,
    EvalError, EvaluationRunner, HttpScoringBackend, MetricValue, RetryConfig, ScoringBackend,
    ScoringClient, ScoringCredentials, ScoringInstance, ToolCall, dataset::default_stores,
    load_dataset,
};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn batch(instances: usize) -> BatchRequest {
    BatchRequest {
        project_id: "proj".to_string(),
        location: "us-central1".to_string(),
        metrics: vec![DelegatedMetric {
            name: "bleu".to_string(),
            kind: "computation".to_string(),
            params: Default::default(),
        }],
        instances: (0..instances)
            .map(|index| ScoringInstance {
                index,
                prompt: format!("prompt {}", index),
                response: format!("response {}", index),
                reference: format!("reference {}", index),
            })
            .collect(),
    }
}

fn fast_retries(max_retries: u32) -> RetryConfig {
    RetryConfig::new(max_retries, Duration::from_millis(1), Duration::from_millis(5))
}

fn client(server: &MockServer, max_retries: u32) -> ScoringClient {
    let backend = HttpScoringBackend::new(
        format!("{}/score", server.uri()),
        Some("secret-token".to_string()),
        Duration::from_secs(5),
    )
    .unwrap();
    ScoringClient::new(Arc::new(backend), fast_retries(max_retries), Duration::from_secs(5))
}

fn scores_body(values: &[Option<f64>]) -> Value {
    let results: Vec<Value> = values
        .iter()
        .enumerate()
        .map(|(index, value)| json!({"index": index, "scores": {"bleu": value}}))
        .collect();
    json!({ "results": results })
}

// ---------------------------------------------------------------------------
// Scoring backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_backend_posts_batch_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/score"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_partial_json(json!({
            "project_id": "proj",
            "location": "us-central1",
            "metrics": [{"name": "bleu", "kind": "computation"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(scores_body(&[Some(0.5), Some(0.25)])))
        .expect(1)
        .mount(&server)
        .await;

    let scores = client(&server, 0).score(&batch(2)).await.unwrap();
    assert_eq!(scores[0]["bleu"], Ok(MetricValue::Number(0.5)));
    assert_eq!(scores[1]["bleu"], Ok(MetricValue::Number(0.25)));
}

#[tokio::test]
async fn test_backend_retries_service_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/score"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/score"))
        .respond_with(ResponseTemplate::new(200).set_body_json(scores_body(&[Some(1.0)])))
        .mount(&server)
        .await;

    let scores = client(&server, 3).score(&batch(1)).await.unwrap();
    assert_eq!(scores[0]["bleu"], Ok(MetricValue::Number(1.0)));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_backend_gives_up_after_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server, 2).score(&batch(1)).await.unwrap_err();
    assert!(matches!(err, EvalError::ScoringBackend { retryable: true, .. }), "{:?}", err);
}

#[tokio::test]
async fn test_backend_never_retries_auth_failure() {
    for status in [401u16, 403] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string("bad credentials"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, 5).score(&batch(1)).await.unwrap_err();
        match err {
            EvalError::ScoringBackend { retryable, message } => {
                assert!(!retryable);
                assert!(message.contains("authentication"), "{}", message);
                assert!(message.contains(&status.to_string()), "{}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_backend_bad_request_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unknown metric"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, 5).score(&batch(1)).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("unknown metric"));
}

#[tokio::test]
async fn test_partial_batch_retries_whole_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(scores_body(&[Some(0.5), None])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(scores_body(&[Some(0.5), Some(0.75)])))
        .mount(&server)
        .await;

    let scores = client(&server, 2).score(&batch(2)).await.unwrap();
    assert_eq!(scores[1]["bleu"], Ok(MetricValue::Number(0.75)));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for request in requests {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["instances"].as_array().unwrap().len(), 2);
    }
}

#[tokio::test]
async fn test_backend_malformed_response_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpScoringBackend::new(server.uri(), None, Duration::from_secs(5)).unwrap();
    let err = backend.evaluate(&batch(1)).await.unwrap_err();
    assert!(matches!(err, EvalError::ScoringBackend { retryable: false, .. }), "{:?}", err);
}

#[tokio::test]
async fn test_run_with_http_scoring_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/evaluate"))
        .and(body_partial_json(json!({
            "metrics": [{"name": "helpfulness", "kind": "rubric", "params": {"predefined_spec_name": "qa_quality"}}],
            "instances": [{"index": 0, "prompt": "hi", "response": "response to hi", "reference": "hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"index": 0, "scores": {"helpfulness": 4.0}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("golden.jsonl"), r#"{"prompt":"hi","reference":"hello"}"#).unwrap();
    let config_path = dir.path().join("eval.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
adapter = "echo"
dataset_path = "golden.jsonl"
metrics = [
  "trajectory_exact_match",
  {{ name = "helpfulness", type = "rubric", predefined_spec_name = "qa_quality" }},
]

[scoring]
endpoint = "{}/v1/evaluate"
max_retries = 0
"#,
            server.uri()
        ),
    )
    .unwrap();

    let runner = EvaluationRunner::builder()
        .credentials(ScoringCredentials::new("proj", "europe-west1"))
        .build();
    let result = runner.run(&config_path).await.unwrap();

    assert_eq!(result.metric(0, "helpfulness").unwrap().value, Some(MetricValue::Number(4.0)));
    assert_eq!(result.summary()["helpfulness"].value, Some(4.0));
    assert_eq!(result.metric(0, "trajectory_exact_match").unwrap().value, Some(MetricValue::Bool(true)));
}

#[tokio::test]
async fn test_missing_endpoint_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("golden.jsonl"), r#"{"prompt":"hi","reference":"hello"}"#).unwrap();
    let config_path = dir.path().join("eval.json");
    std::fs::write(&config_path, r#"{"adapter":"echo","dataset_path":"golden.jsonl","metrics":["bleu"]}"#)
        .unwrap();

    let runner =
        EvaluationRunner::builder().credentials(ScoringCredentials::new("proj", "us-east1")).build();
    let err = runner.run(&config_path).await.unwrap_err();
    assert!(matches!(err, EvalError::Config(ref m) if m.contains("SCORING_ENDPOINT")), "{:?}", err);
}

// ---------------------------------------------------------------------------
// HTTP adapter
// ---------------------------------------------------------------------------

fn params(value: Value) -> AdapterParams {
    match value {
        Value::Object(map) => map,
        other => panic!("params must be an object, got {}", other),
    }
}

#[tokio::test]
async fn test_http_adapter_creates_session_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_partial_json(json!({"user_id": "eval_bot"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "s-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(header("x-api-key", "k"))
        .and(body_partial_json(json!({"session_id": "s-1", "user_id": "eval_bot"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "actual_response": "Paris",
            "predicted_trajectory": [{"tool_name": "search", "tool_input": {"query": "capital of France"}}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let registry = AdapterRegistry::with_builtins();
    let adapter = registry
        .create(
            HTTP_ADAPTER,
            &params(json!({
                "url": format!("{}/query", server.uri()),
                "session_url": format!("{}/sessions", server.uri()),
                "user_id": "eval_bot",
                "headers": {"x-api-key": "k"}
            })),
        )
        .await
        .unwrap();

    assert!(!adapter.supports_concurrent_calls());
    for _ in 0..2 {
        let response = adapter.get_response("capital of France?").await.unwrap();
        assert_eq!(response.actual_response, "Paris");
        assert_eq!(
            response.actual_trajectory,
            vec![ToolCall::new("search").with_arg("query", "capital of France")]
        );
    }
}

#[tokio::test]
async fn test_http_adapter_auth_failure_is_invocation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let registry = AdapterRegistry::with_builtins();
    let adapter =
        registry.create(HTTP_ADAPTER, &params(json!({"url": server.uri()}))).await.unwrap();
    assert!(adapter.supports_concurrent_calls());

    let err = adapter.get_response("hi").await.unwrap_err();
    match err {
        EvalError::AdapterInvocation(message) => {
            assert!(message.contains("authentication"), "{}", message);
            assert!(message.contains("403"), "{}", message);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_http_adapter_requires_url() {
    let registry = AdapterRegistry::with_builtins();
    let err = registry.create(HTTP_ADAPTER, &AdapterParams::new()).await.err().unwrap();
    assert!(matches!(err, EvalError::Config(ref m) if m.contains("'url'")), "{:?}", err);
}

// ---------------------------------------------------------------------------
// HTTP dataset store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_dataset_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/golden.jsonl"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"prompt\":\"2+2?\",\"answer\":\"4\"}\n{\"prompt\":\"1+1?\",\"answer\":\"2\"}\n",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/missing.jsonl"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mapping = ColumnMapping::new().with("reference", "answer");
    let location =
        DatasetLocation::parse(&format!("{}/data/golden.jsonl", server.uri()), None).unwrap();
    let records = load_dataset(&default_stores(), &location, &mapping).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].reference, "2");

    let missing =
        DatasetLocation::parse(&format!("{}/data/missing.jsonl", server.uri()), None).unwrap();
    let err = load_dataset(&default_stores(), &missing, &mapping).await.unwrap_err();
    assert!(matches!(err, EvalError::Dataset(ref m) if m.contains("404")), "{:?}", err);
}
