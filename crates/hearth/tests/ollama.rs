use futures::StreamExt;
use hearth::engines::ollama::{OllamaEngine, OllamaEngineConfig};
use hearth::engines::{EngineHandle, InferenceEngine, InitProgress};
use hearth::errors::EngineError;
use hearth::models::delta::{DeltaFragment, ToolCallPiece};
use hearth::models::message::Message;
use hearth::tools::ToolRegistry;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine(server: &MockServer, pull: bool) -> OllamaEngine {
    OllamaEngine::new(OllamaEngineConfig {
        host: server.uri(),
        pull,
        ..Default::default()
    })
    .unwrap()
}

async fn mount_load(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
        .mount(server)
        .await;
}

async fn loaded_handle(server: &MockServer) -> Arc<dyn EngineHandle> {
    mount_load(server).await;
    let (progress, _rx) = mpsc::unbounded_channel();
    engine(server, false)
        .initialize("llama3.2", progress)
        .await
        .unwrap()
}

fn sse(events: &[&str]) -> ResponseTemplate {
    let body: String = events
        .iter()
        .map(|event| format!("data: {}\n\n", event))
        .collect();
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

#[tokio::test]
async fn test_list_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3.2:latest"}, {"name": "qwen2.5:7b"}]
        })))
        .mount(&server)
        .await;

    let models = engine(&server, false).list_models().await.unwrap();

    assert_eq!(models, vec!["llama3.2:latest", "qwen2.5:7b"]);
}

#[tokio::test]
async fn test_initialize_pulls_then_loads() {
    let server = MockServer::start().await;
    let pull_body = [
        r#"{"status":"pulling manifest"}"#,
        r#"{"status":"pulling 6a0746a1ec1a","total":200,"completed":100}"#,
        r#"{"status":"pulling 4f659a1e86d7","total":400,"completed":40}"#,
        r#"{"status":"verifying sha256 digest"}"#,
        r#"{"status":"success"}"#,
    ]
    .join("\n");
    Mock::given(method("POST"))
        .and(path("/api/pull"))
        .and(body_partial_json(json!({"model": "llama3.2"})))
        .respond_with(ResponseTemplate::new(200).set_body_string(pull_body))
        .expect(1)
        .mount(&server)
        .await;
    mount_load(&server).await;

    let (progress, mut rx) = mpsc::unbounded_channel();
    let handle = engine(&server, true)
        .initialize("llama3.2", progress)
        .await
        .unwrap();

    assert_eq!(handle.model(), "llama3.2");
    let updates: Vec<InitProgress> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    let texts: Vec<_> = updates.iter().map(|u| u.text.as_str()).collect();
    assert_eq!(
        texts,
        vec![
            "pulling manifest",
            "pulling 6a0746a1ec1a (50%)",
            "pulling 4f659a1e86d7 (10%)",
            "verifying sha256 digest",
            "success",
            "Loading model into memory..."
        ]
    );
    let fractions: Vec<f32> = updates.iter().map(|u| u.progress).collect();
    assert_eq!(fractions[0], 0.0);
    // A new layer or a status-only line never moves the bar backwards
    for fraction in &fractions[1..5] {
        assert!((fraction - 0.45).abs() < 1e-6, "progress went to {}", fraction);
    }
    assert!(fractions.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn test_pull_error_fails_initialization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/pull"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"error":"pull model manifest: file does not exist"}"#),
        )
        .mount(&server)
        .await;

    let (progress, _rx) = mpsc::unbounded_channel();
    let result = engine(&server, true).initialize("nope", progress).await;

    match result {
        Err(EngineError::Initialization { model, message }) => {
            assert_eq!(model, "nope");
            assert!(message.contains("file does not exist"));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("initialization should fail"),
    }
}

#[tokio::test]
async fn test_complete_stream_yields_fragments_in_order() {
    let server = MockServer::start().await;
    let handle = loaded_handle(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "llama3.2", "stream": true})))
        .respond_with(sse(&[
            r#"{"choices":[{"delta":{"role":"assistant","content":"Let me "}}]}"#,
            r#"{"choices":[{"delta":{"content":"check."}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"calculate","arguments":"{\"expression\":\"2+2\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]))
        .mount(&server)
        .await;

    let tools = ToolRegistry::with_builtin_tools().declarations();
    let stream = handle
        .complete_stream(&[Message::user().with_text("What is 2+2?")], &tools)
        .await
        .unwrap();
    let fragments: Vec<_> = stream.collect().await;

    assert_eq!(
        fragments,
        vec![
            Ok(DeltaFragment::content("Let me ")),
            Ok(DeltaFragment::content("check.")),
            Ok(DeltaFragment::tool_call(
                ToolCallPiece::new(0)
                    .with_id("call_1")
                    .with_type("function")
                    .with_name("calculate")
                    .with_arguments(r#"{"expression":"2+2"}"#)
            )),
        ]
    );

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = requests.last().unwrap().body_json().unwrap();
    assert_eq!(body["tools"][0]["function"]["name"], "calculate");
    assert_eq!(body["messages"][0], json!({"role": "user", "content": "What is 2+2?"}));
}

#[tokio::test]
async fn test_stream_without_done_is_connection_lost() {
    let server = MockServer::start().await;
    let handle = loaded_handle(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse(&[r#"{"choices":[{"delta":{"content":"Hel"}}]}"#]))
        .mount(&server)
        .await;

    let stream = handle.complete_stream(&[], &[]).await.unwrap();
    let fragments: Vec<_> = stream.collect().await;

    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0], Ok(DeltaFragment::content("Hel")));
    assert!(matches!(fragments[1], Err(EngineError::ConnectionLost(_))));
}

#[tokio::test]
async fn test_http_error_is_reported() {
    let server = MockServer::start().await;
    let handle = loaded_handle(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "model \"llama3.2\" not found"})),
        )
        .mount(&server)
        .await;

    let result = handle.complete_stream(&[], &[]).await;

    assert!(matches!(
        result,
        Err(EngineError::HttpStatus { status: 404, ref message }) if message.contains("not found")
    ));
}

#[tokio::test]
async fn test_unload_sets_keep_alive_to_zero() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"model": "llama3.2", "keep_alive": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
        .expect(1)
        .mount(&server)
        .await;
    let handle = loaded_handle(&server).await;

    handle.unload().await.unwrap();
}
