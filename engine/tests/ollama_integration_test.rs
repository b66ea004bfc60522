//! Integration tests for the Ollama provider
//!
//! These tests do NOT require a running Ollama instance: a wiremock server
//! plays the `/api/chat` endpoint and answers with NDJSON bodies.

use futures::StreamExt;
use sdk::types::CapabilitySpec;
use serde_json::json;
use std::time::Duration;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

use pilot_engine::llm::{
    ContextEntry, GenerationProvider, GenerationRequest, LLMError, OllamaProvider, RetryPolicy,
    RetryingProvider, StreamEvent,
};
use pilot_engine::record::Usage;

fn request() -> GenerationRequest {
    GenerationRequest {
        model: "llama3.1:8b".into(),
        context: vec![ContextEntry::user("What is in main.rs?")],
        system: Some("You are a coding agent.".into()),
        manifest: vec![CapabilitySpec::new(
            "read_file",
            "Read a file",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        )],
    }
}

fn ndjson(lines: &[serde_json::Value]) -> String {
    lines
        .iter()
        .map(|line| format!("{}\n", line))
        .collect::<String>()
}

async fn collect(provider: &dyn GenerationProvider) -> Vec<pilot_engine::llm::Result<StreamEvent>> {
    provider
        .stream(request())
        .await
        .expect("stream should open")
        .collect()
        .await
}

#[tokio::test]
async fn test_streams_text_calls_and_usage() {
    let server = MockServer::start().await;
    let body = ndjson(&[
        json!({"message": {"role": "assistant", "content": "Let me "}, "done": false}),
        json!({"message": {"role": "assistant", "content": "look."}, "done": false}),
        json!({"message": {"role": "assistant", "content": "", "tool_calls": [
            {"function": {"name": "read_file", "arguments": {"path": "src/main.rs"}}}
        ]}, "done": false}),
        json!({"message": {"role": "assistant", "content": ""}, "done": true,
               "prompt_eval_count": 42, "eval_count": 7}),
    ]);

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "llama3.1:8b", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), Duration::from_secs(5));
    let events: Vec<StreamEvent> = collect(&provider)
        .await
        .into_iter()
        .map(|e| e.unwrap())
        .collect();

    assert_eq!(events.len(), 4);
    assert_eq!(events[0], StreamEvent::TextDelta("Let me ".into()));
    assert_eq!(events[1], StreamEvent::TextDelta("look.".into()));
    match &events[2] {
        StreamEvent::CapabilityCall(call) => {
            assert_eq!(call.name, "read_file");
            assert_eq!(call.arguments["path"], "src/main.rs");
            assert!(call.id.is_none());
        }
        other => panic!("Expected a capability call, got {:?}", other),
    }
    assert_eq!(
        events[3],
        StreamEvent::Usage(Usage {
            input_tokens: 42,
            output_tokens: 7
        })
    );
}

#[tokio::test]
async fn test_request_carries_system_prompt_and_tools() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            json!({"message": {"role": "assistant", "content": "ok"}, "done": true}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), Duration::from_secs(5));
    let events = collect(&provider).await;
    assert_eq!(events.len(), 1);

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "You are a coding agent.");
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["messages"][1]["content"], "What is in main.rs?");
    assert_eq!(body["tools"][0]["function"]["name"], "read_file");
}

#[tokio::test]
async fn test_missing_done_is_an_interruption() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            json!({"message": {"role": "assistant", "content": "partial"}, "done": false}),
        ])))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), Duration::from_secs(5));
    let events = collect(&provider).await;
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], Ok(StreamEvent::TextDelta(t)) if t == "partial"));
    assert!(matches!(&events[1], Err(LLMError::StreamInterrupted(_))));
}

#[tokio::test]
async fn test_error_status_is_mapped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "model 'nope' not found"})),
        )
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), Duration::from_secs(5));
    match provider.stream(request()).await {
        Err(LLMError::InvalidRequest(message)) => assert!(message.contains("not found")),
        Err(other) => panic!("Expected InvalidRequest, got {:?}", other),
        Ok(_) => panic!("Expected an error"),
    }
}

#[tokio::test]
async fn test_connection_error() {
    // Nothing listens on port 1
    let provider = OllamaProvider::new("http://127.0.0.1:1", Duration::from_secs(5));
    match provider.stream(request()).await {
        Err(e) => assert!(e.is_transient(), "unexpected error: {:?}", e),
        Ok(_) => panic!("Expected a connection error"),
    }
}

#[tokio::test]
async fn test_retry_recovers_from_unavailable_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            json!({"message": {"role": "assistant", "content": "ready"}, "done": true}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = RetryingProvider::new(
        OllamaProvider::new(server.uri(), Duration::from_secs(5)),
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_base: 2.0,
        },
    );
    let events = collect(&provider).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Ok(StreamEvent::TextDelta(t)) if t == "ready"));
}
