//! HTTP behaviour of the OpenAI-compatible clients, against a mock server.

use askdocs::config::{EmbeddingConfig, LlmConfig};
use askdocs::embedding::{EmbeddingProvider, OpenAIProvider};
use askdocs::error::Error;
use askdocs::llm::{CompletionRequest, LanguageModel, OpenAIChatModel};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn llm_config(server: &MockServer) -> LlmConfig {
    LlmConfig {
        provider: "openai".to_string(),
        base_url: server.uri(),
        max_retries: 1,
        timeout_secs: 5,
        ..LlmConfig::default()
    }
}

fn embedding_config(server: &MockServer) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "openai".to_string(),
        model: Some("test-embed".to_string()),
        dims: Some(3),
        base_url: server.uri(),
        max_retries: 1,
        timeout_secs: 5,
        ..EmbeddingConfig::default()
    }
}

#[tokio::test]
async fn test_chat_completion_sends_stop_and_temperature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-3.5-turbo",
            "stop": ["\nObservation:"],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "Final Answer: 42" },
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let model = OpenAIChatModel::with_api_key(&llm_config(&server), "test-key".to_string()).unwrap();
    let request = CompletionRequest {
        prompt: "Question: what?".to_string(),
        temperature: 0.1,
        stop: vec!["\nObservation:".to_string()],
        ..CompletionRequest::default()
    };

    let text = model.complete(&request).await.unwrap();
    assert_eq!(text, "Final Answer: 42");
}

#[tokio::test]
async fn test_chat_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let model = OpenAIChatModel::with_api_key(&llm_config(&server), "wrong".to_string()).unwrap();
    let err = model
        .complete(&CompletionRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Llm(ref msg) if msg.contains("401")));
}

#[tokio::test]
async fn test_health_check_follows_models_endpoint() {
    let server = MockServer::start().await;
    let model = OpenAIChatModel::with_api_key(&llm_config(&server), "test-key".to_string()).unwrap();

    // Nothing mounted yet: the mock server answers 404.
    assert!(!model.health_check().await);

    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
        .mount(&server)
        .await;
    assert!(model.health_check().await);
}

#[tokio::test]
async fn test_embeddings_are_ordered_by_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(serde_json::json!({ "model": "test-embed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                { "embedding": [0.0, 1.0, 0.0], "index": 1 },
                { "embedding": [1.0, 0.0, 0.0], "index": 0 }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        OpenAIProvider::with_api_key(&embedding_config(&server), "test-key".to_string()).unwrap();
    let vectors = provider
        .embed_texts(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
}

#[tokio::test]
async fn test_embedding_dimension_mismatch_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "embedding": [1.0, 0.0], "index": 0 }]
        })))
        .mount(&server)
        .await;

    let provider =
        OpenAIProvider::with_api_key(&embedding_config(&server), "test-key".to_string()).unwrap();
    let err = provider.embed_texts(&["x".to_string()]).await.unwrap_err();
    assert!(matches!(err, Error::Embedding(ref msg) if msg.contains("expected 3")));
}

#[tokio::test]
async fn test_embedding_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "embedding": [0.0, 0.0, 1.0], "index": 0 }]
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let provider =
        OpenAIProvider::with_api_key(&embedding_config(&server), "test-key".to_string()).unwrap();
    let vectors = provider.embed_texts(&["x".to_string()]).await.unwrap();
    assert_eq!(vectors, vec![vec![0.0, 0.0, 1.0]]);
}
