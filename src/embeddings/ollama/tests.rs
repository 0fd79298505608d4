use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> OllamaConfig {
    let uri = Url::parse(&server.uri()).expect("mock server uri parses");
    OllamaConfig {
        host: uri.host_str().expect("mock server has a host").to_string(),
        port: uri.port().expect("mock server has a port"),
        model: "test-model".to_string(),
        batch_size: 2,
        ..OllamaConfig::default()
    }
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
        max_concurrent_requests: 2,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    assert_eq!(client.permits.available_permits(), 2);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.retry_attempts, 5);
    assert_eq!(Embedder::model(&client), "nomic-embed-text:latest");
}

#[tokio::test]
async fn embed_sends_a_one_element_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": "test-model", "input": ["Gene"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.5, 0.25]]})))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    let embedding = client.embed("Gene").await.expect("embedding succeeds");

    assert_eq!(embedding, vec![0.5, 0.25]);
}

#[tokio::test]
async fn embed_batch_splits_by_batch_size() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["Gene", "Disease"]})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0], [0.0, 1.0]]})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["Gene.symbol"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.5, 0.5]]})))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    let texts = vec!["Gene".to_string(), "Disease".to_string(), "Gene.symbol".to_string()];
    let embeddings = client.embed_batch(&texts).await.expect("batch succeeds");

    assert_eq!(embeddings.len(), 3);
    assert_eq!(embeddings[0], vec![1.0, 0.0]);
    assert_eq!(embeddings[2], vec![0.5, 0.5]);
}

#[tokio::test]
async fn single_text_batch_uses_batch_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.6, 0.8]]})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [1.0, 0.0]})))
        .expect(0)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    let embeddings = client
        .embed_batch(&["which genes".to_string()])
        .await
        .expect("batch succeeds");

    assert_eq!(embeddings, vec![vec![0.6, 0.8]]);
}

#[tokio::test]
async fn batch_count_mismatch_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0]]})))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    let texts = vec!["Gene".to_string(), "Disease".to_string()];

    assert!(client.embed_batch(&texts).await.is_err());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    let result = client.embed("Gene").await;

    assert!(result.is_err());
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server))
        .expect("client builds")
        .with_retry_attempts(2);

    assert!(client.embed("Gene").await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_requires_configured_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "test-model", "size": 1024, "digest": "abc"}]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    assert!(client.health_check().is_ok());

    let mut other = config_for(&server);
    other.model = "missing-model".to_string();
    let client = OllamaClient::new(&other).expect("client builds");
    assert!(client.health_check().is_err());
}
