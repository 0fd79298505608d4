#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Index build and retrieval against a mock Ollama server

use std::sync::Arc;
use std::time::Duration;

use schema_slice::commands::show_status;
use schema_slice::config::{Config, OllamaConfig, SchemaConfig};
use schema_slice::embeddings::{Embedder, OllamaClient};
use schema_slice::index::{IndexBuilder, IndexPaths};
use schema_slice::retriever::{RetrievalConfig, SchemaRetriever};
use serde_json::{Value, json};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const DIMENSION: usize = 256;

const GENE_SCHEMA: &str = r#"{
    "NodeTypes": {
        "Gene": {"symbol": "string"},
        "Disease": {"name": "string"},
        "Drug": {"name": "string"},
        "Pathway": {"name": "string"}
    },
    "RelationshipTypes": {
        "Gene_causes_Disease": {"_endpoints": ["Gene", "Disease"]},
        "Drug_treats_Disease": {"_endpoints": ["Drug", "Disease"]}
    }
}"#;

/// Answers batch embedding requests with hashed bag-of-words vectors
struct BagOfWords;

impl BagOfWords {
    fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; DIMENSION];
        for word in text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let hash = word
                .to_ascii_lowercase()
                .bytes()
                .fold(5381_usize, |hash, byte| {
                    hash.wrapping_mul(33) ^ usize::from(byte)
                });
            vector[hash % DIMENSION] += 1.0;
        }
        vector
    }
}

impl Respond for BagOfWords {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = request.body_json::<Value>() else {
            return ResponseTemplate::new(400);
        };

        if let Some(inputs) = body["input"].as_array() {
            let embeddings: Vec<Vec<f32>> = inputs
                .iter()
                .map(|input| Self::vector(input.as_str().unwrap_or_default()))
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
        } else {
            ResponseTemplate::new(400)
        }
    }
}

async fn ollama_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(BagOfWords)
        .mount(&server)
        .await;
    server
}

fn client_for(server: &MockServer) -> OllamaClient {
    let uri = Url::parse(&server.uri()).expect("mock server uri parses");
    let config = OllamaConfig {
        host: uri.host_str().expect("mock server has a host").to_string(),
        port: uri.port().expect("mock server has a port"),
        model: "bag-of-words".to_string(),
        batch_size: 4,
        max_concurrent_requests: 2,
        ..OllamaConfig::default()
    };
    OllamaClient::new(&config)
        .expect("Failed to create client")
        .with_retry_attempts(1)
}

fn write_schema(dir: &TempDir) -> IndexPaths {
    let schema_path = dir.path().join("graph.json");
    std::fs::write(&schema_path, GENE_SCHEMA).expect("should write schema");
    IndexPaths::for_schema(schema_path)
}

#[tokio::test]
async fn builds_index_and_retrieves_through_ollama() {
    let server = ollama_server().await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    let paths = write_schema(&temp_dir);

    let embedder: Arc<dyn Embedder> = Arc::new(client_for(&server));
    let builder = IndexBuilder::new(paths.clone(), embedder).with_batching(4, 2);
    let retriever = SchemaRetriever::with_builder(builder, RetrievalConfig::default());

    let outcome = retriever.reload(false).await.expect("index builds");
    assert!(outcome.was_built());
    assert!(paths.rows.exists());
    assert!(paths.index.exists());

    let slice = retriever
        .retrieve("which genes cause disease")
        .await
        .expect("retrieval succeeds");
    assert!(!slice.full_schema);
    assert!(slice.schema.is_relationship_type("Gene_causes_Disease"));
    assert!(slice.schema.is_node_type("Gene"));
    assert!(slice.schema.is_node_type("Disease"));
    assert!(!slice.schema.is_node_type("Pathway"));

    let report = retriever.builder().inspect().await.expect("report");
    assert!(report.is_consistent, "{}", report.summary());
    assert_eq!(report.stored_vectors, 10);
    assert_eq!(report.model.as_deref(), Some("bag-of-words"));
}

#[tokio::test]
async fn server_errors_abort_the_build() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    let paths = write_schema(&temp_dir);

    let builder = IndexBuilder::new(paths.clone(), Arc::new(client_for(&server)));
    assert!(builder.ensure_index(false).await.is_err());
    assert!(!paths.rows.exists());
    assert!(!paths.lock_file().exists());

    let retriever = SchemaRetriever::with_builder(builder, RetrievalConfig::default());
    let slice = retriever
        .retrieve_or_full("which genes cause disease")
        .await
        .expect("falls back");
    assert!(slice.full_schema);
    assert_eq!(slice.schema.node_types().len(), 4);
}

#[tokio::test]
async fn status_report_reaches_ollama_from_a_single_threaded_runtime() {
    let server = ollama_server().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "bag-of-words", "size": 1024, "digest": "abc"}]
        })))
        .expect(1..)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    let paths = write_schema(&temp_dir);

    let uri = Url::parse(&server.uri()).expect("mock server uri parses");
    let config = Config {
        ollama: OllamaConfig {
            host: uri.host_str().expect("mock server has a host").to_string(),
            port: uri.port().expect("mock server has a port"),
            model: "bag-of-words".to_string(),
            ..OllamaConfig::default()
        },
        schema: SchemaConfig {
            schema_path: Some(paths.schema),
            ..SchemaConfig::default()
        },
        ..Config::default()
    };

    tokio::time::timeout(Duration::from_secs(30), show_status(&config))
        .await
        .expect("status report finishes")
        .expect("status report succeeds");
}
