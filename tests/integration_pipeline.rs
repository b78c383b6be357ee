#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end ingestion and grounded answering against mocked Azure OpenAI
// endpoints and the in-memory store

use grounded_rag::chat::AzureOpenAiChat;
use grounded_rag::config::{Config, OpenAiConfig, StoreBackend};
use grounded_rag::database::{InMemoryStore, VectorStore};
use grounded_rag::embeddings::AzureOpenAiEmbedder;
use grounded_rag::ingest::{IngestionPipeline, Record};
use grounded_rag::memory::SemanticMemory;
use grounded_rag::prompt::PromptTemplate;
use grounded_rag::query::{LineSource, RetrievalQueryLoop};
use secrecy::SecretString;
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EMBEDDINGS_PATH: &str = "/openai/deployments/text-embedding-ada-002/embeddings";
const CHAT_PATH: &str = "/openai/deployments/gpt-4o/chat/completions";

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

fn test_config(endpoint: &str) -> Config {
    let mut config = Config {
        openai: OpenAiConfig {
            endpoint: endpoint.to_string(),
            embedding_deployment: "text-embedding-ada-002".to_string(),
            chat_deployment: "gpt-4o".to_string(),
            timeout_secs: 5,
            ..OpenAiConfig::default()
        },
        ..Config::default()
    };
    config.store.backend = StoreBackend::Memory;
    config.store.vector_dimension = 3;
    config.chat.pause_ms = 0;
    config
}

fn records() -> Vec<Record> {
    serde_json::from_value(json!([
        { "id": "1", "title": "Heat", "content": "A heist in Los Angeles" },
        { "id": "2", "title": "Interstellar", "content": "Travel through space" }
    ]))
    .expect("valid records")
}

async fn mock_embedding(server: &MockServer, input: &str, embedding: [f32; 3], calls: u64) {
    Mock::given(method("POST"))
        .and(path(EMBEDDINGS_PATH))
        .and(header("api-key", "test-key"))
        .and(body_partial_json(json!({ "input": input })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": embedding }]
        })))
        .expect(calls)
        .mount(server)
        .await;
}

fn sse_body(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        let event = json!({ "choices": [{ "index": 0, "delta": { "content": fragment } }] });
        body.push_str(&format!("data: {}\n\n", event));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test(flavor = "multi_thread")]
async fn ingest_twice_then_answer_with_grounding() {
    init_test_tracing();
    let server = MockServer::start().await;

    // each record is embedded exactly once across both runs
    mock_embedding(&server, "A heist in Los Angeles", [1.0, 0.0, 0.0], 1).await;
    mock_embedding(&server, "Travel through space", [0.0, 1.0, 0.0], 1).await;
    mock_embedding(&server, "Who robbed the bank?", [0.9, 0.1, 0.0], 1).await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(body_string_contains("Who robbed the bank?"))
        .and(body_string_contains("Heat"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&["Neil ", "McCauley's ", "crew."])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let key = SecretString::new("test-key".to_string());

    let embedder = Arc::new(
        AzureOpenAiEmbedder::new(&config, key.clone())
            .expect("embedder")
            .with_backoff_unit(Duration::from_millis(1)),
    );
    let store = Arc::new(InMemoryStore::new(3));
    let memory = SemanticMemory::new(embedder, store.clone());

    let pipeline = IngestionPipeline::new(memory.clone(), &config).with_progress(false);
    let first = pipeline.ingest(&records()).await.expect("first ingest");
    let second = pipeline.ingest(&records()).await.expect("second ingest");

    assert_eq!(first.embedded, 2);
    assert_eq!(second.embedded, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(
        store.count(&config.store.collection).await.expect("count"),
        2
    );

    let chat = Arc::new(AzureOpenAiChat::new(&config, key).expect("chat client"));
    let query_loop = RetrievalQueryLoop::new(memory, chat, PromptTemplate::default(), &config);

    let mut source = LineSource::new(Cursor::new(b"Who robbed the bank?\nexit\n".to_vec()));
    let mut out = Vec::new();
    let answered = query_loop.run(&mut source, &mut out).await.expect("run");

    assert_eq!(answered, 1);
    assert_eq!(
        String::from_utf8(out).expect("utf8"),
        "Neil McCauley's crew.\n"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_embedding_stops_ingestion() {
    init_test_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EMBEDDINGS_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let embedder = Arc::new(
        AzureOpenAiEmbedder::new(&config, SecretString::new("test-key".to_string()))
            .expect("embedder"),
    );
    let store = Arc::new(InMemoryStore::new(3));
    let pipeline =
        IngestionPipeline::new(SemanticMemory::new(embedder, store.clone()), &config)
            .with_progress(false);

    let result = pipeline.ingest(&records()).await;
    assert!(result.is_err());
    assert_eq!(
        store.count(&config.store.collection).await.expect("count"),
        0
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn workers_embed_records_concurrently() {
    init_test_tracing();
    let server = MockServer::start().await;
    let delay = Duration::from_millis(250);

    Mock::given(method("POST"))
        .and(path(EMBEDDINGS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(delay)
                .set_body_json(json!({ "data": [{ "index": 0, "embedding": [0.5, 0.5, 0.0] }] })),
        )
        .expect(8)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.ingest.workers = 8;

    let embedder = Arc::new(
        AzureOpenAiEmbedder::new(&config, SecretString::new("test-key".to_string()))
            .expect("embedder"),
    );
    let store = Arc::new(InMemoryStore::new(3));
    let pipeline =
        IngestionPipeline::new(SemanticMemory::new(embedder, store.clone()), &config)
            .with_progress(false);

    let records: Vec<Record> = (1..=8)
        .map(|id| {
            serde_json::from_value(json!({
                "id": id,
                "title": format!("Movie {}", id),
                "content": format!("Plot number {}", id)
            }))
            .expect("valid record")
        })
        .collect();

    let started = std::time::Instant::now();
    let report = pipeline.ingest(&records).await.expect("ingest");
    let elapsed = started.elapsed();

    assert_eq!(report.embedded, 8);
    assert_eq!(
        store.count(&config.store.collection).await.expect("count"),
        8
    );
    // eight sequential requests would take at least 2s
    assert!(
        elapsed < delay * 4,
        "eight workers took {:?} for eight delayed requests",
        elapsed
    );
}
