use super::*;
use crate::database::VectorStore;
use crate::embeddings::Embedder;
use crate::testing::{FlakyStore, KeywordEmbedder};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

const KEYWORDS: [&str; 3] = ["heist", "space", "romance"];
const COLLECTION: &str = "sk-rag-container";

fn records() -> Vec<Record> {
    [
        ("1", "Heat", "A heist in Los Angeles"),
        ("2", "Interstellar", "Travel through space"),
        ("3", "Titanic", "A romance on a ship"),
    ]
    .into_iter()
    .map(|(id, title, content)| Record {
        id: id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
    })
    .collect()
}

fn pipeline(
    embedder: &Arc<KeywordEmbedder>,
    store: &Arc<FlakyStore>,
) -> IngestionPipeline {
    let memory = SemanticMemory::new(embedder.clone(), store.clone());
    IngestionPipeline::new(memory, &Config::default()).with_progress(false)
}

fn write_data(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(json.as_bytes()).expect("write data");
    file
}

#[tokio::test]
async fn ingests_every_new_record() {
    let embedder = Arc::new(KeywordEmbedder::new(&KEYWORDS));
    let store = Arc::new(FlakyStore::new(embedder.dimension()));

    let report = pipeline(&embedder, &store)
        .ingest(&records())
        .await
        .expect("ingest");

    assert_eq!(report.total, 3);
    assert_eq!(report.embedded, 3);
    assert_eq!(report.skipped, 0);
    assert!(report.is_complete());
    assert_eq!(embedder.call_count(), 3);
    assert_eq!(store.count(COLLECTION).await.expect("count"), 3);

    let stored = store.inner.get(COLLECTION, "2").expect("record 2 stored");
    assert_eq!(stored.text, "Travel through space");
    assert_eq!(stored.description, "Interstellar");
}

#[tokio::test]
async fn second_run_makes_no_embedding_calls() {
    let embedder = Arc::new(KeywordEmbedder::new(&KEYWORDS));
    let store = Arc::new(FlakyStore::new(embedder.dimension()));
    let pipeline = pipeline(&embedder, &store);

    pipeline.ingest(&records()).await.expect("first run");
    let calls_after_first = embedder.call_count();

    let report = pipeline.ingest(&records()).await.expect("second run");

    assert_eq!(embedder.call_count(), calls_after_first);
    assert_eq!(report.embedded, 0);
    assert_eq!(report.skipped, 3);
    assert_eq!(store.count(COLLECTION).await.expect("count"), 3);
}

#[tokio::test]
async fn only_new_records_are_embedded() {
    let embedder = Arc::new(KeywordEmbedder::new(&KEYWORDS));
    let store = Arc::new(FlakyStore::new(embedder.dimension()));
    let pipeline = pipeline(&embedder, &store);

    let mut all = records();
    let last = all.pop().expect("three records");
    pipeline.ingest(&all).await.expect("partial run");
    all.push(last);

    let report = pipeline.ingest(&all).await.expect("full run");
    assert_eq!(report.embedded, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(embedder.call_count(), 3);
}

#[tokio::test]
async fn failed_check_is_treated_as_absent() {
    let embedder = Arc::new(KeywordEmbedder::new(&KEYWORDS));
    let mut flaky = FlakyStore::new(embedder.dimension());
    flaky.failing_lookups = vec!["2"];
    let store = Arc::new(flaky);
    let pipeline = pipeline(&embedder, &store);

    pipeline.ingest(&records()).await.expect("first run");
    let report = pipeline.ingest(&records()).await.expect("second run");

    // record 2 cannot be confirmed, so it is stored again, still only once
    assert_eq!(report.check_failures, 1);
    assert_eq!(report.embedded, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(store.count(COLLECTION).await.expect("count"), 3);
}

#[tokio::test]
async fn upsert_failure_is_fatal_by_default() {
    let embedder = Arc::new(KeywordEmbedder::new(&KEYWORDS));
    let mut flaky = FlakyStore::new(embedder.dimension());
    flaky.failing_upserts = vec!["2"];
    let store = Arc::new(flaky);

    let err = pipeline(&embedder, &store)
        .ingest(&records())
        .await
        .expect_err("upsert failure should stop the run");
    assert!(matches!(err, RagError::Database(_)));

    // sequential run: the record after the failure was never attempted
    assert_eq!(store.inner.lookup(COLLECTION, "3").await, Existence::NotFound);
}

#[tokio::test]
async fn failures_are_collected_when_continuing() {
    let embedder = Arc::new(KeywordEmbedder::new(&KEYWORDS).failing_on("romance"));
    let mut flaky = FlakyStore::new(embedder.dimension());
    flaky.failing_upserts = vec!["1"];
    let store = Arc::new(flaky);

    let report = pipeline(&embedder, &store)
        .with_continue_on_error(true)
        .ingest(&records())
        .await
        .expect("run should complete");

    assert_eq!(report.embedded, 1);
    assert!(!report.is_complete());
    let failed_ids: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(failed_ids, vec!["1", "3"]);
    assert_eq!(store.count(COLLECTION).await.expect("count"), 1);
}

#[tokio::test]
async fn concurrent_workers_store_every_record_once() {
    let embedder = Arc::new(KeywordEmbedder::new(&KEYWORDS));
    let store = Arc::new(FlakyStore::new(embedder.dimension()));

    let many: Vec<Record> = (0..20)
        .map(|i| Record {
            id: format!("movie-{i}"),
            title: format!("Movie {i}"),
            content: format!("a space heist number {i}"),
        })
        .collect();

    let report = pipeline(&embedder, &store)
        .with_workers(4)
        .ingest(&many)
        .await
        .expect("ingest");

    assert_eq!(report.embedded, 20);
    assert_eq!(store.count(COLLECTION).await.expect("count"), 20);
}

#[tokio::test]
async fn empty_record_set() {
    let embedder = Arc::new(KeywordEmbedder::new(&KEYWORDS));
    let store = Arc::new(FlakyStore::new(embedder.dimension()));

    let report = pipeline(&embedder, &store)
        .ingest(&[])
        .await
        .expect("ingest");
    assert_eq!(report, IngestionReport::default());
}

#[test]
fn policy_treats_only_found_as_present() {
    assert!(!needs_ingestion(&Existence::Found));
    assert!(needs_ingestion(&Existence::NotFound));
    assert!(needs_ingestion(&Existence::CheckFailed("timeout".to_string())));
}

#[test]
fn load_records_from_file() {
    let file = write_data(
        r#"[
            {"id": "1", "title": "Heat", "content": "A heist"},
            {"id": 2, "title": "Alien", "content": "In space"}
        ]"#,
    );

    let records = load_records(file.path()).expect("records should load");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].title, "Heat");
    assert_eq!(records[1].id, "2");
}

#[test]
fn load_records_rejects_duplicate_ids() {
    let file = write_data(
        r#"[
            {"id": "1", "title": "Heat", "content": "A heist"},
            {"id": "1", "title": "Heat again", "content": "Another heist"}
        ]"#,
    );

    let err = load_records(file.path()).expect_err("duplicate ids");
    assert!(matches!(err, RagError::Config(ref msg) if msg.contains("Duplicate record id 1")));
}

#[test]
fn load_records_rejects_malformed_input() {
    let file = write_data(r#"{"id": "1"}"#);
    assert!(matches!(load_records(file.path()), Err(RagError::Config(_))));

    let missing = load_records(Path::new("/nonexistent/data.json"));
    assert!(matches!(missing, Err(RagError::Config(_))));
}
