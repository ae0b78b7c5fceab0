//! End-to-end pipeline tests against real SQLite-backed stores and the
//! deterministic trigram embedder.

use crate::coordinator::{Coordinator, CoordinatorOptions};
use crate::journal::{IngestJournal, JournalStage};
use crate::types::IngestStage;
use pubvec_core::config::EmbedField;
use pubvec_core::{AppError, AppResult};
use pubvec_embed::TrigramProvider;
use pubvec_store::{
    ArticleRecord, ArticleRow, ArticleStore, IndexParams, Metric, SqliteArticleStore,
    SqliteVectorStore, VectorHit, VectorInsert, VectorStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

const DIMS: usize = 32;
const COLLECTION: &str = "articles";

struct Fixture {
    _temp: TempDir,
    coordinator: Coordinator,
    vectors: Arc<SqliteVectorStore>,
    articles: Arc<SqliteArticleStore>,
    journal: IngestJournal,
}

fn fixture() -> Fixture {
    build_fixture(EmbedField::Title, false, false)
}

fn build_fixture(embed_field: EmbedField, fail_row_insert: bool, fail_vector_delete: bool) -> Fixture {
    let temp = TempDir::new().unwrap();
    let vectors = Arc::new(SqliteVectorStore::new(temp.path().join("vectors.db")));
    let articles = Arc::new(SqliteArticleStore::new(
        temp.path().join("articles.db"),
        "articles",
    ));
    let journal = IngestJournal::new(temp.path().join("journal.jsonl"));

    let vector_store: Arc<dyn VectorStore> = if fail_vector_delete {
        Arc::new(FailingVectorStore {
            inner: vectors.clone(),
        })
    } else {
        vectors.clone()
    };

    let article_store: Arc<dyn ArticleStore> = if fail_row_insert {
        Arc::new(FailingArticleStore {
            inner: articles.clone(),
        })
    } else {
        articles.clone()
    };

    let coordinator = Coordinator::new(
        Arc::new(TrigramProvider::new(DIMS)),
        vector_store,
        article_store,
        journal.clone(),
        CoordinatorOptions {
            collection: COLLECTION.to_string(),
            metric: Metric::L2,
            index_params: IndexParams::default(),
            embed_field,
        },
    );

    Fixture {
        _temp: temp,
        coordinator,
        vectors,
        articles,
        journal,
    }
}

fn record(title: &str) -> ArticleRecord {
    ArticleRecord {
        title: title.to_string(),
        pub_date: "2024-03-02".to_string(),
        abstract_text: format!("Abstract discussing {}.", title.to_lowercase()),
        author: "Rivera A, Chen L".to_string(),
        summary: Some(format!("Short summary of {}.", title.to_lowercase())),
    }
}

fn sample_batch() -> Vec<ArticleRecord> {
    vec![
        record("CRISPR gene editing shows promise in trials"),
        record("Deep learning models predict protein folding"),
        record("New antibiotic compound found in soil bacteria"),
    ]
}

fn rows_by_key(
    articles: &SqliteArticleStore,
    records: &[ArticleRecord],
) -> HashMap<String, ArticleRow> {
    let keys: Vec<String> = records.iter().map(|r| r.record_key()).collect();
    articles
        .fetch_by_keys(&keys)
        .unwrap()
        .into_iter()
        .map(|row| (row.record_key.clone(), row))
        .collect()
}

// --- failure-injecting store wrappers ---

/// Delegates everything except `insert_batch`, which always fails.
struct FailingArticleStore {
    inner: Arc<SqliteArticleStore>,
}

impl ArticleStore for FailingArticleStore {
    fn ensure_table(&self) -> AppResult<()> {
        self.inner.ensure_table()
    }

    fn ensure_column(&self, column: &str, column_type: &str) -> AppResult<bool> {
        self.inner.ensure_column(column, column_type)
    }

    fn insert_batch(&self, _records: &[ArticleRecord]) -> AppResult<usize> {
        Err(AppError::StoreUnavailable(
            "relational store connection refused".to_string(),
        ))
    }

    fn link_vector(&self, record_key: &str, vector_id: i64) -> AppResult<usize> {
        self.inner.link_vector(record_key, vector_id)
    }

    fn fetch_by_vector_ids(&self, vector_ids: &[i64]) -> AppResult<HashMap<i64, ArticleRow>> {
        self.inner.fetch_by_vector_ids(vector_ids)
    }

    fn fetch_by_keys(&self, keys: &[String]) -> AppResult<Vec<ArticleRow>> {
        self.inner.fetch_by_keys(keys)
    }

    fn count(&self) -> AppResult<u64> {
        self.inner.count()
    }
}

/// Delegates everything except `delete_by_ids`, which always fails.
struct FailingVectorStore {
    inner: Arc<SqliteVectorStore>,
}

impl VectorStore for FailingVectorStore {
    fn ensure_collection(&self, name: &str, dimension: usize, metric: Metric) -> AppResult<()> {
        self.inner.ensure_collection(name, dimension, metric)
    }

    fn insert_batch(&self, name: &str, vectors: &[VectorInsert]) -> AppResult<Vec<i64>> {
        self.inner.insert_batch(name, vectors)
    }

    fn build_index(&self, name: &str, params: &IndexParams) -> AppResult<()> {
        self.inner.build_index(name, params)
    }

    fn search(&self, name: &str, query: &[f32], k: usize) -> AppResult<Vec<VectorHit>> {
        self.inner.search(name, query, k)
    }

    fn delete_by_ids(&self, _name: &str, _ids: &[i64]) -> AppResult<usize> {
        Err(AppError::StoreUnavailable(
            "vector store connection refused".to_string(),
        ))
    }

    fn find_by_keys(&self, name: &str, keys: &[String]) -> AppResult<Vec<(i64, String)>> {
        self.inner.find_by_keys(name, keys)
    }

    fn count(&self, name: &str) -> AppResult<u64> {
        self.inner.count(name)
    }
}

// --- ingest ---

#[tokio::test]
async fn test_ingest_round_trip() {
    let fx = fixture();
    let batch = sample_batch();

    let receipt = fx.coordinator.ingest(batch.clone()).await.unwrap();
    assert_eq!(receipt.records, 3);
    assert_eq!(receipt.deduplicated, 0);
    assert_eq!(receipt.vector_ids.len(), 3);

    let response = fx
        .coordinator
        .search("CRISPR gene editing shows promise in trials", 10)
        .await
        .unwrap();
    assert!(response.dropped.is_empty());
    assert_eq!(response.hits.len(), 3);

    // The exact title embeds to the identical vector: distance zero, top hit
    let top = &response.hits[0];
    assert!(top.distance.abs() < 1e-5);
    assert_eq!(top.article.title, "CRISPR gene editing shows promise in trials");
    assert_eq!(top.article.vector_id, Some(top.vector_id));
}

#[tokio::test]
async fn test_ingest_positional_integrity() {
    let fx = fixture();
    let batch = sample_batch();

    let receipt = fx.coordinator.ingest(batch.clone()).await.unwrap();

    let rows = rows_by_key(&fx.articles, &batch);
    for (record, vector_id) in batch.iter().zip(&receipt.vector_ids) {
        let row = &rows[&record.record_key()];
        assert_eq!(row.vector_id, Some(*vector_id));
        assert_eq!(row.title, record.title);
    }
}

#[tokio::test]
async fn test_ingest_empty_batch_is_a_noop() {
    let fx = fixture();

    let receipt = fx.coordinator.ingest(Vec::new()).await.unwrap();
    assert_eq!(receipt.records, 0);
    assert!(receipt.vector_ids.is_empty());

    assert_eq!(fx.vectors.count(COLLECTION).unwrap(), 0);
    assert!(fx.journal.pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_ingest_collapses_in_batch_duplicates() {
    let fx = fixture();
    let mut batch = sample_batch();
    batch.push(batch[0].clone());
    batch.push(batch[1].clone());

    let receipt = fx.coordinator.ingest(batch).await.unwrap();
    assert_eq!(receipt.records, 3);
    assert_eq!(receipt.deduplicated, 2);
    assert_eq!(fx.vectors.count(COLLECTION).unwrap(), 3);
    assert_eq!(fx.articles.count().unwrap(), 3);
}

#[tokio::test]
async fn test_ingest_same_title_different_content_are_distinct() {
    let fx = fixture();
    let mut a = record("Shared headline");
    let mut b = record("Shared headline");
    a.abstract_text = "First study.".to_string();
    b.abstract_text = "Replication study.".to_string();

    let receipt = fx
        .coordinator
        .ingest(vec![a.clone(), b.clone()])
        .await
        .unwrap();
    assert_eq!(receipt.records, 2);
    assert_eq!(receipt.deduplicated, 0);

    let rows = rows_by_key(&fx.articles, &[a, b]);
    assert_eq!(rows.len(), 2);
    // Each row linked to its own vector despite the identical title
    let linked: std::collections::HashSet<_> =
        rows.values().map(|row| row.vector_id.unwrap()).collect();
    assert_eq!(linked.len(), 2);
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let fx = fixture();
    let batch = sample_batch();

    fx.coordinator.ingest(batch.clone()).await.unwrap();
    let second = fx.coordinator.ingest(batch.clone()).await.unwrap();

    assert!(second
        .warnings
        .iter()
        .any(|w| w.contains("replaced 3 previously stored vectors")));
    assert_eq!(fx.vectors.count(COLLECTION).unwrap(), 3);
    assert_eq!(fx.articles.count().unwrap(), 3);

    // Rows point at the replacement vectors
    let rows = rows_by_key(&fx.articles, &batch);
    for (record, vector_id) in batch.iter().zip(&second.vector_ids) {
        assert_eq!(rows[&record.record_key()].vector_id, Some(*vector_id));
    }
}

#[tokio::test]
async fn test_ingest_rejects_empty_title() {
    let fx = fixture();
    let mut bad = record("x");
    bad.title = "   ".to_string();

    let failure = fx.coordinator.ingest(vec![bad]).await.unwrap_err();
    assert_eq!(failure.stage, IngestStage::Pending);
    assert!(matches!(failure.source, AppError::Integrity(_)));
    assert_eq!(fx.vectors.count(COLLECTION).unwrap(), 0);
}

#[tokio::test]
async fn test_embed_field_summary_requires_summary() {
    let fx = build_fixture(EmbedField::Summary, false, false);
    let mut no_summary = record("Article without a summary");
    no_summary.summary = None;

    let failure = fx.coordinator.ingest(vec![no_summary]).await.unwrap_err();
    assert_eq!(failure.stage, IngestStage::Pending);
    assert!(matches!(failure.source, AppError::Integrity(_)));
}

#[tokio::test]
async fn test_embed_field_abstract_changes_search_space() {
    let fx = build_fixture(EmbedField::Abstract, false, false);
    let batch = sample_batch();
    fx.coordinator.ingest(batch.clone()).await.unwrap();

    // Querying with the abstract text must return its record exactly
    let response = fx
        .coordinator
        .search(&batch[1].abstract_text, 1)
        .await
        .unwrap();
    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].article.title, batch[1].title);
    assert!(response.hits[0].distance.abs() < 1e-5);
}

// --- partial failure ---

#[tokio::test]
async fn test_relational_failure_compensates_vectors() {
    let fx = build_fixture(EmbedField::Title, true, false);

    let failure = fx.coordinator.ingest(sample_batch()).await.unwrap_err();
    assert_eq!(failure.stage, IngestStage::RowStored);
    assert!(failure.orphaned_vectors.is_empty());
    assert!(matches!(failure.source, AppError::StoreUnavailable(_)));

    // Compensation removed the batch's vectors; neither store retains it
    assert_eq!(fx.vectors.count(COLLECTION).unwrap(), 0);
    assert_eq!(fx.articles.count().unwrap(), 0);
    assert!(fx.journal.pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_compensation_reports_orphans() {
    let fx = build_fixture(EmbedField::Title, true, true);

    let failure = fx.coordinator.ingest(sample_batch()).await.unwrap_err();
    assert_eq!(failure.stage, IngestStage::RowStored);
    assert_eq!(failure.orphaned_vectors.len(), 3);

    // Orphans remain in the vector store, zero relational rows
    assert_eq!(fx.vectors.count(COLLECTION).unwrap(), 3);
    assert_eq!(fx.articles.count().unwrap(), 0);
}

// --- search ---

#[tokio::test]
async fn test_search_drops_rowless_vectors() {
    let fx = fixture();
    fx.coordinator.ingest(sample_batch()).await.unwrap();

    // A vector with no relational counterpart, as during another batch's
    // consistency window
    let orphan_ids = fx
        .vectors
        .insert_batch(
            COLLECTION,
            &[VectorInsert {
                embedding: vec![0.0; DIMS],
                record_key: "orphan-key".to_string(),
                title: "Orphan".to_string(),
            }],
        )
        .unwrap();

    let response = fx
        .coordinator
        .search("CRISPR gene editing shows promise in trials", 10)
        .await
        .unwrap();
    assert_eq!(response.hits.len(), 3);
    assert_eq!(response.dropped, orphan_ids);
}

#[tokio::test]
async fn test_search_empty_stores() {
    let fx = fixture();
    let response = fx.coordinator.search("anything", 5).await.unwrap();
    assert!(response.hits.is_empty());
    assert!(response.dropped.is_empty());
}

#[tokio::test]
async fn test_search_k_bounds_results() {
    let fx = fixture();
    fx.coordinator.ingest(sample_batch()).await.unwrap();

    let response = fx.coordinator.search("protein folding", 2).await.unwrap();
    assert_eq!(response.hits.len(), 2);
}

// --- recovery ---

#[tokio::test]
async fn test_recover_deletes_vectors_without_rows() {
    let fx = fixture();

    // Simulate a crash after the vector write: vectors and journal entries
    // exist, rows were never written
    let batch = sample_batch();
    let keys: Vec<String> = batch.iter().map(|r| r.record_key()).collect();
    fx.vectors
        .ensure_collection(COLLECTION, DIMS, Metric::L2)
        .unwrap();
    let ids = fx
        .vectors
        .insert_batch(
            COLLECTION,
            &batch
                .iter()
                .zip(&keys)
                .map(|(r, k)| VectorInsert {
                    embedding: vec![0.1; DIMS],
                    record_key: k.clone(),
                    title: r.title.clone(),
                })
                .collect::<Vec<_>>(),
        )
        .unwrap();

    let batch_id = Uuid::new_v4();
    fx.journal
        .append(batch_id, JournalStage::Pending, &keys, &[])
        .unwrap();
    fx.journal
        .append(batch_id, JournalStage::Embedded, &keys, &[])
        .unwrap();
    fx.journal
        .append(batch_id, JournalStage::VectorStored, &keys, &ids)
        .unwrap();

    let report = fx.coordinator.recover().await.unwrap();
    assert_eq!(report.batches, 1);
    assert_eq!(report.deleted_vectors, 3);
    assert_eq!(report.relinked, 0);

    assert_eq!(fx.vectors.count(COLLECTION).unwrap(), 0);
    assert!(fx.journal.pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_recover_completes_missing_links() {
    let fx = fixture();

    // Crash after rows were written but before the link step
    let batch = sample_batch();
    let keys: Vec<String> = batch.iter().map(|r| r.record_key()).collect();
    fx.vectors
        .ensure_collection(COLLECTION, DIMS, Metric::L2)
        .unwrap();
    let ids = fx
        .vectors
        .insert_batch(
            COLLECTION,
            &batch
                .iter()
                .zip(&keys)
                .map(|(r, k)| VectorInsert {
                    embedding: vec![0.2; DIMS],
                    record_key: k.clone(),
                    title: r.title.clone(),
                })
                .collect::<Vec<_>>(),
        )
        .unwrap();
    fx.articles.ensure_table().unwrap();
    fx.articles.insert_batch(&batch).unwrap();

    let batch_id = Uuid::new_v4();
    fx.journal
        .append(batch_id, JournalStage::RowStored, &keys, &ids)
        .unwrap();

    let report = fx.coordinator.recover().await.unwrap();
    assert_eq!(report.batches, 1);
    assert_eq!(report.relinked, 3);
    assert_eq!(report.deleted_vectors, 0);

    let rows = rows_by_key(&fx.articles, &batch);
    for (record, vector_id) in batch.iter().zip(&ids) {
        assert_eq!(rows[&record.record_key()].vector_id, Some(*vector_id));
    }
    assert!(fx.journal.pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_recover_with_clean_journal() {
    let fx = fixture();
    fx.coordinator.ingest(sample_batch()).await.unwrap();

    let report = fx.coordinator.recover().await.unwrap();
    assert_eq!(report.batches, 0);
}

// --- stats ---

#[tokio::test]
async fn test_stats_reflect_stores() {
    let fx = fixture();
    fx.coordinator.ingest(sample_batch()).await.unwrap();

    let stats = fx.coordinator.stats().unwrap();
    assert_eq!(stats.vectors, 3);
    assert_eq!(stats.rows, 3);
    assert_eq!(stats.pending_batches, 0);
}
