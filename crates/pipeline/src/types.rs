//! Ingest and search result types.

use pubvec_core::AppError;
use pubvec_store::ArticleRow;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Progress of a batch through the ingest protocol.
///
/// Each stage names the step that has completed (or, inside an
/// [`IngestFailure`], the step that failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    /// Batch accepted, nothing persisted yet
    Pending,
    /// Embeddings computed
    Embedded,
    /// Vectors written, ids assigned
    VectorStored,
    /// Relational rows written
    RowStored,
    /// Vector ids linked onto their rows
    Linked,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Embedded => "embedded",
            Self::VectorStored => "vector_stored",
            Self::RowStored => "row_stored",
            Self::Linked => "linked",
        }
    }
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful ingest.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReceipt {
    /// Journal identifier for this batch
    pub batch_id: Uuid,

    /// Records stored (after in-batch deduplication)
    pub records: usize,

    /// Records dropped as exact duplicates of an earlier batch entry
    pub deduplicated: usize,

    /// Vector ids assigned, positionally matching the stored records
    pub vector_ids: Vec<i64>,

    /// Non-fatal conditions encountered along the way
    pub warnings: Vec<String>,
}

/// An ingest batch that could not complete.
///
/// `stage` names the protocol step that failed. `orphaned_vectors` lists
/// vector ids left behind when compensation itself failed; an empty list
/// means the stores were restored to their pre-batch state.
#[derive(Debug, thiserror::Error)]
#[error("ingest batch {batch_id} failed at {stage}: {source}")]
pub struct IngestFailure {
    pub batch_id: Uuid,
    pub stage: IngestStage,

    /// Records in the batch after deduplication
    pub records: usize,

    /// Vector ids that remain without a relational counterpart
    pub orphaned_vectors: Vec<i64>,

    #[source]
    pub source: AppError,
}

/// One search result: a vector match joined to its relational row.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub vector_id: i64,
    pub distance: f32,
    pub article: ArticleRow,
}

/// A completed search.
///
/// `dropped` holds vector ids that matched in the index but had no
/// relational row at join time (the consistency window); they are excluded
/// from `hits` rather than surfaced as partial results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub dropped: Vec<i64>,
}
