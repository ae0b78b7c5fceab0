//! Record and vector type definitions shared by both store adapters.

use pubvec_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One ingested document, as produced by the upstream crawler/summarizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Article title (non-empty)
    pub title: String,

    /// Publication date, kept as the upstream string form
    pub pub_date: String,

    /// Article abstract
    #[serde(rename = "abstract")]
    pub abstract_text: String,

    /// Author line
    pub author: String,

    /// Optional generated summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ArticleRecord {
    /// Opaque correlation key carried through both stores.
    ///
    /// SHA-256 over the content fields, so identical records share a key
    /// (which is what makes re-ingestion idempotent) and records that differ
    /// anywhere get distinct keys even when their titles collide.
    pub fn record_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.pub_date.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.abstract_text.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.author.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.summary.as_deref().unwrap_or("").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Reject records the pipeline cannot key.
    pub fn validate(&self) -> AppResult<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::Integrity(
                "Article record has an empty title".to_string(),
            ));
        }
        Ok(())
    }
}

/// The persisted form of an [`ArticleRecord`], including the row id assigned
/// by the relational store and the vector id set by the link step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRow {
    /// Auto-increment row id (owned by the relational store)
    pub id: i64,

    /// Correlation key (UNIQUE in the table)
    pub record_key: String,

    pub title: String,
    pub pub_date: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub author: String,
    pub summary: Option<String>,

    /// Id of the corresponding vector; NULL until the link step completes
    pub vector_id: Option<i64>,
}

/// Distance metric for a vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    L2,
    Cosine,
}

impl Metric {
    /// Parse from a config string.
    pub fn parse(s: &str) -> AppResult<Self> {
        match s.to_lowercase().as_str() {
            "l2" => Ok(Self::L2),
            "cosine" => Ok(Self::Cosine),
            other => Err(AppError::Config(format!(
                "Unknown distance metric: {}. Supported: l2, cosine",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::Cosine => "cosine",
        }
    }

    /// Distance between two equal-length vectors under this metric.
    ///
    /// Smaller is closer for both metrics (cosine is expressed as
    /// `1 - similarity`).
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::L2 => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            Self::Cosine => {
                let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (norm_a * norm_b)
            }
        }
    }
}

/// One vector queued for insertion into a collection.
#[derive(Debug, Clone)]
pub struct VectorInsert {
    /// Embedding of the collection's fixed dimension
    pub embedding: Vec<f32>,

    /// Correlation key of the source record
    pub record_key: String,

    /// Denormalized title, kept for operator inspection
    pub title: String,
}

/// One k-NN search hit, before the relational join.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    /// Vector id assigned at insert time
    pub id: i64,

    /// Distance to the query under the collection's metric
    pub distance: f32,
}

/// Parameters recorded for the approximate-nearest-neighbor index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexParams {
    /// Neighbor-list size (IVF-style)
    pub nlist: u32,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self { nlist: 128 }
    }
}
