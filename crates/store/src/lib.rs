//! Dual-store adapters for the pubvec pipeline.
//!
//! Two independently-keyed stores back the system:
//!
//! - the **vector index store** ([`VectorStore`]), which owns vector-id
//!   assignment and answers k-nearest-neighbor queries, and
//! - the **relational record store** ([`ArticleStore`]), which owns row-id
//!   assignment and answers exact lookups.
//!
//! Both are SQLite-backed; connections are opened per operation so
//! concurrent batches never contend on a process-wide handle. The
//! correlation between the two id spaces is owned by the pipeline crate,
//! never by the stores themselves.

pub mod relational;
pub mod sqlite;
pub mod types;
pub mod vector;

pub use relational::{ArticleStore, SqliteArticleStore};
pub use types::{ArticleRecord, ArticleRow, IndexParams, Metric, VectorHit, VectorInsert};
pub use vector::{SqliteVectorStore, VectorStore};
