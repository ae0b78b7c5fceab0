//! SQLite-backed vector index store.
//!
//! The store exclusively owns vector-id assignment: ids are SQLite
//! auto-increment rowids, so a batch insert hands back ids in input order
//! and positional correlation with the caller's record batch is preserved.
//! Reads use an exact scan; `build_index` records the requested ANN
//! parameters without ever blocking inserts or searches.

use crate::sqlite::{self, bytes_to_embedding, embedding_to_bytes, placeholders, store_err};
use crate::types::{IndexParams, Metric, VectorHit, VectorInsert};
use pubvec_core::{AppError, AppResult};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Trait for vector index backends.
pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist. Idempotent; an existing
    /// collection with a different dimension or metric is a schema conflict.
    fn ensure_collection(&self, name: &str, dimension: usize, metric: Metric) -> AppResult<()>;

    /// Insert a batch of vectors atomically and return their assigned ids,
    /// in the same order as the input.
    fn insert_batch(&self, name: &str, vectors: &[VectorInsert]) -> AppResult<Vec<i64>>;

    /// Record ANN index parameters for the collection. Non-blocking;
    /// searches keep working (exact scan) before, during, and after.
    fn build_index(&self, name: &str, params: &IndexParams) -> AppResult<()>;

    /// Return at most `k` nearest neighbors by the collection's metric,
    /// ascending distance, ties broken by smaller id.
    fn search(&self, name: &str, query: &[f32], k: usize) -> AppResult<Vec<VectorHit>>;

    /// Delete vectors by id. Returns how many were removed.
    fn delete_by_ids(&self, name: &str, ids: &[i64]) -> AppResult<usize>;

    /// Find vectors carrying any of the given record keys, ordered by id.
    fn find_by_keys(&self, name: &str, keys: &[String]) -> AppResult<Vec<(i64, String)>>;

    /// Number of vectors in the collection.
    fn count(&self, name: &str) -> AppResult<u64>;
}

/// SQLite-backed [`VectorStore`] implementation.
///
/// A connection is opened per operation so concurrent batches never share a
/// handle.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    db_path: PathBuf,
}

impl SqliteVectorStore {
    /// Create a store backed by the database at `db_path`.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> AppResult<Connection> {
        let conn = sqlite::open(&self.db_path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                metric TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vectors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                record_key TEXT NOT NULL,
                title TEXT NOT NULL,
                embedding BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_vectors_collection ON vectors(collection);
            CREATE INDEX IF NOT EXISTS idx_vectors_key ON vectors(collection, record_key);

            CREATE TABLE IF NOT EXISTS ann_indexes (
                collection TEXT PRIMARY KEY,
                metric TEXT NOT NULL,
                nlist INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| store_err("Failed to initialize vector store schema", e))?;

        Ok(conn)
    }

    /// Look up a collection's declared dimension and metric.
    fn collection_schema(
        &self,
        conn: &Connection,
        name: &str,
    ) -> AppResult<Option<(usize, Metric)>> {
        let row = conn
            .query_row(
                "SELECT dimension, metric FROM collections WHERE name = ?1",
                params![name],
                |row| {
                    let dimension: i64 = row.get(0)?;
                    let metric: String = row.get(1)?;
                    Ok((dimension, metric))
                },
            )
            .optional()
            .map_err(|e| store_err("Failed to read collection schema", e))?;

        match row {
            None => Ok(None),
            Some((dimension, metric)) => {
                let metric = Metric::parse(&metric)?;
                Ok(Some((dimension as usize, metric)))
            }
        }
    }
}

impl VectorStore for SqliteVectorStore {
    fn ensure_collection(&self, name: &str, dimension: usize, metric: Metric) -> AppResult<()> {
        let conn = self.connect()?;

        if let Some((existing_dim, existing_metric)) = self.collection_schema(&conn, name)? {
            if existing_dim != dimension {
                return Err(AppError::SchemaConflict(format!(
                    "Collection '{}' exists with dimension {}, requested {}",
                    name, existing_dim, dimension
                )));
            }
            if existing_metric != metric {
                return Err(AppError::SchemaConflict(format!(
                    "Collection '{}' exists with metric {}, requested {}",
                    name,
                    existing_metric.as_str(),
                    metric.as_str()
                )));
            }
            return Ok(());
        }

        conn.execute(
            "INSERT INTO collections (name, dimension, metric) VALUES (?1, ?2, ?3)",
            params![name, dimension as i64, metric.as_str()],
        )
        .map_err(|e| store_err("Failed to create collection", e))?;

        tracing::debug!(
            "Created collection '{}' (dimension {}, metric {})",
            name,
            dimension,
            metric.as_str()
        );
        Ok(())
    }

    fn insert_batch(&self, name: &str, vectors: &[VectorInsert]) -> AppResult<Vec<i64>> {
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connect()?;

        let (dimension, _) = self.collection_schema(&conn, name)?.ok_or_else(|| {
            AppError::StoreUnavailable(format!("Collection '{}' has not been created", name))
        })?;

        for (i, vector) in vectors.iter().enumerate() {
            if vector.embedding.len() != dimension {
                return Err(AppError::Integrity(format!(
                    "Embedding {} has dimension {}, collection '{}' expects {}",
                    i,
                    vector.embedding.len(),
                    name,
                    dimension
                )));
            }
        }

        // One transaction: either every vector gets an id or none become
        // visible
        let tx = conn
            .transaction()
            .map_err(|e| store_err("Failed to begin vector insert", e))?;

        let mut ids = Vec::with_capacity(vectors.len());
        for vector in vectors {
            tx.execute(
                "INSERT INTO vectors (collection, record_key, title, embedding)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    name,
                    vector.record_key,
                    vector.title,
                    embedding_to_bytes(&vector.embedding),
                ],
            )
            .map_err(|e| store_err("Failed to insert vector", e))?;
            ids.push(tx.last_insert_rowid());
        }

        tx.commit()
            .map_err(|e| store_err("Failed to commit vector batch", e))?;

        tracing::debug!("Inserted {} vectors into '{}'", ids.len(), name);
        Ok(ids)
    }

    fn build_index(&self, name: &str, params_in: &IndexParams) -> AppResult<()> {
        let conn = self.connect()?;

        let (_, metric) = self.collection_schema(&conn, name)?.ok_or_else(|| {
            AppError::StoreUnavailable(format!("Collection '{}' has not been created", name))
        })?;

        // Reads stay on the exact scan, so recording the parameters is all
        // the build step has to block on
        conn.execute(
            "INSERT OR REPLACE INTO ann_indexes (collection, metric, nlist) VALUES (?1, ?2, ?3)",
            params![name, metric.as_str(), params_in.nlist],
        )
        .map_err(|e| store_err("Failed to record index parameters", e))?;

        tracing::debug!(
            "Recorded index for '{}' (metric {}, nlist {})",
            name,
            metric.as_str(),
            params_in.nlist
        );
        Ok(())
    }

    fn search(&self, name: &str, query: &[f32], k: usize) -> AppResult<Vec<VectorHit>> {
        let conn = self.connect()?;

        let Some((dimension, metric)) = self.collection_schema(&conn, name)? else {
            tracing::debug!("Search against missing collection '{}', empty result", name);
            return Ok(Vec::new());
        };

        if query.len() != dimension {
            return Err(AppError::Integrity(format!(
                "Query embedding dimension mismatch: expected {}, got {}",
                dimension,
                query.len()
            )));
        }

        if k == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = conn
            .prepare("SELECT id, embedding FROM vectors WHERE collection = ?1")
            .map_err(|e| store_err("Failed to prepare vector scan", e))?;

        let rows = stmt
            .query_map(params![name], |row| {
                let id: i64 = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((id, bytes))
            })
            .map_err(|e| store_err("Failed to scan vectors", e))?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, bytes) = row.map_err(|e| store_err("Failed to read vector row", e))?;
            let embedding = bytes_to_embedding(&bytes)?;
            hits.push(VectorHit {
                id,
                distance: metric.distance(query, &embedding),
            });
        }

        // Ascending distance, ties broken by smaller id for deterministic
        // ordering
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);

        tracing::debug!("Search in '{}' returned {} hits (k={})", name, hits.len(), k);
        Ok(hits)
    }

    fn delete_by_ids(&self, name: &str, ids: &[i64]) -> AppResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.connect()?;

        let sql = format!(
            "DELETE FROM vectors WHERE collection = ?1 AND id IN ({})",
            placeholders(ids.len())
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(ids.len() + 1);
        values.push(name.to_string().into());
        values.extend(ids.iter().map(|id| rusqlite::types::Value::from(*id)));

        let deleted = conn
            .execute(&sql, params_from_iter(values))
            .map_err(|e| store_err("Failed to delete vectors", e))?;

        tracing::debug!("Deleted {} vectors from '{}'", deleted, name);
        Ok(deleted)
    }

    fn find_by_keys(&self, name: &str, keys: &[String]) -> AppResult<Vec<(i64, String)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.connect()?;

        let sql = format!(
            "SELECT id, record_key FROM vectors
             WHERE collection = ?1 AND record_key IN ({}) ORDER BY id",
            placeholders(keys.len())
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(keys.len() + 1);
        values.push(name.to_string().into());
        values.extend(keys.iter().map(|k| rusqlite::types::Value::from(k.clone())));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| store_err("Failed to prepare key lookup", e))?;

        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| store_err("Failed to look up vectors by key", e))?;

        let mut found = Vec::new();
        for row in rows {
            found.push(row.map_err(|e| store_err("Failed to read key lookup row", e))?);
        }
        Ok(found)
    }

    fn count(&self, name: &str) -> AppResult<u64> {
        let conn = self.connect()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vectors WHERE collection = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(|e| store_err("Failed to count vectors", e))?;

        Ok(count as u64)
    }
}
