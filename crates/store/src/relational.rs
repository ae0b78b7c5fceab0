//! SQLite-backed relational record store.
//!
//! Owns row-id assignment for article records. The `vector_id` column is not
//! part of the base schema; it is added on demand by the link step, so a
//! table created by an older deployment upgrades in place.

use crate::sqlite::{self, placeholders, store_err};
use crate::types::{ArticleRecord, ArticleRow};
use pubvec_core::{AppError, AppResult};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Trait for relational record backends.
pub trait ArticleStore: Send + Sync {
    /// Create the article table if it does not exist. Idempotent.
    fn ensure_table(&self) -> AppResult<()>;

    /// Add a column if the table does not already have it. Returns `true`
    /// when the column was added, `false` when it was already present.
    fn ensure_column(&self, column: &str, column_type: &str) -> AppResult<bool>;

    /// Insert a batch of records atomically, keyed by their correlation key.
    /// Records whose key is already present are left untouched. Returns the
    /// number of rows actually inserted.
    fn insert_batch(&self, records: &[ArticleRecord]) -> AppResult<usize>;

    /// Set the vector id on the row carrying `record_key`. Returns the
    /// number of rows updated (0 when no such row exists).
    fn link_vector(&self, record_key: &str, vector_id: i64) -> AppResult<usize>;

    /// Fetch rows whose vector id is among `vector_ids`, keyed by vector id.
    fn fetch_by_vector_ids(&self, vector_ids: &[i64]) -> AppResult<HashMap<i64, ArticleRow>>;

    /// Fetch rows by correlation key, ordered by row id.
    fn fetch_by_keys(&self, keys: &[String]) -> AppResult<Vec<ArticleRow>>;

    /// Number of rows in the table.
    fn count(&self) -> AppResult<u64>;
}

/// SQLite-backed [`ArticleStore`] implementation.
///
/// Like the vector store, a connection is opened per operation.
#[derive(Debug, Clone)]
pub struct SqliteArticleStore {
    db_path: PathBuf,
    table: String,
}

impl SqliteArticleStore {
    /// Create a store backed by the database at `db_path`, writing rows to
    /// `table`.
    pub fn new(db_path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            table: table.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn connect(&self) -> AppResult<Connection> {
        sqlite::open(&self.db_path)
    }

    fn has_column(&self, conn: &Connection, column: &str) -> AppResult<bool> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", self.table))
            .map_err(|e| store_err("Failed to inspect table schema", e))?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e| store_err("Failed to read table schema", e))?;

        for name in names {
            let name = name.map_err(|e| store_err("Failed to read column name", e))?;
            if name == column {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn row_from(&self, row: &Row<'_>, with_vector_id: bool) -> rusqlite::Result<ArticleRow> {
        Ok(ArticleRow {
            id: row.get(0)?,
            record_key: row.get(1)?,
            title: row.get(2)?,
            pub_date: row.get(3)?,
            abstract_text: row.get(4)?,
            author: row.get(5)?,
            summary: row.get(6)?,
            vector_id: if with_vector_id { row.get(7)? } else { None },
        })
    }

    /// SELECT column list, substituting NULL for `vector_id` when the column
    /// has not been added yet.
    fn select_columns(&self, with_vector_id: bool) -> &'static str {
        if with_vector_id {
            "id, record_key, title, pub_date, abstract, author, summary, vector_id"
        } else {
            "id, record_key, title, pub_date, abstract, author, summary, NULL AS vector_id"
        }
    }
}

impl ArticleStore for SqliteArticleStore {
    fn ensure_table(&self) -> AppResult<()> {
        let conn = self.connect()?;

        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_key TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                pub_date TEXT NOT NULL,
                abstract TEXT NOT NULL,
                author TEXT NOT NULL,
                summary TEXT
            );
            "#,
            table = self.table
        ))
        .map_err(|e| store_err("Failed to create article table", e))?;

        Ok(())
    }

    fn ensure_column(&self, column: &str, column_type: &str) -> AppResult<bool> {
        let conn = self.connect()?;

        if self.has_column(&conn, column)? {
            return Ok(false);
        }

        conn.execute(
            &format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                self.table, column, column_type
            ),
            [],
        )
        .map_err(|e| store_err("Failed to add column", e))?;

        tracing::debug!("Added column '{}' to table '{}'", column, self.table);
        Ok(true)
    }

    fn insert_batch(&self, records: &[ArticleRecord]) -> AppResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect()?;

        let tx = conn
            .transaction()
            .map_err(|e| store_err("Failed to begin row insert", e))?;

        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {} (record_key, title, pub_date, abstract, author, summary)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(record_key) DO NOTHING",
                    self.table
                ))
                .map_err(|e| store_err("Failed to prepare row insert", e))?;

            for record in records {
                inserted += stmt
                    .execute(params![
                        record.record_key(),
                        record.title,
                        record.pub_date,
                        record.abstract_text,
                        record.author,
                        record.summary,
                    ])
                    .map_err(|e| store_err("Failed to insert article row", e))?;
            }
        }

        tx.commit()
            .map_err(|e| store_err("Failed to commit row batch", e))?;

        tracing::debug!(
            "Inserted {} of {} rows into '{}'",
            inserted,
            records.len(),
            self.table
        );
        Ok(inserted)
    }

    fn link_vector(&self, record_key: &str, vector_id: i64) -> AppResult<usize> {
        let conn = self.connect()?;

        if !self.has_column(&conn, "vector_id")? {
            return Err(AppError::SchemaConflict(format!(
                "Table '{}' has no vector_id column",
                self.table
            )));
        }

        let updated = conn
            .execute(
                &format!(
                    "UPDATE {} SET vector_id = ?1 WHERE record_key = ?2",
                    self.table
                ),
                params![vector_id, record_key],
            )
            .map_err(|e| store_err("Failed to link vector id", e))?;

        Ok(updated)
    }

    fn fetch_by_vector_ids(&self, vector_ids: &[i64]) -> AppResult<HashMap<i64, ArticleRow>> {
        if vector_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.connect()?;

        // Without the column no row can match any vector id
        if !self.has_column(&conn, "vector_id")? {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE vector_id IN ({})",
            self.select_columns(true),
            self.table,
            placeholders(vector_ids.len())
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| store_err("Failed to prepare vector-id lookup", e))?;

        let rows = stmt
            .query_map(
                params_from_iter(vector_ids.iter().copied()),
                |row| self.row_from(row, true),
            )
            .map_err(|e| store_err("Failed to fetch rows by vector id", e))?;

        let mut by_vector_id = HashMap::new();
        for row in rows {
            let row = row.map_err(|e| store_err("Failed to read article row", e))?;
            if let Some(vector_id) = row.vector_id {
                by_vector_id.insert(vector_id, row);
            }
        }
        Ok(by_vector_id)
    }

    fn fetch_by_keys(&self, keys: &[String]) -> AppResult<Vec<ArticleRow>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.connect()?;
        let with_vector_id = self.has_column(&conn, "vector_id")?;

        let sql = format!(
            "SELECT {} FROM {} WHERE record_key IN ({}) ORDER BY id",
            self.select_columns(with_vector_id),
            self.table,
            placeholders(keys.len())
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| store_err("Failed to prepare key lookup", e))?;

        let rows = stmt
            .query_map(params_from_iter(keys.iter().cloned()), |row| {
                self.row_from(row, with_vector_id)
            })
            .map_err(|e| store_err("Failed to fetch rows by key", e))?;

        let mut fetched = Vec::new();
        for row in rows {
            fetched.push(row.map_err(|e| store_err("Failed to read article row", e))?);
        }
        Ok(fetched)
    }

    fn count(&self) -> AppResult<u64> {
        let conn = self.connect()?;

        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(|e| store_err("Failed to count rows", e))?;

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SqliteArticleStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteArticleStore::new(temp.path().join("articles.db"), "articles");
        store.ensure_table().unwrap();
        (temp, store)
    }

    fn record(title: &str) -> ArticleRecord {
        ArticleRecord {
            title: title.to_string(),
            pub_date: "2024-01-15".to_string(),
            abstract_text: format!("Abstract for {}", title),
            author: "Doe J".to_string(),
            summary: Some(format!("Summary of {}", title)),
        }
    }

    #[test]
    fn test_ensure_table_idempotent() {
        let (_temp, store) = store();
        store.ensure_table().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_insert_and_fetch_by_keys() {
        let (_temp, store) = store();
        let records = vec![record("First"), record("Second")];

        let inserted = store.insert_batch(&records).unwrap();
        assert_eq!(inserted, 2);

        let keys: Vec<String> = records.iter().map(|r| r.record_key()).collect();
        let rows = store.fetch_by_keys(&keys).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "First");
        assert_eq!(rows[0].abstract_text, "Abstract for First");
        assert_eq!(rows[0].vector_id, None);
        assert!(rows[0].id < rows[1].id);
    }

    #[test]
    fn test_insert_batch_skips_existing_keys() {
        let (_temp, store) = store();
        let rec = record("Repeat");

        assert_eq!(store.insert_batch(&[rec.clone()]).unwrap(), 1);
        assert_eq!(store.insert_batch(&[rec.clone()]).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_ensure_column_lazy_add() {
        let (_temp, store) = store();

        assert!(store.ensure_column("vector_id", "INTEGER").unwrap());
        assert!(!store.ensure_column("vector_id", "INTEGER").unwrap());
    }

    #[test]
    fn test_link_vector_requires_column() {
        let (_temp, store) = store();
        store.insert_batch(&[record("Unlinked")]).unwrap();

        let err = store.link_vector(&record("Unlinked").record_key(), 7).unwrap_err();
        assert!(matches!(err, AppError::SchemaConflict(_)));
    }

    #[test]
    fn test_link_and_fetch_by_vector_ids() {
        let (_temp, store) = store();
        let rec = record("Linked");
        store.insert_batch(&[rec.clone()]).unwrap();
        store.ensure_column("vector_id", "INTEGER").unwrap();

        assert_eq!(store.link_vector(&rec.record_key(), 42).unwrap(), 1);

        let rows = store.fetch_by_vector_ids(&[42, 99]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[&42].title, "Linked");
        assert_eq!(rows[&42].vector_id, Some(42));
    }

    #[test]
    fn test_link_vector_unknown_key() {
        let (_temp, store) = store();
        store.ensure_column("vector_id", "INTEGER").unwrap();
        assert_eq!(store.link_vector("no-such-key", 1).unwrap(), 0);
    }

    #[test]
    fn test_fetch_by_vector_ids_without_column() {
        let (_temp, store) = store();
        store.insert_batch(&[record("Any")]).unwrap();
        assert!(store.fetch_by_vector_ids(&[1]).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_by_keys_before_column_added() {
        let (_temp, store) = store();
        let rec = record("Early");
        store.insert_batch(&[rec.clone()]).unwrap();

        let rows = store.fetch_by_keys(&[rec.record_key()]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vector_id, None);
    }

    #[test]
    fn test_insert_batch_atomicity() {
        let (_temp, store) = store();
        let records: Vec<ArticleRecord> = (0..5).map(|i| record(&format!("A{}", i))).collect();
        store.insert_batch(&records).unwrap();
        assert_eq!(store.count().unwrap(), 5);
    }
}
