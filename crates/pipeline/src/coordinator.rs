//! The consistency coordinator.
//!
//! Drives each ingest batch through the protocol: validate and deduplicate,
//! embed, write vectors, write rows, link vector ids onto rows. Every step
//! is journaled before the next begins. A relational failure after the
//! vector write triggers compensation (the batch's vectors are deleted) so a
//! failed batch leaves no orphans unless compensation itself fails, in which
//! case the orphaned ids are reported to the caller.

use crate::journal::{IngestJournal, JournalStage, PendingBatch};
use crate::lock::KeyLock;
use crate::types::{BatchReceipt, IngestFailure, IngestStage, SearchHit, SearchResponse};
use pubvec_core::config::EmbedField;
use pubvec_core::{AppError, AppResult};
use pubvec_embed::EmbeddingProvider;
use pubvec_store::{ArticleRecord, ArticleStore, IndexParams, Metric, VectorInsert, VectorStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Column the link step adds to the article table.
const VECTOR_ID_COLUMN: &str = "vector_id";

/// Tunables for a [`Coordinator`], normally taken from the app config.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub collection: String,
    pub metric: Metric,
    pub index_params: IndexParams,
    pub embed_field: EmbedField,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            collection: "articles".to_string(),
            metric: Metric::L2,
            index_params: IndexParams::default(),
            embed_field: EmbedField::Title,
        }
    }
}

/// Outcome of a journal recovery pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Unfinished batches found in the journal
    pub batches: usize,

    /// Rows whose vector link was completed
    pub relinked: usize,

    /// Vectors deleted because their rows never materialized
    pub deleted_vectors: usize,
}

/// Vector and row counts, plus unfinished journal batches.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub vectors: u64,
    pub rows: u64,
    pub pending_batches: usize,
}

/// Coordinates the embedding gateway and the two stores.
///
/// The coordinator is the only component that sees both id spaces. It is
/// cheap to clone the `Arc`ed collaborators; one coordinator per process is
/// the expected shape.
pub struct Coordinator {
    provider: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    articles: Arc<dyn ArticleStore>,
    journal: IngestJournal,
    locks: Arc<KeyLock>,
    options: CoordinatorOptions,
}

impl Coordinator {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        articles: Arc<dyn ArticleStore>,
        journal: IngestJournal,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            provider,
            vectors,
            articles,
            journal,
            locks: Arc::new(KeyLock::new()),
            options,
        }
    }

    /// Ingest a batch of records.
    ///
    /// Exact duplicates within the batch are collapsed to their first
    /// occurrence. Re-ingesting a record that is already stored replaces its
    /// vector and leaves its row in place, so ingest is idempotent.
    pub async fn ingest(&self, batch: Vec<ArticleRecord>) -> Result<BatchReceipt, IngestFailure> {
        let batch_id = Uuid::new_v4();

        if batch.is_empty() {
            tracing::debug!("Batch {} is empty, nothing to do", batch_id);
            return Ok(BatchReceipt {
                batch_id,
                records: 0,
                deduplicated: 0,
                vector_ids: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let (records, keys, deduplicated) = self
            .prepare(&batch)
            .map_err(|e| self.fail(batch_id, IngestStage::Pending, batch.len(), vec![], e))?;

        let texts = self
            .embed_texts(&records)
            .map_err(|e| self.fail(batch_id, IngestStage::Pending, records.len(), vec![], e))?;

        // Serialize against any in-flight batch sharing a key; the guard is
        // held until this batch's store writes are done
        let _guard = self.locks.acquire(keys.clone()).await;

        self.record_stage(batch_id, JournalStage::Pending, &keys, &[])
            .map_err(|e| self.fail(batch_id, IngestStage::Pending, keys.len(), vec![], e))?;

        tracing::info!(
            "Batch {}: ingesting {} records ({} duplicates collapsed)",
            batch_id,
            records.len(),
            deduplicated
        );

        // Step 1: embed
        let embeddings = self
            .provider
            .embed_batch(&texts)
            .await
            .map_err(|e| self.fail(batch_id, IngestStage::Embedded, keys.len(), vec![], e))?;
        self.record_stage(batch_id, JournalStage::Embedded, &keys, &[])
            .map_err(|e| self.fail(batch_id, IngestStage::Embedded, keys.len(), vec![], e))?;

        // Step 2: vectors. Existing vectors for these keys are replaced so
        // re-ingestion does not accumulate stale entries
        let mut warnings = Vec::new();
        let vector_ids = self
            .store_vectors(&records, &keys, embeddings, &mut warnings)
            .map_err(|e| self.fail(batch_id, IngestStage::VectorStored, keys.len(), vec![], e))?;
        self.record_stage(batch_id, JournalStage::VectorStored, &keys, &vector_ids)
            .map_err(|e| self.fail(batch_id, IngestStage::VectorStored, keys.len(), vec![], e))?;

        // Step 3: rows. A failure here triggers compensation of step 2
        if let Err(e) = self.store_rows(&records) {
            return Err(self.compensate(batch_id, &keys, vector_ids, e));
        }
        self.record_stage(batch_id, JournalStage::RowStored, &keys, &vector_ids)
            .map_err(|e| self.fail(batch_id, IngestStage::RowStored, keys.len(), vec![], e))?;

        // Step 4: link each row to its vector, positionally
        self.link(&keys, &vector_ids)
            .map_err(|e| self.fail(batch_id, IngestStage::Linked, keys.len(), vec![], e))?;
        self.record_stage(batch_id, JournalStage::Linked, &keys, &vector_ids)
            .map_err(|e| self.fail(batch_id, IngestStage::Linked, keys.len(), vec![], e))?;

        // Step 5: record index parameters. Best effort; searches fall back
        // to the exact scan regardless
        if let Err(e) = self
            .vectors
            .build_index(&self.options.collection, &self.options.index_params)
        {
            tracing::warn!("Batch {}: index build failed: {}", batch_id, e);
            warnings.push(format!("index build failed: {}", e));
        }

        tracing::info!(
            "Batch {}: linked {} records",
            batch_id,
            vector_ids.len()
        );

        Ok(BatchReceipt {
            batch_id,
            records: records.len(),
            deduplicated,
            vector_ids,
            warnings,
        })
    }

    /// Similarity search joined back to relational detail.
    ///
    /// Hits whose vector id has no relational row (a batch inside its
    /// consistency window, or an orphan) are dropped from the results and
    /// reported separately.
    pub async fn search(&self, query: &str, k: usize) -> AppResult<SearchResponse> {
        let embedding = self.provider.embed(query).await?;
        let matches = self
            .vectors
            .search(&self.options.collection, &embedding, k)?;

        let ids: Vec<i64> = matches.iter().map(|hit| hit.id).collect();
        let rows = self.articles.fetch_by_vector_ids(&ids)?;

        let mut hits = Vec::with_capacity(matches.len());
        let mut dropped = Vec::new();
        for vector_hit in matches {
            match rows.get(&vector_hit.id) {
                Some(row) => hits.push(SearchHit {
                    vector_id: vector_hit.id,
                    distance: vector_hit.distance,
                    article: row.clone(),
                }),
                None => dropped.push(vector_hit.id),
            }
        }

        if !dropped.is_empty() {
            tracing::warn!(
                "Search dropped {} hits with no relational row: {:?}",
                dropped.len(),
                dropped
            );
        }

        Ok(SearchResponse { hits, dropped })
    }

    /// Replay or compensate batches the journal shows as unfinished.
    ///
    /// Batches that got as far as storing rows are completed (their links
    /// are re-applied); batches that only stored vectors have row-less
    /// vectors deleted; batches that stored nothing are simply retired.
    pub async fn recover(&self) -> AppResult<RecoveryReport> {
        let pending = self.journal.pending()?;
        if pending.is_empty() {
            return Ok(RecoveryReport::default());
        }

        self.articles.ensure_table()?;

        let mut report = RecoveryReport {
            batches: pending.len(),
            ..Default::default()
        };

        for batch in pending {
            tracing::info!(
                "Recovering batch {} (stage {:?})",
                batch.batch_id,
                batch.stage
            );
            self.recover_batch(&batch, &mut report)?;
        }

        Ok(report)
    }

    /// Current store sizes and journal backlog.
    pub fn stats(&self) -> AppResult<StoreStats> {
        Ok(StoreStats {
            vectors: self.vectors.count(&self.options.collection)?,
            rows: self.articles.count()?,
            pending_batches: self.journal.pending()?.len(),
        })
    }

    // --- ingest steps ---

    /// Validate and deduplicate the batch, keeping first occurrences.
    fn prepare(
        &self,
        batch: &[ArticleRecord],
    ) -> AppResult<(Vec<ArticleRecord>, Vec<String>, usize)> {
        let mut records = Vec::with_capacity(batch.len());
        let mut keys = Vec::with_capacity(batch.len());
        let mut seen = std::collections::HashSet::new();

        for record in batch {
            record.validate()?;
            let key = record.record_key();
            if seen.insert(key.clone()) {
                records.push(record.clone());
                keys.push(key);
            }
        }

        let deduplicated = batch.len() - records.len();
        Ok((records, keys, deduplicated))
    }

    /// Pick the configured field out of each record.
    fn embed_texts(&self, records: &[ArticleRecord]) -> AppResult<Vec<String>> {
        records
            .iter()
            .map(|record| match self.options.embed_field {
                EmbedField::Title => Ok(record.title.clone()),
                EmbedField::Abstract => Ok(record.abstract_text.clone()),
                EmbedField::Summary => record.summary.clone().ok_or_else(|| {
                    AppError::Integrity(format!(
                        "Record '{}' has no summary to embed",
                        record.title
                    ))
                }),
            })
            .collect()
    }

    fn store_vectors(
        &self,
        records: &[ArticleRecord],
        keys: &[String],
        embeddings: Vec<Vec<f32>>,
        warnings: &mut Vec<String>,
    ) -> AppResult<Vec<i64>> {
        let collection = &self.options.collection;

        self.vectors
            .ensure_collection(collection, self.provider.dimensions(), self.options.metric)?;

        let existing = self.vectors.find_by_keys(collection, keys)?;
        if !existing.is_empty() {
            let stale: Vec<i64> = existing.iter().map(|(id, _)| *id).collect();
            self.vectors.delete_by_ids(collection, &stale)?;
            warnings.push(format!("replaced {} previously stored vectors", stale.len()));
        }

        let inserts: Vec<VectorInsert> = records
            .iter()
            .zip(keys.iter())
            .zip(embeddings)
            .map(|((record, key), embedding)| VectorInsert {
                embedding,
                record_key: key.clone(),
                title: record.title.clone(),
            })
            .collect();

        self.vectors.insert_batch(collection, &inserts)
    }

    fn store_rows(&self, records: &[ArticleRecord]) -> AppResult<()> {
        self.articles.ensure_table()?;
        self.articles.insert_batch(records)?;
        Ok(())
    }

    fn link(&self, keys: &[String], vector_ids: &[i64]) -> AppResult<()> {
        self.articles.ensure_column(VECTOR_ID_COLUMN, "INTEGER")?;

        for (key, vector_id) in keys.iter().zip(vector_ids) {
            let updated = self.articles.link_vector(key, *vector_id)?;
            if updated == 0 {
                return Err(AppError::Integrity(format!(
                    "No row found for record key {} while linking vector {}",
                    key, vector_id
                )));
            }
        }
        Ok(())
    }

    /// Undo the vector write after a relational failure.
    fn compensate(
        &self,
        batch_id: Uuid,
        keys: &[String],
        vector_ids: Vec<i64>,
        source: AppError,
    ) -> IngestFailure {
        match self
            .vectors
            .delete_by_ids(&self.options.collection, &vector_ids)
        {
            Ok(deleted) => {
                tracing::warn!(
                    "Batch {}: relational write failed, compensated by deleting {} vectors",
                    batch_id,
                    deleted
                );
                if let Err(e) =
                    self.record_stage(batch_id, JournalStage::Compensated, keys, &vector_ids)
                {
                    tracing::error!("Batch {}: failed to journal compensation: {}", batch_id, e);
                }
                self.fail(batch_id, IngestStage::RowStored, keys.len(), vec![], source)
            }
            Err(e) => {
                tracing::error!(
                    "Batch {}: compensation failed ({}), {} vectors orphaned: {:?}",
                    batch_id,
                    e,
                    vector_ids.len(),
                    vector_ids
                );
                self.fail(batch_id, IngestStage::RowStored, keys.len(), vector_ids, source)
            }
        }
    }

    fn recover_batch(&self, batch: &PendingBatch, report: &mut RecoveryReport) -> AppResult<()> {
        match batch.stage {
            // Nothing persisted yet
            JournalStage::Pending | JournalStage::Embedded => {
                self.journal.append(
                    batch.batch_id,
                    JournalStage::Compensated,
                    &batch.record_keys,
                    &[],
                )?;
            }

            // Vectors exist; rows may or may not, depending on where the
            // crash landed between the journal writes
            JournalStage::VectorStored | JournalStage::RowStored => {
                let collection = &self.options.collection;
                let found = self.vectors.find_by_keys(collection, &batch.record_keys)?;
                let rows = self.articles.fetch_by_keys(&batch.record_keys)?;
                let row_keys: std::collections::HashSet<&str> =
                    rows.iter().map(|row| row.record_key.as_str()).collect();

                // Last vector per key wins (find_by_keys is id-ordered)
                let mut by_key: HashMap<&str, i64> = HashMap::new();
                for (id, key) in &found {
                    by_key.insert(key.as_str(), *id);
                }

                let mut relinked = 0;
                let mut stale = Vec::new();
                for (id, key) in &found {
                    if !row_keys.contains(key.as_str()) {
                        stale.push(*id);
                    } else if by_key.get(key.as_str()) != Some(id) {
                        // Superseded duplicate of a re-ingested key
                        stale.push(*id);
                    }
                }

                if !stale.is_empty() {
                    report.deleted_vectors += self.vectors.delete_by_ids(collection, &stale)?;
                }

                if !rows.is_empty() {
                    self.articles.ensure_column(VECTOR_ID_COLUMN, "INTEGER")?;
                    for row in &rows {
                        if let Some(vector_id) = by_key.get(row.record_key.as_str()) {
                            if row.vector_id != Some(*vector_id) {
                                relinked +=
                                    self.articles.link_vector(&row.record_key, *vector_id)?;
                            }
                        }
                    }
                }
                report.relinked += relinked;

                let terminal = if relinked > 0 || !rows.is_empty() {
                    JournalStage::Linked
                } else {
                    JournalStage::Compensated
                };
                self.journal.append(
                    batch.batch_id,
                    terminal,
                    &batch.record_keys,
                    &batch.vector_ids,
                )?;
            }

            JournalStage::Linked | JournalStage::Compensated => {}
        }
        Ok(())
    }

    fn record_stage(
        &self,
        batch_id: Uuid,
        stage: JournalStage,
        keys: &[String],
        vector_ids: &[i64],
    ) -> AppResult<()> {
        self.journal.append(batch_id, stage, keys, vector_ids)
    }

    fn fail(
        &self,
        batch_id: Uuid,
        stage: IngestStage,
        records: usize,
        orphaned_vectors: Vec<i64>,
        source: AppError,
    ) -> IngestFailure {
        tracing::error!("Batch {} failed at {}: {}", batch_id, stage, source);
        IngestFailure {
            batch_id,
            stage,
            records,
            orphaned_vectors,
            source,
        }
    }
}
