//! Write-ahead ingest journal.
//!
//! One JSONL file, append-only. Every protocol step is recorded before the
//! coordinator moves to the next one, so after a crash the journal pins down
//! how far each batch got. Entries are never rewritten; a batch is retired
//! by appending a `linked` or `compensated` entry for it.

use crate::types::IngestStage;
use chrono::{DateTime, Utc};
use pubvec_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Journal-level stage: the ingest stages plus the compensation marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStage {
    Pending,
    Embedded,
    VectorStored,
    RowStored,
    Linked,
    /// The batch's partial writes were undone
    Compensated,
}

impl From<IngestStage> for JournalStage {
    fn from(stage: IngestStage) -> Self {
        match stage {
            IngestStage::Pending => Self::Pending,
            IngestStage::Embedded => Self::Embedded,
            IngestStage::VectorStored => Self::VectorStored,
            IngestStage::RowStored => Self::RowStored,
            IngestStage::Linked => Self::Linked,
        }
    }
}

impl JournalStage {
    /// A terminal stage needs no recovery.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Linked | Self::Compensated)
    }
}

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub batch_id: Uuid,
    pub stage: JournalStage,

    /// Correlation keys of the batch (after deduplication)
    pub record_keys: Vec<String>,

    /// Vector ids, present from `vector_stored` onward
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector_ids: Vec<i64>,

    pub at: DateTime<Utc>,
}

/// A batch whose last journal entry is not terminal.
#[derive(Debug, Clone)]
pub struct PendingBatch {
    pub batch_id: Uuid,
    pub stage: JournalStage,
    pub record_keys: Vec<String>,
    pub vector_ids: Vec<i64>,
}

/// Append-only JSONL journal of ingest progress.
#[derive(Debug, Clone)]
pub struct IngestJournal {
    path: PathBuf,
}

impl IngestJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. The line is flushed before this returns, so a
    /// journaled stage survives a crash immediately after.
    pub fn append(
        &self,
        batch_id: Uuid,
        stage: JournalStage,
        record_keys: &[String],
        vector_ids: &[i64],
    ) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let entry = JournalEntry {
            batch_id,
            stage,
            record_keys: record_keys.to_vec(),
            vector_ids: vector_ids.to_vec(),
            at: Utc::now(),
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    /// Batches whose last recorded stage is not terminal, in first-seen
    /// order.
    pub fn pending(&self) -> AppResult<Vec<PendingBatch>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = std::fs::read_to_string(&self.path)?;

        let mut order: Vec<Uuid> = Vec::new();
        let mut latest: HashMap<Uuid, PendingBatch> = HashMap::new();

        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let entry: JournalEntry = serde_json::from_str(line).map_err(|e| {
                AppError::Serialization(format!(
                    "Corrupt journal entry at line {}: {}",
                    number + 1,
                    e
                ))
            })?;

            if !latest.contains_key(&entry.batch_id) {
                order.push(entry.batch_id);
            }

            let batch = latest.entry(entry.batch_id).or_insert_with(|| PendingBatch {
                batch_id: entry.batch_id,
                stage: entry.stage,
                record_keys: Vec::new(),
                vector_ids: Vec::new(),
            });

            batch.stage = entry.stage;
            if !entry.record_keys.is_empty() {
                batch.record_keys = entry.record_keys;
            }
            if !entry.vector_ids.is_empty() {
                batch.vector_ids = entry.vector_ids;
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .filter(|batch| !batch.stage.is_terminal())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn journal() -> (TempDir, IngestJournal) {
        let temp = TempDir::new().unwrap();
        let journal = IngestJournal::new(temp.path().join("journal.jsonl"));
        (temp, journal)
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pending_empty_when_missing() {
        let (_temp, journal) = journal();
        assert!(journal.pending().unwrap().is_empty());
    }

    #[test]
    fn test_completed_batch_is_not_pending() {
        let (_temp, journal) = journal();
        let id = Uuid::new_v4();

        journal
            .append(id, JournalStage::Pending, &keys(&["k1"]), &[])
            .unwrap();
        journal
            .append(id, JournalStage::Embedded, &keys(&["k1"]), &[])
            .unwrap();
        journal
            .append(id, JournalStage::VectorStored, &keys(&["k1"]), &[7])
            .unwrap();
        journal
            .append(id, JournalStage::RowStored, &keys(&["k1"]), &[7])
            .unwrap();
        journal
            .append(id, JournalStage::Linked, &keys(&["k1"]), &[7])
            .unwrap();

        assert!(journal.pending().unwrap().is_empty());
    }

    #[test]
    fn test_interrupted_batch_is_pending_with_latest_state() {
        let (_temp, journal) = journal();
        let id = Uuid::new_v4();

        journal
            .append(id, JournalStage::Pending, &keys(&["k1", "k2"]), &[])
            .unwrap();
        journal
            .append(id, JournalStage::Embedded, &keys(&["k1", "k2"]), &[])
            .unwrap();
        journal
            .append(id, JournalStage::VectorStored, &keys(&["k1", "k2"]), &[3, 4])
            .unwrap();

        let pending = journal.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].batch_id, id);
        assert_eq!(pending[0].stage, JournalStage::VectorStored);
        assert_eq!(pending[0].record_keys, keys(&["k1", "k2"]));
        assert_eq!(pending[0].vector_ids, vec![3, 4]);
    }

    #[test]
    fn test_compensated_batch_is_terminal() {
        let (_temp, journal) = journal();
        let id = Uuid::new_v4();

        journal
            .append(id, JournalStage::VectorStored, &keys(&["k1"]), &[9])
            .unwrap();
        journal
            .append(id, JournalStage::Compensated, &keys(&["k1"]), &[9])
            .unwrap();

        assert!(journal.pending().unwrap().is_empty());
    }

    #[test]
    fn test_pending_preserves_batch_order() {
        let (_temp, journal) = journal();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        journal
            .append(first, JournalStage::Pending, &keys(&["a"]), &[])
            .unwrap();
        journal
            .append(second, JournalStage::Pending, &keys(&["b"]), &[])
            .unwrap();
        journal
            .append(first, JournalStage::Embedded, &keys(&["a"]), &[])
            .unwrap();

        let pending = journal.pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].batch_id, first);
        assert_eq!(pending[1].batch_id, second);
    }

    #[test]
    fn test_corrupt_line_is_an_error() {
        let (_temp, journal) = journal();
        let id = Uuid::new_v4();
        journal
            .append(id, JournalStage::Pending, &keys(&["a"]), &[])
            .unwrap();
        std::fs::write(
            journal.path(),
            format!(
                "{}not json\n",
                std::fs::read_to_string(journal.path()).unwrap()
            ),
        )
        .unwrap();

        assert!(journal.pending().is_err());
    }
}
