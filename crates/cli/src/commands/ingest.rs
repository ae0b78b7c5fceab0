//! Ingest command handler.

use clap::Args;
use pubvec_core::config::{AppConfig, EmbedField};
use pubvec_core::{AppError, AppResult};
use pubvec_store::ArticleRecord;
use std::path::PathBuf;

/// Ingest a batch of article records from a JSON file
#[derive(Args, Debug)]
pub struct IngestCommand {
    /// JSON file containing an array of article records
    pub file: PathBuf,

    /// Article field to embed (title, abstract, summary)
    #[arg(long, value_parser = parse_embed_field)]
    pub embed_field: Option<EmbedField>,

    /// Output the receipt as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_embed_field(s: &str) -> Result<EmbedField, String> {
    EmbedField::parse(s).ok_or_else(|| format!("unknown field '{}' (title, abstract, summary)", s))
}

impl IngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let contents = std::fs::read_to_string(&self.file).map_err(|e| {
            AppError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read {:?}: {}", self.file, e),
            ))
        })?;

        let batch: Vec<ArticleRecord> = serde_json::from_str(&contents).map_err(|e| {
            AppError::Serialization(format!("Failed to parse {:?}: {}", self.file, e))
        })?;

        tracing::info!("Ingesting {} records from {:?}", batch.len(), self.file);

        let coordinator = super::build_coordinator(config, self.embed_field).await?;

        match coordinator.ingest(batch).await {
            Ok(receipt) => {
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&receipt)?);
                } else {
                    println!(
                        "Batch {}: stored {} records ({} duplicates collapsed)",
                        receipt.batch_id, receipt.records, receipt.deduplicated
                    );
                    for warning in &receipt.warnings {
                        println!("  warning: {}", warning);
                    }
                }
                Ok(())
            }
            Err(failure) => {
                eprintln!(
                    "Batch {} failed at {}: {}",
                    failure.batch_id, failure.stage, failure.source
                );
                if !failure.orphaned_vectors.is_empty() {
                    eprintln!(
                        "  {} orphaned vectors remain: {:?} (run `pubvec recover`)",
                        failure.orphaned_vectors.len(),
                        failure.orphaned_vectors
                    );
                }
                Err(failure.source)
            }
        }
    }
}
