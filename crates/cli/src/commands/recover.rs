//! Recover command handler.

use clap::Args;
use pubvec_core::config::AppConfig;
use pubvec_core::AppResult;

/// Replay or compensate unfinished batches from the ingest journal
#[derive(Args, Debug)]
pub struct RecoverCommand {
    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl RecoverCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let coordinator = super::build_coordinator(config, None).await?;

        let report = coordinator.recover().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else if report.batches == 0 {
            println!("Journal clean, nothing to recover.");
        } else {
            println!(
                "Recovered {} batches: {} links completed, {} orphaned vectors deleted",
                report.batches, report.relinked, report.deleted_vectors
            );
        }

        Ok(())
    }
}
