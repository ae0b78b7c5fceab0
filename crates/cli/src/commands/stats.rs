//! Stats command handler.

use clap::Args;
use pubvec_core::config::AppConfig;
use pubvec_core::AppResult;

/// Show store sizes and journal backlog
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let coordinator = super::build_coordinator(config, None).await?;

        let stats = coordinator.stats()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!("vectors:         {}", stats.vectors);
            println!("rows:            {}", stats.rows);
            println!("pending batches: {}", stats.pending_batches);
        }

        Ok(())
    }
}
