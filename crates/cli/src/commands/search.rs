//! Search command handler.

use clap::Args;
use pubvec_core::config::AppConfig;
use pubvec_core::AppResult;

/// Search stored articles by similarity
#[derive(Args, Debug)]
pub struct SearchCommand {
    /// Query text
    pub query: String,

    /// Maximum number of results
    #[arg(short = 'k', long, default_value_t = 10)]
    pub top_k: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let coordinator = super::build_coordinator(config, None).await?;

        let response = coordinator.search(&self.query, self.top_k).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&response)?);
            return Ok(());
        }

        if response.hits.is_empty() {
            println!("No results.");
        }

        for (rank, hit) in response.hits.iter().enumerate() {
            println!(
                "{:>2}. [{:.4}] {} ({}) - {}",
                rank + 1,
                hit.distance,
                hit.article.title,
                hit.article.pub_date,
                hit.article.author
            );
            if let Some(summary) = &hit.article.summary {
                println!("      {}", summary);
            }
        }

        if !response.dropped.is_empty() {
            eprintln!(
                "note: {} matches had no relational row and were dropped",
                response.dropped.len()
            );
        }

        Ok(())
    }
}
