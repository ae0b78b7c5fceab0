//! Command handlers for the pubvec CLI.

mod ingest;
mod recover;
mod search;
mod stats;

pub use ingest::IngestCommand;
pub use recover::RecoverCommand;
pub use search::SearchCommand;
pub use stats::StatsCommand;

use pubvec_core::config::{AppConfig, EmbedField};
use pubvec_core::AppResult;
use pubvec_pipeline::{Coordinator, CoordinatorOptions, IngestJournal};
use pubvec_store::{IndexParams, Metric, SqliteArticleStore, SqliteVectorStore};
use std::sync::Arc;

/// Wire a coordinator from the loaded configuration.
///
/// `embed_field` lets a command override the configured field (the ingest
/// command exposes it as a flag); `None` uses the config value.
pub(crate) async fn build_coordinator(
    config: &AppConfig,
    embed_field: Option<EmbedField>,
) -> AppResult<Coordinator> {
    let provider = pubvec_embed::create_provider(&config.embedding).await?;
    let vectors = Arc::new(SqliteVectorStore::new(&config.vector.path));
    let articles = Arc::new(SqliteArticleStore::new(
        &config.relational.path,
        &config.relational.table,
    ));
    let journal = IngestJournal::new(config.journal_path());

    Ok(Coordinator::new(
        provider,
        vectors,
        articles,
        journal,
        CoordinatorOptions {
            collection: config.vector.collection.clone(),
            metric: Metric::parse(&config.vector.metric)?,
            index_params: IndexParams {
                nlist: config.vector.nlist,
            },
            embed_field: embed_field.unwrap_or(config.embed_field),
        },
    ))
}
