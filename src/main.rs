//! Batch enrichment entrypoint.
//! Wires a document source, the text oracle and a repository from the
//! environment, runs one pipeline batch, and logs the run summary.
//!
//! Environment:
//!   OPENAI_API_KEY           enables the OpenAI oracle (else keyword-only)
//!   SUPABASE_URL/SUPABASE_KEY enables the PostgREST repository (else memory)
//!   NEWS_FIXTURE_PATH        JSON array of RawDocuments to ingest
//!   ENRICHER_OWNER_ID        partition key for this run (default "default")
//!   ENRICHER_TICKER          instrument label for the source query

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use equity_news_enricher::{
    DocumentSource, DynOracle, FixtureSource, MemoryRepository, NoopOracle, OpenAiOracle,
    Pipeline, PipelineConfig, PostgrestRepository, Repository, SourceQuery, Taxonomy,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("equity_news_enricher=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn build_oracle() -> DynOracle {
    if std::env::var("OPENAI_API_KEY").is_ok() {
        Arc::new(OpenAiOracle::new(None))
    } else {
        info!("OPENAI_API_KEY not set; keyword tier only, scoring skipped");
        Arc::new(NoopOracle)
    }
}

fn build_repo() -> Arc<dyn Repository> {
    match PostgrestRepository::from_env("enriched_articles") {
        Some(repo) => Arc::new(repo),
        None => {
            info!("SUPABASE_URL/SUPABASE_KEY not set; using in-memory repository");
            Arc::new(MemoryRepository::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_default()?;
    let taxonomy = match std::env::var("TAXONOMY_PATH") {
        Ok(p) => Taxonomy::from_path(&p)?,
        Err(_) => Taxonomy::builtin(),
    };

    let fixture_path = std::env::var("NEWS_FIXTURE_PATH")
        .context("NEWS_FIXTURE_PATH must point to a JSON array of documents")?;
    let raw = std::fs::read_to_string(&fixture_path)
        .with_context(|| format!("reading fixture {fixture_path}"))?;
    let source = FixtureSource::from_json(&raw)?;

    let owner_id = std::env::var("ENRICHER_OWNER_ID").unwrap_or_else(|_| "default".into());
    let ticker = std::env::var("ENRICHER_TICKER").unwrap_or_else(|_| "TSLA".into());

    let query = SourceQuery {
        ticker,
        terms: Vec::new(),
        max_documents: None,
    };
    let docs = source.fetch(&query).await?;
    info!(count = docs.len(), source = source.name(), "fetched documents");

    let pipeline = Pipeline::new(taxonomy, cfg, build_oracle(), build_repo());
    let summary = pipeline.run_batch(docs, &owner_id).await;

    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        classified_only = summary.classified_only,
        failed = summary.failed,
        "run complete"
    );
    Ok(())
}
