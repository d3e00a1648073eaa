// tests/pipeline_e2e.rs
// End-to-end runs against the public API with an in-memory repository and a
// scripted oracle.

use std::sync::Arc;

use chrono::{Duration, Utc};
use equity_news_enricher::oracle::OracleScore;
use equity_news_enricher::{
    Category, ClassificationMethod, MemoryRepository, MockOracle, Pipeline, PipelineConfig,
    RawDocument, Repository, Stance, Taxonomy, WindowFilter,
};

fn delivery_doc() -> RawDocument {
    RawDocument {
        url: "https://x.com/a?utm_source=y".into(),
        title: "Tesla posts record deliveries".into(),
        body_text:
            "Tesla delivered a record number of vehicles this quarter, beating analyst estimates."
                .into(),
        published_at: None,
        source_label: "wire".into(),
    }
}

fn quick_cfg() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.oracle_backoff_ms = 1;
    cfg.storage_backoff_ms = 1;
    cfg
}

async fn stored(repo: &MemoryRepository) -> Vec<equity_news_enricher::EnrichmentRecord> {
    repo.query_window(
        "owner-1",
        Utc::now() - Duration::days(1),
        &WindowFilter::default(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn keyword_classification_end_to_end() {
    let repo = Arc::new(MemoryRepository::new());
    let oracle = Arc::new(MockOracle::new());
    let p = Pipeline::new(Taxonomy::builtin(), quick_cfg(), oracle, Arc::clone(&repo) as _);

    let summary = p.run_batch(vec![delivery_doc()], "owner-1").await;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.failed, 0);

    let rows = stored(&repo).await;
    assert_eq!(rows.len(), 1);
    let rec = &rows[0];
    // Tracking parameter stripped from the identity key.
    assert_eq!(rec.identity.canonical_url, "https://x.com/a");
    assert_eq!(rec.classification.category, Category::FinancialOperational);
    assert_eq!(rec.classification.method, ClassificationMethod::Keyword);
    assert!(rec.classification.confidence >= 0.6);
}

#[tokio::test]
async fn reingestion_is_idempotent() {
    let repo = Arc::new(MemoryRepository::new());
    let oracle = Arc::new(MockOracle::new());
    let p = Pipeline::new(Taxonomy::builtin(), quick_cfg(), oracle, Arc::clone(&repo) as _);

    p.run_batch(vec![delivery_doc()], "owner-1").await;
    let first = stored(&repo).await.remove(0);

    p.run_batch(vec![delivery_doc()], "owner-1").await;
    let rows = stored(&repo).await;
    assert_eq!(rows.len(), 1, "re-ingestion must not create a second row");
    let second = &rows[0];
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);
}

#[tokio::test]
async fn inconsistent_stance_is_persisted_verbatim() {
    let repo = Arc::new(MemoryRepository::new());
    let oracle = Arc::new(MockOracle::new());
    oracle.push_score(Ok(OracleScore {
        sentiment: 0.6,
        impact: 3,
        confidence: 0.7,
        stance: "neutral".into(),
        summary: "Record deliveries, framed cautiously.".into(),
        rationale: "Strong numbers but guidance unchanged.".into(),
        key_factors: vec!["deliveries".into(), "guidance".into(), "coverage".into()],
    }));
    let p = Pipeline::new(Taxonomy::builtin(), quick_cfg(), oracle, Arc::clone(&repo) as _);

    let summary = p.run_batch(vec![delivery_doc()], "owner-1").await;
    assert_eq!(summary.succeeded, 1);

    let rec = stored(&repo).await.remove(0);
    let score = rec.score.expect("score persisted");
    // Warned about, never auto-corrected.
    assert!((score.sentiment - 0.6).abs() < 1e-6);
    assert_eq!(score.stance, Stance::Neutral);
}

#[tokio::test]
async fn persisted_scores_stay_in_bounds() {
    let repo = Arc::new(MemoryRepository::new());
    let oracle = Arc::new(MockOracle::new());
    // Oracle drifts out of range; the scorer clamps before persistence.
    oracle.push_score(Ok(OracleScore {
        sentiment: 1.8,
        impact: 7,
        confidence: 1.3,
        stance: "bullish".into(),
        summary: "Very strong quarter.".into(),
        rationale: "Beat on every metric.".into(),
        key_factors: vec!["beat".into(), "guidance".into(), "margins".into()],
    }));
    let p = Pipeline::new(Taxonomy::builtin(), quick_cfg(), oracle, Arc::clone(&repo) as _);

    p.run_batch(vec![delivery_doc()], "owner-1").await;
    let rec = stored(&repo).await.remove(0);
    let score = rec.score.expect("score persisted");
    assert!((-1.0..=1.0).contains(&score.sentiment));
    assert!((1..=5).contains(&score.impact));
    assert!((0.0..=1.0).contains(&score.confidence));
}
