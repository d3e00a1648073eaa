// src/pipeline.rs
//! Batch orchestrator: Canonicalize -> Classify -> (Score | skip) -> Persist
//! per document, with per-stage retry budgets, per-document failure
//! isolation, and bounded parallelism. Oracle concurrency is gated
//! separately from the worker pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::canonical::canonicalize;
use crate::classify::Classifier;
use crate::config::PipelineConfig;
use crate::error::EnrichError;
use crate::oracle::{DynOracle, GatedOracle};
use crate::record::EnrichmentRecord;
use crate::repo::Repository;
use crate::retry::with_backoff;
use crate::score::Scorer;
use crate::source::RawDocument;
use crate::taxonomy::Taxonomy;

/// One-time metrics registration (teacher pattern: describe before use).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_docs_total", "Documents entering the pipeline.");
        describe_counter!("pipeline_succeeded_total", "Documents persisted with a score.");
        describe_counter!(
            "pipeline_classified_only_total",
            "Documents persisted without a score."
        );
        describe_counter!("pipeline_failed_total", "Documents failed for the run.");
        describe_counter!(
            "pipeline_near_duplicates_total",
            "Same content hash seen under a different canonical URL."
        );
        describe_counter!(
            "classify_escalations_total",
            "Keyword tier below threshold; oracle consulted."
        );
        describe_counter!(
            "classify_oracle_fallbacks_total",
            "Oracle escalation failed; keyword answer kept."
        );
        describe_counter!("score_skipped_total", "Scoring gave up after two attempts.");
        describe_counter!(
            "score_stance_inconsistent_total",
            "Stance label diverged from sentiment sign."
        );
        describe_gauge!("pipeline_last_run_ts", "Unix ts of the last batch run.");
    });
}

/// Terminal outcome of one document's run. Transitions are one-directional;
/// each stage owns its internal retries and reports here exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocOutcome {
    /// Persisted with classification and score.
    Succeeded,
    /// Persisted with classification only (scoring skipped or rejected).
    ClassifiedOnly,
    /// Dropped for this run; `stage` names where it terminated.
    Failed { stage: &'static str, reason: String },
}

/// Per-run summary surfaced to the caller. A batch always completes; a
/// single bad document never aborts the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub classified_only: usize,
    pub failed: usize,
}

impl RunSummary {
    fn absorb(&mut self, outcome: &DocOutcome) {
        self.total += 1;
        match outcome {
            DocOutcome::Succeeded => self.succeeded += 1,
            DocOutcome::ClassifiedOnly => self.classified_only += 1,
            DocOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Stage bundle shared by the batch workers.
struct Stages {
    classifier: Classifier,
    scorer: Scorer,
    oracle: DynOracle,
    repo: Arc<dyn Repository>,
    cfg: PipelineConfig,
}

pub struct Pipeline {
    stages: Arc<Stages>,
}

impl Pipeline {
    pub fn new(
        taxonomy: Taxonomy,
        cfg: PipelineConfig,
        oracle: DynOracle,
        repo: Arc<dyn Repository>,
    ) -> Self {
        // The gate bounds oracle calls independently of document workers.
        let gated: DynOracle = Arc::new(GatedOracle::new(oracle, cfg.oracle_parallelism));
        Self {
            stages: Arc::new(Stages {
                classifier: Classifier::new(taxonomy, &cfg),
                scorer: Scorer::new(&cfg),
                oracle: gated,
                repo,
                cfg,
            }),
        }
    }

    /// Process one batch with bounded concurrency. No ordering is guaranteed
    /// between documents; within a document the stages run strictly in
    /// sequence. Dropping the returned future abandons in-flight documents
    /// cleanly: persistence is a single atomic upsert, so partial records
    /// never reach storage.
    pub async fn run_batch(&self, docs: Vec<RawDocument>, owner_id: &str) -> RunSummary {
        ensure_metrics_described();

        let permits = Arc::new(Semaphore::new(self.stages.cfg.doc_parallelism));
        // Shared dedup-flagging space for this run: content hash -> first URL.
        let seen_hashes: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut set: JoinSet<DocOutcome> = JoinSet::new();
        for doc in docs {
            let stages = Arc::clone(&self.stages);
            let permits = Arc::clone(&permits);
            let seen = Arc::clone(&seen_hashes);
            let owner = owner_id.to_string();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.expect("pool never closed");
                stages.process_document(doc, &owner, &seen).await
            });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = set.join_next().await {
            let outcome = joined.unwrap_or_else(|e| DocOutcome::Failed {
                stage: "worker",
                reason: format!("task join error: {e}"),
            });
            summary.absorb(&outcome);
        }

        gauge!("pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        info!(
            target: "pipeline",
            total = summary.total,
            succeeded = summary.succeeded,
            classified_only = summary.classified_only,
            failed = summary.failed,
            "batch finished"
        );
        summary
    }
}

impl Stages {
    async fn process_document(
        &self,
        doc: RawDocument,
        owner_id: &str,
        seen_hashes: &Mutex<HashMap<String, String>>,
    ) -> DocOutcome {
        counter!("pipeline_docs_total").increment(1);

        // Canonicalized. Rejection here is the only way a document is
        // dropped before classification.
        let identity = match canonicalize(&doc) {
            Ok(id) => id,
            Err(e) => {
                warn!(target: "pipeline", url = %doc.url, error = %e, "document rejected");
                counter!("pipeline_failed_total").increment(1);
                return DocOutcome::Failed {
                    stage: "canonicalize",
                    reason: e.to_string(),
                };
            }
        };

        // Near-duplicate flagging: same content under a different URL is
        // logged, never merged; the URL stays the identity key.
        {
            let mut seen = seen_hashes.lock().expect("dedup mutex");
            match seen.get(&identity.content_hash) {
                Some(first_url) if *first_url != identity.canonical_url => {
                    counter!("pipeline_near_duplicates_total").increment(1);
                    warn!(
                        target: "pipeline",
                        url = %identity.canonical_url,
                        duplicate_of = %first_url,
                        "near-duplicate content under a different URL"
                    );
                }
                _ => {
                    seen.insert(identity.content_hash.clone(), identity.canonical_url.clone());
                }
            }
        }

        // Classified. Never fails: the classifier falls back internally.
        let classification = self.classifier.classify(&doc, self.oracle.as_ref()).await;

        // Scored | ScoreSkipped.
        let score = self
            .scorer
            .score(&doc, &classification, self.oracle.as_ref())
            .await;

        let record =
            match EnrichmentRecord::build(identity, &doc, classification, score, owner_id) {
                Ok(r) => r,
                Err(e) => {
                    counter!("pipeline_failed_total").increment(1);
                    return DocOutcome::Failed {
                        stage: "build",
                        reason: e.to_string(),
                    };
                }
            };

        // Persisted | Failed.
        match self.persist(&record).await {
            Ok(scored) => {
                if scored {
                    counter!("pipeline_succeeded_total").increment(1);
                    DocOutcome::Succeeded
                } else {
                    counter!("pipeline_classified_only_total").increment(1);
                    DocOutcome::ClassifiedOnly
                }
            }
            Err(e) => {
                warn!(
                    target: "pipeline",
                    url = %record.identity.canonical_url,
                    error = %e,
                    "persist failed for this run"
                );
                counter!("pipeline_failed_total").increment(1);
                DocOutcome::Failed {
                    stage: "persist",
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Upsert with backoff. A constraint rejection on a scored record drops
    /// the score and retries once; classification alone is still valuable.
    /// Returns whether the persisted row carries a score.
    async fn persist(&self, record: &EnrichmentRecord) -> Result<bool, EnrichError> {
        let backoff = Duration::from_millis(self.cfg.storage_backoff_ms);
        let attempts = self.cfg.storage_max_attempts;

        match with_backoff(attempts, backoff, || self.repo.upsert(record)).await {
            Ok(_) => Ok(record.score.is_some()),
            Err(EnrichError::StorageConstraint(msg)) if record.score.is_some() => {
                warn!(
                    target: "pipeline",
                    url = %record.identity.canonical_url,
                    constraint = %msg,
                    "score rejected by storage; persisting classification only"
                );
                let stripped = record.without_score();
                with_backoff(attempts, backoff, || self.repo.upsert(&stripped)).await?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
