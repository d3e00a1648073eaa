// src/classify.rs
//! Hybrid classifier: fast keyword tier first, oracle escalation when the
//! keyword margin is too thin. Every document leaves with *some*
//! classification; oracle failures fall back to the keyword answer.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::oracle::{OraclePrompt, TextOracle};
use crate::retry::with_backoff;
use crate::source::RawDocument;
use crate::taxonomy::{Category, Taxonomy};

/// Which tier produced the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Keyword,
    Oracle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    /// Always populated, in [0, 1].
    pub confidence: f32,
    pub rationale: String,
    pub method: ClassificationMethod,
}

/// Category used when no keyword matches at all; low confidence so the
/// oracle gets a chance to do better.
const FALLBACK_CATEGORY: Category = Category::MarketSentiment;
const NO_KEYWORD_CONFIDENCE: f32 = 0.3;
/// Keyword confidence never reaches 1.0; the margin heuristic is not proof.
const KEYWORD_CONFIDENCE_CAP: f32 = 0.95;

struct CompiledCategory {
    category: Category,
    patterns: Vec<Regex>,
}

/// Classifier over one immutable taxonomy. Keyword regexes are compiled once
/// at construction (case-insensitive, word-boundary).
pub struct Classifier {
    taxonomy: Taxonomy,
    compiled: Vec<CompiledCategory>,
    threshold: f32,
    title_weight: u32,
    excerpt_chars: usize,
    oracle_attempts: u32,
    oracle_backoff: Duration,
}

impl Classifier {
    pub fn new(taxonomy: Taxonomy, cfg: &PipelineConfig) -> Self {
        let compiled = taxonomy
            .entries
            .iter()
            .map(|e| CompiledCategory {
                category: e.category,
                patterns: e
                    .keywords
                    .iter()
                    .map(|k| {
                        Regex::new(&format!(r"(?i)\b{}\b", regex::escape(k)))
                            .expect("escaped keyword regex")
                    })
                    .collect(),
            })
            .collect();
        Self {
            taxonomy,
            compiled,
            threshold: cfg.keyword_confidence_threshold,
            title_weight: cfg.title_weight,
            excerpt_chars: cfg.classify_excerpt_chars,
            oracle_attempts: cfg.oracle_max_attempts,
            oracle_backoff: Duration::from_millis(cfg.oracle_backoff_ms),
        }
    }

    /// Two-tier decision. Never errors: the keyword tier is total and the
    /// oracle tier falls back to it on any failure.
    pub async fn classify(&self, doc: &RawDocument, oracle: &dyn TextOracle) -> Classification {
        let keyword = self.keyword_tier(&doc.title, &doc.body_text);
        if keyword.confidence >= self.threshold {
            return keyword;
        }

        metrics::counter!("classify_escalations_total").increment(1);
        match self.oracle_tier(doc, oracle).await {
            Some(c) => c,
            None => {
                warn!(
                    target: "classify",
                    url = %doc.url,
                    "oracle escalation failed; keeping keyword answer"
                );
                metrics::counter!("classify_oracle_fallbacks_total").increment(1);
                keyword
            }
        }
    }

    /// Keyword tier: count word-boundary matches per category, title hits
    /// weighted `title_weight`x, confidence from the top-vs-second margin.
    pub fn keyword_tier(&self, title: &str, body: &str) -> Classification {
        let mut best: (Category, u32, u32) = (FALLBACK_CATEGORY, 0, 0); // (cat, weighted, raw)
        let mut second: u32 = 0;

        for cc in &self.compiled {
            let mut weighted = 0u32;
            let mut raw = 0u32;
            for re in &cc.patterns {
                let in_title = re.find_iter(title).count() as u32;
                let in_body = re.find_iter(body).count() as u32;
                raw += in_title + in_body;
                weighted += in_title * self.title_weight + in_body;
            }
            if weighted > best.1 {
                second = best.1;
                best = (cc.category, weighted, raw);
            } else if weighted > second {
                second = weighted;
            }
        }

        if best.1 == 0 {
            return Classification {
                category: FALLBACK_CATEGORY,
                confidence: NO_KEYWORD_CONFIDENCE,
                rationale: format!(
                    "No clear keywords; defaulting to {}",
                    FALLBACK_CATEGORY.label()
                ),
                method: ClassificationMethod::Keyword,
            };
        }

        let margin = (best.1 - second) as f32 / best.1 as f32;
        let confidence = margin.clamp(0.0, KEYWORD_CONFIDENCE_CAP);
        debug!(
            target: "classify",
            category = %best.0,
            weighted = best.1,
            runner_up = second,
            confidence,
            "keyword tier"
        );

        Classification {
            category: best.0,
            confidence,
            rationale: format!("Keyword matching: {} relevant terms found", best.2),
            method: ClassificationMethod::Keyword,
        }
    }

    /// Oracle tier with backoff. Returns None when the retry budget is spent
    /// or the answer names a category outside the taxonomy.
    async fn oracle_tier(
        &self,
        doc: &RawDocument,
        oracle: &dyn TextOracle,
    ) -> Option<Classification> {
        let prompt = self.build_prompt(doc);
        let answer = with_backoff(self.oracle_attempts, self.oracle_backoff, || {
            oracle.classify(&prompt)
        })
        .await;

        let answer = match answer {
            Ok(a) => a,
            Err(e) => {
                debug!(target: "classify", error = %e, "oracle tier failed");
                return None;
            }
        };

        let Some(category) = Category::from_label(&answer.category) else {
            warn!(
                target: "classify",
                returned = %answer.category,
                "oracle returned category outside taxonomy"
            );
            return None;
        };

        Some(Classification {
            category,
            confidence: answer.confidence.clamp(0.0, 1.0),
            rationale: answer.rationale,
            method: ClassificationMethod::Oracle,
        })
    }

    fn build_prompt(&self, doc: &RawDocument) -> OraclePrompt {
        let system = format!(
            "You are a financial news classifier. Classify news articles about a \
             single financial instrument into one of these categories:\n\n{}\n\
             Return JSON with: category (exact name from the list), confidence \
             (0-1), and rationale (brief explanation).",
            self.taxonomy.prompt_listing()
        );

        let excerpt: String = doc.body_text.chars().take(self.excerpt_chars).collect();
        let user = format!(
            "Classify this news article:\n\nTitle: {}\n\nContent (excerpt):\n{}\n\n\
             Which category best fits this article?",
            doc.title, excerpt
        );

        OraclePrompt { system, user }
    }
}
