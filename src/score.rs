// src/score.rs
//! Sentiment/impact scoring: category-aware oracle prompting, a strict
//! JSON-only retry on schema violations, and an advisory stance/sentiment
//! consistency check. Score is optional metadata; after two failed attempts
//! the pipeline persists the classified document without one.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::Classification;
use crate::config::PipelineConfig;
use crate::error::{EnrichError, EnrichResult};
use crate::oracle::{OraclePrompt, OracleScore, TextOracle};
use crate::retry::with_backoff;
use crate::source::RawDocument;
use crate::taxonomy::Category;

/// Discrete market stance, distinct from the continuous sentiment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Bullish,
    Bearish,
    Neutral,
}

impl Stance {
    fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" => Some(Stance::Bullish),
            "bearish" => Some(Stance::Bearish),
            "neutral" => Some(Stance::Neutral),
            _ => None,
        }
    }
}

/// Validated multi-dimensional score for one classified document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    /// [-1.0, 1.0]
    pub sentiment: f32,
    /// [1, 5]
    pub impact: u8,
    /// [0.0, 1.0]
    pub confidence: f32,
    pub stance: Stance,
    pub summary: String,
    pub rationale: String,
    /// 3-5 short factors, capped at 5.
    pub key_factors: Vec<String>,
}

pub struct Scorer {
    excerpt_chars: usize,
    stance_tolerance: f32,
    oracle_attempts: u32,
    oracle_backoff: Duration,
}

impl Scorer {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            excerpt_chars: cfg.score_excerpt_chars,
            stance_tolerance: cfg.stance_tolerance,
            oracle_attempts: cfg.oracle_max_attempts,
            oracle_backoff: Duration::from_millis(cfg.oracle_backoff_ms),
        }
    }

    /// Two attempts max: the second adds a "valid JSON only" instruction
    /// and only follows a schema violation; an exhausted transient budget
    /// ends scoring outright. `None` means the record proceeds without a
    /// score.
    pub async fn score(
        &self,
        doc: &RawDocument,
        classification: &Classification,
        oracle: &dyn TextOracle,
    ) -> Option<SentimentScore> {
        for strict in [false, true] {
            let prompt = self.build_prompt(doc, classification.category, strict);
            let raw = with_backoff(self.oracle_attempts, self.oracle_backoff, || {
                oracle.score(&prompt)
            })
            .await;

            match raw.and_then(validate_score) {
                Ok(score) => {
                    self.consistency_check(&doc.url, &score);
                    info!(
                        target: "score",
                        url = %doc.url,
                        sentiment = score.sentiment,
                        impact = score.impact,
                        confidence = score.confidence,
                        "scored document"
                    );
                    return Some(score);
                }
                Err(e) => {
                    warn!(target: "score", url = %doc.url, error = %e, strict, "scoring attempt failed");
                    // The strict retry targets malformed payloads; a spent
                    // transient budget gains nothing from a stricter prompt.
                    if e.is_transient() {
                        break;
                    }
                }
            }
        }
        metrics::counter!("score_skipped_total").increment(1);
        None
    }

    /// Advisory only: stance may legitimately diverge from magnitude-only
    /// sentiment (positive news framed as risk). Logged, never corrected.
    fn consistency_check(&self, url: &str, score: &SentimentScore) {
        let t = self.stance_tolerance;
        let inconsistent = (score.sentiment > t && score.stance != Stance::Bullish)
            || (score.sentiment < -t && score.stance != Stance::Bearish);
        if inconsistent {
            metrics::counter!("score_stance_inconsistent_total").increment(1);
            warn!(
                target: "score",
                url = %url,
                sentiment = score.sentiment,
                stance = ?score.stance,
                "stance inconsistent with sentiment sign"
            );
        }
    }

    fn build_prompt(&self, doc: &RawDocument, category: Category, strict: bool) -> OraclePrompt {
        let strict_line = if strict {
            "\n\nReturn valid JSON only. No prose, no markdown fences, every field present and in range."
        } else {
            ""
        };

        let system = format!(
            "You are an expert financial analyst. Analyze news about a single \
             financial instrument and provide comprehensive sentiment scoring.\n\n\
             SCORING DIMENSIONS:\n\n\
             1. Sentiment score (-1.0 to +1.0): -1.0..-0.6 strongly negative; \
             -0.6..-0.3 negative; -0.3..+0.3 neutral; +0.3..+0.6 positive; \
             +0.6..+1.0 strongly positive.\n\
             2. Market impact score (1-5): 1 minimal (routine updates); 2 low; \
             3 moderate (quarterly results, product updates); 4 high (major \
             announcements); 5 critical (market-moving events).\n\
             3. Confidence score (0.0 to 1.0): how unambiguous the article is.\n\
             {}\n\
             Return a JSON object with: sentiment (float), impact (integer 1-5), \
             confidence (float), rationale (string explaining both sentiment and \
             impact), key_factors (array of 3-5 short strings), summary \
             (one-sentence), stance (\"bullish\", \"bearish\" or \"neutral\").{}",
            category_context(category),
            strict_line
        );

        let excerpt: String = doc.body_text.chars().take(self.excerpt_chars).collect();
        let published = doc
            .published_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".into());
        let user = format!(
            "Analyze this news article:\n\n\
             Title: {}\nSource: {}\nPublished: {}\nCategory: {}\n\n\
             Content:\n{}\n\n\
             Provide sentiment, impact, confidence, rationale, key factors, a \
             one-sentence summary, and the overall stance.",
            doc.title,
            doc.source_label,
            published,
            category.label(),
            excerpt
        );

        OraclePrompt { system, user }
    }
}

/// Validate the raw oracle payload. Numeric drift is clamped into range;
/// an unknown stance or an empty factor list is a schema violation.
pub fn validate_score(raw: OracleScore) -> EnrichResult<SentimentScore> {
    let stance = Stance::from_str(&raw.stance)
        .ok_or_else(|| EnrichError::OracleSchema(format!("unknown stance {:?}", raw.stance)))?;
    if raw.key_factors.is_empty() {
        return Err(EnrichError::OracleSchema("empty key_factors".into()));
    }
    if raw.summary.trim().is_empty() {
        return Err(EnrichError::OracleSchema("empty summary".into()));
    }
    if !raw.sentiment.is_finite() || !raw.confidence.is_finite() {
        return Err(EnrichError::OracleSchema("non-finite score field".into()));
    }

    let mut key_factors = raw.key_factors;
    key_factors.truncate(5);

    Ok(SentimentScore {
        sentiment: raw.sentiment.clamp(-1.0, 1.0),
        impact: raw.impact.clamp(1, 5) as u8,
        confidence: raw.confidence.clamp(0.0, 1.0),
        stance,
        summary: raw.summary,
        rationale: raw.rationale,
        key_factors,
    })
}

/// Category-specific emphasis for the scoring prompt, carried over from the
/// taxonomy design: financial prompts stress quantitative guidance, product
/// prompts stress launch framing, and so on.
fn category_context(category: Category) -> &'static str {
    match category {
        Category::FinancialOperational => {
            "\nFocus on: earnings, revenue, margins, deliveries, production numbers.\n\
             High impact factors: quarterly results, delivery numbers, profit/loss, cost moves.\n"
        }
        Category::ProductTechnology => {
            "\nFocus on: new features, software updates, product launches, technical innovations.\n\
             High impact factors: major releases, technology breakthroughs, recalls.\n"
        }
        Category::StrategicExpansion => {
            "\nFocus on: market expansion, partnerships, acquisitions, strategic initiatives.\n\
             High impact factors: new markets, major partnerships, strategic pivots.\n"
        }
        Category::ManagementGovernance => {
            "\nFocus on: leadership changes, legal issues, board decisions, executive actions.\n\
             High impact factors: CEO actions, lawsuits, governance changes, shareholder votes.\n"
        }
        Category::PolicyRegulatory => {
            "\nFocus on: government policies, regulations, subsidies, compliance issues.\n\
             High impact factors: regulatory changes, policy shifts, government support.\n"
        }
        Category::MarketSentiment => {
            "\nFocus on: analyst ratings, investor sentiment, brand perception, market trends.\n\
             High impact factors: analyst upgrades/downgrades, sentiment shifts.\n"
        }
        Category::MacroExternal => {
            "\nFocus on: economic conditions, industry trends, external market factors.\n\
             High impact factors: economic indicators, industry disruptions, market conditions.\n"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassificationMethod;
    use crate::oracle::MockOracle;

    fn raw_score() -> OracleScore {
        OracleScore {
            sentiment: 0.6,
            impact: 4,
            confidence: 0.8,
            stance: "bullish".into(),
            summary: "Record deliveries beat estimates.".into(),
            rationale: "Strong beat with broad coverage.".into(),
            key_factors: vec!["deliveries".into(), "estimates beat".into(), "guidance".into()],
        }
    }

    fn doc() -> RawDocument {
        RawDocument {
            url: "https://x.com/a".into(),
            title: "Tesla posts record deliveries".into(),
            body_text: "Record quarter.".into(),
            published_at: None,
            source_label: "wire".into(),
        }
    }

    fn classification() -> Classification {
        Classification {
            category: Category::FinancialOperational,
            confidence: 0.8,
            rationale: "keywords".into(),
            method: ClassificationMethod::Keyword,
        }
    }

    #[test]
    fn validate_clamps_numeric_drift() {
        let mut raw = raw_score();
        raw.sentiment = 1.4;
        raw.impact = 9;
        raw.confidence = -0.2;
        let s = validate_score(raw).unwrap();
        assert_eq!(s.sentiment, 1.0);
        assert_eq!(s.impact, 5);
        assert_eq!(s.confidence, 0.0);
    }

    #[test]
    fn validate_rejects_bad_stance_and_empty_factors() {
        let mut raw = raw_score();
        raw.stance = "mixed".into();
        assert!(matches!(
            validate_score(raw),
            Err(EnrichError::OracleSchema(_))
        ));

        let mut raw = raw_score();
        raw.key_factors.clear();
        assert!(validate_score(raw).is_err());
    }

    #[test]
    fn validate_caps_factor_list_at_five() {
        let mut raw = raw_score();
        raw.key_factors = (0..8).map(|i| format!("f{i}")).collect();
        let s = validate_score(raw).unwrap();
        assert_eq!(s.key_factors.len(), 5);
    }

    #[tokio::test]
    async fn schema_failure_gets_one_strict_retry_then_none() {
        let scorer = Scorer::new(&PipelineConfig::default());
        let oracle = MockOracle::new();
        let mut bad = raw_score();
        bad.stance = "sideways".into();
        oracle.push_score(Ok(bad.clone()));
        oracle.push_score(Ok(bad));
        let out = scorer.score(&doc(), &classification(), &oracle).await;
        assert!(out.is_none());
        assert_eq!(
            oracle.score_calls.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[tokio::test]
    async fn transient_exhaustion_skips_the_strict_pass() {
        let mut cfg = PipelineConfig::default();
        cfg.oracle_backoff_ms = 1;
        let scorer = Scorer::new(&cfg);
        let oracle = MockOracle::new(); // empty script: every call is transient
        let out = scorer.score(&doc(), &classification(), &oracle).await;
        assert!(out.is_none());
        // One transient budget, not two.
        assert_eq!(
            oracle.score_calls.load(std::sync::atomic::Ordering::SeqCst),
            cfg.oracle_max_attempts as usize
        );
    }

    #[tokio::test]
    async fn second_attempt_can_recover() {
        let scorer = Scorer::new(&PipelineConfig::default());
        let oracle = MockOracle::new();
        let mut bad = raw_score();
        bad.key_factors.clear();
        oracle.push_score(Ok(bad));
        oracle.push_score(Ok(raw_score()));
        let out = scorer.score(&doc(), &classification(), &oracle).await.unwrap();
        assert_eq!(out.stance, Stance::Bullish);
        assert_eq!(out.impact, 4);
    }

    #[tokio::test]
    async fn inconsistent_stance_is_kept_verbatim() {
        // sentiment 0.6 with neutral stance: warned, not corrected.
        let scorer = Scorer::new(&PipelineConfig::default());
        let oracle = MockOracle::new();
        let mut raw = raw_score();
        raw.stance = "neutral".into();
        oracle.push_score(Ok(raw));
        let out = scorer.score(&doc(), &classification(), &oracle).await.unwrap();
        assert_eq!(out.stance, Stance::Neutral);
        assert!((out.sentiment - 0.6).abs() < 1e-6);
    }
}
