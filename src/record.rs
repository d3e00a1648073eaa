// src/record.rs
//! The unit of persistence. Built exactly once per successfully classified
//! document and never mutated afterwards; re-ingestion builds a fresh
//! record that replaces the stored row wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalIdentity;
use crate::classify::Classification;
use crate::error::{EnrichError, EnrichResult};
use crate::score::SentimentScore;
use crate::source::RawDocument;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub identity: CanonicalIdentity,
    pub title: String,
    pub body_text: String,
    pub source_label: String,
    pub published_at: Option<DateTime<Utc>>,
    pub classification: Classification,
    /// Absent when scoring was skipped; classification alone is still valuable.
    pub score: Option<SentimentScore>,
    /// Partition key. One row per (owner_id, canonical_url).
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichmentRecord {
    /// Pure assembly. Fails only on incomplete inputs; a missing score is
    /// fine, the record persists classified-only.
    pub fn build(
        identity: CanonicalIdentity,
        doc: &RawDocument,
        classification: Classification,
        score: Option<SentimentScore>,
        owner_id: &str,
    ) -> EnrichResult<EnrichmentRecord> {
        if identity.canonical_url.is_empty() {
            return Err(EnrichError::InvalidDocument("empty canonical url".into()));
        }
        if owner_id.trim().is_empty() {
            return Err(EnrichError::InvalidDocument("empty owner_id".into()));
        }

        let now = Utc::now();
        Ok(EnrichmentRecord {
            identity,
            title: doc.title.clone(),
            body_text: doc.body_text.clone(),
            source_label: doc.source_label.clone(),
            published_at: doc.published_at,
            classification,
            score,
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Copy with the score dropped; used when the storage boundary rejects a
    /// score field but the classification is still worth keeping.
    pub fn without_score(&self) -> EnrichmentRecord {
        let mut r = self.clone();
        r.score = None;
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassificationMethod;
    use crate::taxonomy::Category;

    fn parts() -> (CanonicalIdentity, RawDocument, Classification) {
        (
            CanonicalIdentity {
                canonical_url: "https://x.com/a".into(),
                content_hash: "abc".into(),
            },
            RawDocument {
                url: "https://x.com/a?utm_source=y".into(),
                title: "Title".into(),
                body_text: "Body".into(),
                published_at: None,
                source_label: "wire".into(),
            },
            Classification {
                category: Category::MarketSentiment,
                confidence: 0.5,
                rationale: "r".into(),
                method: ClassificationMethod::Keyword,
            },
        )
    }

    #[test]
    fn builds_without_score() {
        let (id, doc, cls) = parts();
        let rec = EnrichmentRecord::build(id, &doc, cls, None, "owner-1").unwrap();
        assert!(rec.score.is_none());
        assert_eq!(rec.identity.canonical_url, "https://x.com/a");
        assert_eq!(rec.created_at, rec.updated_at);
    }

    #[test]
    fn rejects_empty_owner() {
        let (id, doc, cls) = parts();
        assert!(EnrichmentRecord::build(id, &doc, cls, None, "  ").is_err());
    }

    #[test]
    fn without_score_strips_only_score() {
        let (id, doc, cls) = parts();
        let rec = EnrichmentRecord::build(id, &doc, cls, None, "owner-1").unwrap();
        let stripped = rec.without_score();
        assert_eq!(stripped.title, rec.title);
        assert!(stripped.score.is_none());
    }
}
