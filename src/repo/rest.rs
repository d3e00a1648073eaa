// src/repo/rest.rs
//! PostgREST-backed repository (Supabase-compatible). The uniqueness
//! constraint on (owner_id, canonical_url) plus `resolution=merge-duplicates`
//! gives atomic insert-or-replace; `created_at` is never sent, so the
//! database default fills it on insert and merges leave it untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_bounds, Repository, StoredId, WindowFilter};
use crate::canonical::CanonicalIdentity;
use crate::classify::{Classification, ClassificationMethod};
use crate::error::{EnrichError, EnrichResult};
use crate::record::EnrichmentRecord;
use crate::score::{SentimentScore, Stance};
use crate::taxonomy::Category;

pub struct PostgrestRepository {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    table: String,
}

impl PostgrestRepository {
    /// `base_url` up to and including `/rest/v1` (no trailing slash).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, table: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("equity-news-enricher/0.1")
            .connect_timeout(std::time::Duration::from_secs(4))
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            table: table.to_string(),
        }
    }

    /// Build from SUPABASE_URL / SUPABASE_KEY. Returns None when either is
    /// missing so callers can fall back to the in-memory store.
    pub fn from_env(table: &str) -> Option<Self> {
        let url = std::env::var("SUPABASE_URL").ok()?;
        let key = std::env::var("SUPABASE_KEY").ok()?;
        Some(Self::new(format!("{url}/rest/v1"), key, table))
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.base_url, self.table)
    }

    /// PostgREST params for a window query. Rows without `published_at`
    /// fall back to `created_at` for the cutoff and sort after dated rows,
    /// matching the in-memory backend.
    fn window_query(
        owner_id: &str,
        since: DateTime<Utc>,
        filter: &WindowFilter,
    ) -> Vec<(String, String)> {
        let since = since.to_rfc3339();
        let mut query: Vec<(String, String)> = vec![
            ("owner_id".into(), format!("eq.{owner_id}")),
            (
                "or".into(),
                format!("(published_at.gte.{since},and(published_at.is.null,created_at.gte.{since}))"),
            ),
            (
                "order".into(),
                "published_at.desc.nullslast,created_at.desc".into(),
            ),
        ];
        if let Some(c) = filter.category {
            query.push(("category".into(), format!("eq.{}", c.label())));
        }
        if let Some(s) = filter.stance {
            let label = match s {
                Stance::Bullish => "bullish",
                Stance::Bearish => "bearish",
                Stance::Neutral => "neutral",
            };
            query.push(("stance".into(), format!("eq.{label}")));
        }
        query
    }

    fn map_status(status: reqwest::StatusCode, body: String) -> EnrichError {
        if status.as_u16() == 429 || status.is_server_error() {
            EnrichError::StorageTransient(format!("status {status}: {body}"))
        } else {
            // 409 unique conflicts outside on_conflict, 4xx range checks.
            EnrichError::StorageConstraint(format!("status {status}: {body}"))
        }
    }
}

/// Flat row shape matching the logical storage schema.
#[derive(Debug, Serialize, Deserialize)]
struct Row {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    owner_id: String,
    canonical_url: String,
    content_hash: String,
    title: String,
    body_text: String,
    source_label: String,
    published_at: Option<DateTime<Utc>>,
    category: Category,
    classification_confidence: f32,
    classification_rationale: String,
    classification_method: ClassificationMethod,
    #[serde(default)]
    sentiment: Option<f32>,
    #[serde(default)]
    impact: Option<u8>,
    #[serde(default)]
    score_confidence: Option<f32>,
    #[serde(default)]
    stance: Option<Stance>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    score_rationale: Option<String>,
    #[serde(default)]
    key_factors: Option<Vec<String>>,
    // Never serialized on upsert: the database owns created_at.
    #[serde(skip_serializing)]
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl Row {
    fn from_record(r: &EnrichmentRecord) -> Row {
        Row {
            id: None,
            owner_id: r.owner_id.clone(),
            canonical_url: r.identity.canonical_url.clone(),
            content_hash: r.identity.content_hash.clone(),
            title: r.title.clone(),
            body_text: r.body_text.clone(),
            source_label: r.source_label.clone(),
            published_at: r.published_at,
            category: r.classification.category,
            classification_confidence: r.classification.confidence,
            classification_rationale: r.classification.rationale.clone(),
            classification_method: r.classification.method,
            sentiment: r.score.as_ref().map(|s| s.sentiment),
            impact: r.score.as_ref().map(|s| s.impact),
            score_confidence: r.score.as_ref().map(|s| s.confidence),
            stance: r.score.as_ref().map(|s| s.stance),
            summary: r.score.as_ref().map(|s| s.summary.clone()),
            score_rationale: r.score.as_ref().map(|s| s.rationale.clone()),
            key_factors: r.score.as_ref().map(|s| s.key_factors.clone()),
            created_at: None,
            updated_at: Utc::now(),
        }
    }

    fn into_record(self) -> EnrichmentRecord {
        let score = match (
            self.sentiment,
            self.impact,
            self.score_confidence,
            self.stance,
        ) {
            (Some(sentiment), Some(impact), Some(confidence), Some(stance)) => {
                Some(SentimentScore {
                    sentiment,
                    impact,
                    confidence,
                    stance,
                    summary: self.summary.unwrap_or_default(),
                    rationale: self.score_rationale.unwrap_or_default(),
                    key_factors: self.key_factors.unwrap_or_default(),
                })
            }
            _ => None,
        };
        EnrichmentRecord {
            identity: CanonicalIdentity {
                canonical_url: self.canonical_url,
                content_hash: self.content_hash,
            },
            title: self.title,
            body_text: self.body_text,
            source_label: self.source_label,
            published_at: self.published_at,
            classification: Classification {
                category: self.category,
                confidence: self.classification_confidence,
                rationale: self.classification_rationale,
                method: self.classification_method,
            },
            score,
            owner_id: self.owner_id,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            updated_at: self.updated_at,
        }
    }
}

#[async_trait::async_trait]
impl Repository for PostgrestRepository {
    async fn upsert(&self, record: &EnrichmentRecord) -> EnrichResult<StoredId> {
        check_bounds(record).map_err(EnrichError::StorageConstraint)?;

        let row = Row::from_record(record);
        let resp = self
            .http
            .post(self.table_url())
            .query(&[("on_conflict", "owner_id,canonical_url")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&[&row])
            .send()
            .await
            .map_err(|e| EnrichError::StorageTransient(format!("upsert request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        let rows: Vec<Row> = resp
            .json()
            .await
            .map_err(|e| EnrichError::StorageTransient(format!("upsert response: {e}")))?;
        let id = rows
            .first()
            .and_then(|r| r.id)
            .map(|id| id.to_string())
            .unwrap_or_else(|| record.identity.canonical_url.clone());
        debug!(target: "repo", %id, "upserted row");
        Ok(StoredId(id))
    }

    async fn query_window(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
        filter: &WindowFilter,
    ) -> EnrichResult<Vec<EnrichmentRecord>> {
        let query = Self::window_query(owner_id, since, filter);

        let resp = self
            .http
            .get(self.table_url())
            .query(&query)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| EnrichError::StorageTransient(format!("query request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        let rows: Vec<Row> = resp
            .json()
            .await
            .map_err(|e| EnrichError::StorageTransient(format!("query response: {e}")))?;
        Ok(rows.into_iter().map(Row::into_record).collect())
    }
}
