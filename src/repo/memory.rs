// src/repo/memory.rs
//! In-process repository. A single mutex over the row map makes each upsert
//! an atomic insert-or-replace, so concurrent writers to the same canonical
//! key serialize to one full row (no field interleaving).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::{check_bounds, Repository, StoredId, WindowFilter};
use crate::error::{EnrichError, EnrichResult};
use crate::record::EnrichmentRecord;

#[derive(Debug, Clone)]
struct StoredRow {
    id: u64,
    record: EnrichmentRecord,
}

#[derive(Default)]
pub struct MemoryRepository {
    rows: Mutex<HashMap<(String, String), StoredRow>>,
    next_id: AtomicU64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("repo mutex").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl Repository for MemoryRepository {
    async fn upsert(&self, record: &EnrichmentRecord) -> EnrichResult<StoredId> {
        check_bounds(record).map_err(EnrichError::StorageConstraint)?;

        let key = (
            record.owner_id.clone(),
            record.identity.canonical_url.clone(),
        );
        let now = Utc::now();

        let mut rows = self.rows.lock().expect("repo mutex");
        let id = match rows.get(&key) {
            Some(existing) => {
                let mut fresh = record.clone();
                fresh.created_at = existing.record.created_at;
                // Strictly advancing updated_at even when the clock has not
                // ticked between two runs.
                fresh.updated_at = if now > existing.record.updated_at {
                    now
                } else {
                    existing.record.updated_at + Duration::milliseconds(1)
                };
                let id = existing.id;
                rows.insert(key, StoredRow { id, record: fresh });
                debug!(target: "repo", id, "replaced existing row");
                id
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                let mut fresh = record.clone();
                fresh.created_at = now;
                fresh.updated_at = now;
                rows.insert(key, StoredRow { id, record: fresh });
                id
            }
        };

        Ok(StoredId(id.to_string()))
    }

    async fn query_window(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
        filter: &WindowFilter,
    ) -> EnrichResult<Vec<EnrichmentRecord>> {
        let rows = self.rows.lock().expect("repo mutex");
        // Rows without a publish timestamp fall back to created_at for the
        // window check and sort after dated rows.
        let mut out: Vec<EnrichmentRecord> = rows
            .values()
            .filter(|r| r.record.owner_id == owner_id)
            .filter(|r| r.record.published_at.unwrap_or(r.record.created_at) >= since)
            .filter(|r| {
                filter
                    .category
                    .map(|c| r.record.classification.category == c)
                    .unwrap_or(true)
            })
            .filter(|r| match filter.stance {
                Some(st) => r.record.score.as_ref().map(|s| s.stance) == Some(st),
                None => true,
            })
            .map(|r| r.record.clone())
            .collect();

        out.sort_by_key(|r| {
            (
                r.published_at.is_none(),
                std::cmp::Reverse(r.published_at.unwrap_or(r.created_at)),
            )
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::CanonicalIdentity;
    use crate::classify::{Classification, ClassificationMethod};
    use crate::score::{SentimentScore, Stance};
    use crate::source::RawDocument;
    use crate::taxonomy::Category;

    fn record(url: &str, owner: &str) -> EnrichmentRecord {
        let doc = RawDocument {
            url: url.into(),
            title: "t".into(),
            body_text: "b".into(),
            published_at: None,
            source_label: "wire".into(),
        };
        EnrichmentRecord::build(
            CanonicalIdentity {
                canonical_url: url.into(),
                content_hash: "h".into(),
            },
            &doc,
            Classification {
                category: Category::MarketSentiment,
                confidence: 0.5,
                rationale: "r".into(),
                method: ClassificationMethod::Keyword,
            },
            None,
            owner,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_row_and_created_at() {
        let repo = MemoryRepository::new();
        let rec = record("https://x.com/a", "o1");
        let id1 = repo.upsert(&rec).await.unwrap();
        let first = repo
            .query_window("o1", Utc::now() - Duration::days(1), &WindowFilter::default())
            .await
            .unwrap()
            .remove(0);

        let id2 = repo.upsert(&rec).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(repo.len(), 1);

        let second = repo
            .query_window("o1", Utc::now() - Duration::days(1), &WindowFilter::default())
            .await
            .unwrap()
            .remove(0);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[tokio::test]
    async fn owner_partition_is_respected() {
        let repo = MemoryRepository::new();
        repo.upsert(&record("https://x.com/a", "o1")).await.unwrap();
        repo.upsert(&record("https://x.com/a", "o2")).await.unwrap();
        assert_eq!(repo.len(), 2);
        let o1 = repo
            .query_window("o1", Utc::now() - Duration::days(1), &WindowFilter::default())
            .await
            .unwrap();
        assert_eq!(o1.len(), 1);
    }

    #[tokio::test]
    async fn empty_window_is_ok() {
        let repo = MemoryRepository::new();
        let out = repo
            .query_window("nobody", Utc::now(), &WindowFilter::default())
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_score_is_a_constraint_error() {
        let repo = MemoryRepository::new();
        let mut rec = record("https://x.com/a", "o1");
        rec.score = Some(SentimentScore {
            sentiment: 2.0,
            impact: 3,
            confidence: 0.5,
            stance: Stance::Neutral,
            summary: "s".into(),
            rationale: "r".into(),
            key_factors: vec!["f".into()],
        });
        assert!(matches!(
            repo.upsert(&rec).await,
            Err(EnrichError::StorageConstraint(_))
        ));
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn rows_without_publish_timestamp_use_created_at_and_sort_last() {
        let repo = MemoryRepository::new();
        // Freshly created, no publish timestamp: inside the window.
        repo.upsert(&record("https://x.com/undated", "o1")).await.unwrap();

        let mut dated = record("https://x.com/dated", "o1");
        dated.published_at = Some(Utc::now() - Duration::hours(5));
        repo.upsert(&dated).await.unwrap();

        let since = Utc::now() - Duration::days(1);
        let out = repo
            .query_window("o1", since, &WindowFilter::default())
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        // Dated rows first, even when the undated row is newer.
        assert_eq!(out[0].identity.canonical_url, "https://x.com/dated");
        assert_eq!(out[1].identity.canonical_url, "https://x.com/undated");
    }

    #[tokio::test]
    async fn stance_filter_applies() {
        let repo = MemoryRepository::new();
        let mut rec = record("https://x.com/a", "o1");
        rec.score = Some(SentimentScore {
            sentiment: 0.4,
            impact: 3,
            confidence: 0.5,
            stance: Stance::Bullish,
            summary: "s".into(),
            rationale: "r".into(),
            key_factors: vec!["f".into()],
        });
        repo.upsert(&rec).await.unwrap();
        repo.upsert(&record("https://x.com/b", "o1")).await.unwrap();

        let since = Utc::now() - Duration::days(1);
        let filter = WindowFilter {
            category: None,
            stance: Some(Stance::Bullish),
        };
        let out = repo.query_window("o1", since, &filter).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].identity.canonical_url, "https://x.com/a");
    }
}
