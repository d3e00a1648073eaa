// src/repo/mod.rs
//! Persistence boundary: at most one row per (owner_id, canonical_url).
//!
//! Two implementations: an in-process map for tests and single-binary runs,
//! and a PostgREST-backed store whose native upsert conflict handling gives
//! the last-writer-wins guarantee without application locks.

pub mod memory;
pub mod rest;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EnrichResult;
use crate::record::EnrichmentRecord;
use crate::score::Stance;
use crate::taxonomy::Category;

pub use memory::MemoryRepository;
pub use rest::PostgrestRepository;

/// Opaque row handle returned by an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredId(pub String);

/// Optional filters for time-windowed queries.
#[derive(Debug, Clone, Default)]
pub struct WindowFilter {
    pub category: Option<Category>,
    pub stance: Option<Stance>,
}

#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    /// Insert-or-replace keyed by (owner_id, canonical_url). Replaces all
    /// mutable fields, preserves the original row's `created_at`, and is
    /// atomic at row granularity.
    async fn upsert(&self, record: &EnrichmentRecord) -> EnrichResult<StoredId>;

    /// Records for one owner since `since`, ordered by `published_at`
    /// descending. Rows without a publish timestamp fall back to
    /// `created_at` for the cutoff and sort after dated rows. An empty
    /// window is Ok(vec![]), never an error.
    async fn query_window(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
        filter: &WindowFilter,
    ) -> EnrichResult<Vec<EnrichmentRecord>>;
}

/// Bounds enforced at the storage boundary regardless of backend.
pub(crate) fn check_bounds(record: &EnrichmentRecord) -> Result<(), String> {
    let c = record.classification.confidence;
    if !(0.0..=1.0).contains(&c) {
        return Err(format!("classification confidence {c} out of [0,1]"));
    }
    if let Some(s) = &record.score {
        if !(-1.0..=1.0).contains(&s.sentiment) {
            return Err(format!("sentiment {} out of [-1,1]", s.sentiment));
        }
        if !(1..=5).contains(&s.impact) {
            return Err(format!("impact {} out of [1,5]", s.impact));
        }
        if !(0.0..=1.0).contains(&s.confidence) {
            return Err(format!("score confidence {} out of [0,1]", s.confidence));
        }
    }
    Ok(())
}
