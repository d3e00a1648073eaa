// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod canonical;
pub mod classify;
pub mod config;
pub mod error;
pub mod oracle;
pub mod pipeline;
pub mod record;
pub mod repo;
pub mod retry;
pub mod score;
pub mod source;
pub mod taxonomy;

// ---- Re-exports for stable public API ----
pub use crate::canonical::{canonicalize, CanonicalIdentity};
pub use crate::classify::{Classification, ClassificationMethod, Classifier};
pub use crate::config::PipelineConfig;
pub use crate::error::{EnrichError, EnrichResult};
pub use crate::oracle::{DynOracle, MockOracle, NoopOracle, OpenAiOracle, TextOracle};
pub use crate::pipeline::{DocOutcome, Pipeline, RunSummary};
pub use crate::record::EnrichmentRecord;
pub use crate::repo::{MemoryRepository, PostgrestRepository, Repository, WindowFilter};
pub use crate::score::{Scorer, SentimentScore, Stance};
pub use crate::source::{DocumentSource, FixtureSource, RawDocument, SourceQuery};
pub use crate::taxonomy::{Category, Taxonomy};
