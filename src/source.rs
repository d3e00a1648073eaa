// src/source.rs
//! Document sources: the raw input shape plus the provider trait the core
//! consumes. The mechanism that actually retrieves documents (search, feeds,
//! browser automation) lives behind `DocumentSource`; the pipeline only sees
//! the `RawDocument`s it yields.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One candidate document as received from a provider. Transient; never
/// persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawDocument {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body_text: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_label: String,
}

/// Free-form query parameters forwarded to a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceQuery {
    /// Instrument the run is about, e.g. "TSLA".
    pub ticker: String,
    #[serde(default)]
    pub terms: Vec<String>,
    #[serde(default)]
    pub max_documents: Option<usize>,
}

#[async_trait::async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawDocument>>;
    fn name(&self) -> &'static str;
}

/// Fixture-backed source for tests and the demo binary: deserializes a JSON
/// array of `RawDocument`s instead of hitting the network.
pub struct FixtureSource {
    docs: Vec<RawDocument>,
}

impl FixtureSource {
    pub fn from_json(raw: &str) -> Result<Self> {
        let docs: Vec<RawDocument> = serde_json::from_str(raw)?;
        Ok(Self { docs })
    }

    pub fn from_docs(docs: Vec<RawDocument>) -> Self {
        Self { docs }
    }
}

#[async_trait::async_trait]
impl DocumentSource for FixtureSource {
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawDocument>> {
        let mut out = self.docs.clone();
        if let Some(cap) = query.max_documents {
            out.truncate(cap);
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_source_parses_and_caps() {
        let raw = r#"[
            {"url": "https://a.example/1", "title": "one", "source_label": "wire"},
            {"url": "https://a.example/2", "title": "two", "source_label": "wire"}
        ]"#;
        let src = FixtureSource::from_json(raw).unwrap();
        let q = SourceQuery {
            ticker: "TSLA".into(),
            terms: vec![],
            max_documents: Some(1),
        };
        let docs = src.fetch(&q).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "one");
        assert!(docs[0].published_at.is_none());
    }
}
