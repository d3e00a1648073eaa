// src/config.rs
//! Runtime configuration: defaults, TOML file, env overrides.
//!
//! Load order: builtin defaults <- config/pipeline.toml (or
//! $ENRICHER_CONFIG_PATH) <- individual env overrides. All loaded values are
//! sanitized into their valid ranges rather than rejected.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_CONFIG_PATH: &str = "ENRICHER_CONFIG_PATH";
pub const ENV_KEYWORD_THRESHOLD: &str = "ENRICHER_KEYWORD_THRESHOLD";
pub const ENV_DOC_PARALLELISM: &str = "ENRICHER_DOC_PARALLELISM";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Keyword-tier confidence below this escalates to the oracle.
    pub keyword_confidence_threshold: f32,
    /// Title keyword hits count this many times a body hit.
    pub title_weight: u32,
    /// Body excerpt sizes for the two prompt kinds.
    pub classify_excerpt_chars: usize,
    pub score_excerpt_chars: usize,
    /// Oracle retry budget (transient failures only) and base backoff.
    pub oracle_max_attempts: u32,
    pub oracle_backoff_ms: u64,
    /// Storage retry budget and base backoff.
    pub storage_max_attempts: u32,
    pub storage_backoff_ms: u64,
    /// Bounded document parallelism within one batch.
    pub doc_parallelism: usize,
    /// Concurrent oracle calls, independent of doc_parallelism.
    pub oracle_parallelism: usize,
    /// Stance/sentiment divergence beyond this logs an inconsistency warning.
    pub stance_tolerance: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keyword_confidence_threshold: 0.6,
            title_weight: 3,
            classify_excerpt_chars: 500,
            score_excerpt_chars: 1000,
            oracle_max_attempts: 3,
            oracle_backoff_ms: 250,
            storage_max_attempts: 3,
            storage_backoff_ms: 200,
            doc_parallelism: 4,
            oracle_parallelism: 2,
            stance_tolerance: 0.15,
        }
    }
}

impl PipelineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config from {}", path.as_ref().display()))?;
        let mut cfg: PipelineConfig = toml::from_str(&data).context("parsing pipeline config")?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Env path, then the default file, then builtin defaults. Missing files
    /// are fine; a present-but-broken file is an error.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut cfg = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = parse_f32_env(ENV_KEYWORD_THRESHOLD) {
            self.keyword_confidence_threshold = v;
        }
        if let Some(v) = parse_usize_env(ENV_DOC_PARALLELISM) {
            self.doc_parallelism = v;
        }
    }

    fn sanitize(&mut self) {
        self.keyword_confidence_threshold = self.keyword_confidence_threshold.clamp(0.0, 1.0);
        self.stance_tolerance = self.stance_tolerance.clamp(0.0, 1.0);
        self.title_weight = self.title_weight.max(1);
        self.oracle_max_attempts = self.oracle_max_attempts.max(1);
        self.storage_max_attempts = self.storage_max_attempts.max(1);
        self.doc_parallelism = self.doc_parallelism.max(1);
        self.oracle_parallelism = self.oracle_parallelism.max(1);
        self.classify_excerpt_chars = self.classify_excerpt_chars.max(100);
        self.score_excerpt_chars = self.score_excerpt_chars.max(100);
    }
}

fn parse_f32_env(name: &str) -> Option<f32> {
    std::env::var(name).ok()?.trim().parse::<f32>().ok()
}

fn parse_usize_env(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse::<usize>().ok()
}
