// src/taxonomy.rs
//! The fixed 7-category topic taxonomy plus its keyword sets.
//!
//! Loaded once at startup (builtin TOML embedded in the binary, or an
//! external file) and passed explicitly into the classifier; tests swap in
//! a smaller taxonomy the same way.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Topic categories for instrument news. Serialized with the human-readable
/// labels the storage schema uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Financial & Operational")]
    FinancialOperational,
    #[serde(rename = "Product & Technology")]
    ProductTechnology,
    #[serde(rename = "Strategic & Expansion")]
    StrategicExpansion,
    #[serde(rename = "Management & Governance")]
    ManagementGovernance,
    #[serde(rename = "Policy & Regulatory")]
    PolicyRegulatory,
    #[serde(rename = "Market & Sentiment")]
    MarketSentiment,
    #[serde(rename = "Macro & External")]
    MacroExternal,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::FinancialOperational => "Financial & Operational",
            Category::ProductTechnology => "Product & Technology",
            Category::StrategicExpansion => "Strategic & Expansion",
            Category::ManagementGovernance => "Management & Governance",
            Category::PolicyRegulatory => "Policy & Regulatory",
            Category::MarketSentiment => "Market & Sentiment",
            Category::MacroExternal => "Macro & External",
        }
    }

    /// Parse a label as emitted by the oracle. Tolerates surrounding
    /// whitespace and case differences, nothing fancier.
    pub fn from_label(s: &str) -> Option<Self> {
        let needle = s.trim();
        ALL.iter()
            .copied()
            .find(|c| c.label().eq_ignore_ascii_case(needle))
    }
}

const ALL: [Category; 7] = [
    Category::FinancialOperational,
    Category::ProductTechnology,
    Category::StrategicExpansion,
    Category::ManagementGovernance,
    Category::PolicyRegulatory,
    Category::MarketSentiment,
    Category::MacroExternal,
];

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One taxonomy entry: the category, a prompt-ready description, and the
/// keyword set the fast tier matches on.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryDef {
    pub category: Category,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Taxonomy {
    #[serde(rename = "category")]
    pub entries: Vec<CategoryDef>,
}

static BUILTIN: Lazy<Taxonomy> = Lazy::new(|| {
    let raw = include_str!("../config/taxonomy.toml");
    Taxonomy::from_toml(raw).expect("valid builtin taxonomy")
});

impl Taxonomy {
    /// The embedded 7-category default.
    pub fn builtin() -> Taxonomy {
        BUILTIN.clone()
    }

    pub fn from_toml(raw: &str) -> Result<Taxonomy> {
        let t: Taxonomy = toml::from_str(raw).context("parsing taxonomy TOML")?;
        anyhow::ensure!(!t.entries.is_empty(), "taxonomy has no categories");
        Ok(t)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Taxonomy> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading taxonomy from {}", path.as_ref().display()))?;
        Self::from_toml(&raw)
    }

    pub fn get(&self, category: Category) -> Option<&CategoryDef> {
        self.entries.iter().find(|e| e.category == category)
    }

    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.entries.iter().map(|e| e.category)
    }

    /// Category list rendered for oracle prompts: `- Label: description`.
    pub fn prompt_listing(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            out.push_str("- ");
            out.push_str(e.category.label());
            out.push_str(": ");
            out.push_str(&e.description);
            out.push('\n');
        }
        out
    }
}
