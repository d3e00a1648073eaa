// src/canonical.rs
//! Canonical identity: URL normalization + content hash used for dedup.
//! Pure and deterministic: same input always yields the same identity.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{EnrichError, EnrichResult};
use crate::source::RawDocument;

/// Query keys that never contribute to document identity.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_cid",
    "mc_eid",
    "ref",
    "_dt",
];

/// Stable dedup key derived from a `RawDocument`.
///
/// `canonical_url` is the primary identity; `content_hash` catches the same
/// text republished under a different URL (flagged, never auto-merged).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalIdentity {
    pub canonical_url: String,
    pub content_hash: String,
}

/// Derive the canonical identity for a raw document.
///
/// Rejects documents without a usable `url` or a non-empty `title`; that is
/// the only failure path. No I/O, no randomness.
pub fn canonicalize(doc: &RawDocument) -> EnrichResult<CanonicalIdentity> {
    if doc.url.trim().is_empty() {
        return Err(EnrichError::InvalidDocument("empty url".into()));
    }
    if doc.title.trim().is_empty() {
        return Err(EnrichError::InvalidDocument(format!(
            "missing title for {}",
            doc.url
        )));
    }

    let canonical_url = canonical_url(&doc.url)?;
    let content_hash = content_hash(&doc.title, &doc.body_text);

    Ok(CanonicalIdentity {
        canonical_url,
        content_hash,
    })
}

/// Normalize a URL string: lowercase scheme/host, drop fragments, strip
/// tracking query keys, trim trailing slashes.
pub fn canonical_url(raw: &str) -> EnrichResult<String> {
    let mut parsed = Url::parse(raw.trim())
        .map_err(|e| EnrichError::InvalidDocument(format!("unparsable url {raw:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(EnrichError::InvalidDocument(format!(
            "unsupported scheme in {raw:?}"
        )));
    }

    parsed.set_fragment(None);

    // Url lowercases scheme and host on parse; the query needs manual work.
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed
            .query_pairs_mut()
            .clear()
            .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    // Collapse duplicate trailing slashes; the bare host keeps no slash either.
    let mut out = parsed.to_string();
    while out.ends_with('/') {
        out.pop();
    }
    Ok(out)
}

/// Stable sha256 hash over `normalize(title) + "\n" + normalize(body)`.
pub fn content_hash(title: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(title).as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize_text(body).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

/// Normalize text for hashing: decode HTML entities, strip tags, lowercase,
/// collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();

    out.trim().to_ascii_lowercase()
}
