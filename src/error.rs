// src/error.rs
//! Error taxonomy for the enrichment pipeline.
//!
//! Every variant maps to a stage-local handling policy: invalid documents are
//! dropped without retry, transient oracle/storage failures are retried with
//! backoff, schema violations get exactly one stricter retry, and constraint
//! violations drop the offending score instead of the whole record.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrichError {
    /// Malformed URL or missing required fields. Fatal for the document.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Oracle timeout, rate limit or transport failure. Retried with backoff.
    #[error("oracle transient failure: {0}")]
    OracleTransient(String),

    /// Oracle answered, but the structured payload is unusable.
    #[error("oracle schema violation: {0}")]
    OracleSchema(String),

    /// Repository connectivity or lock conflict. Retried with backoff.
    #[error("storage transient failure: {0}")]
    StorageTransient(String),

    /// Range/uniqueness check rejected by the storage boundary.
    #[error("storage constraint violation: {0}")]
    StorageConstraint(String),
}

impl EnrichError {
    /// Transient errors are the only ones worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EnrichError::OracleTransient(_) | EnrichError::StorageTransient(_)
        )
    }
}

pub type EnrichResult<T> = Result<T, EnrichError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classes_are_retryable() {
        assert!(EnrichError::OracleTransient("timeout".into()).is_transient());
        assert!(EnrichError::StorageTransient("conn reset".into()).is_transient());
        assert!(!EnrichError::InvalidDocument("no url".into()).is_transient());
        assert!(!EnrichError::OracleSchema("impact=9".into()).is_transient());
    }
}
