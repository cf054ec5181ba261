//! Errors raised while loading or applying translation rule tables.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("failed to read rule manifest {path}: {source}")]
    ManifestIo { path: String, source: std::io::Error },

    #[error("malformed rule manifest {path}: {source}")]
    ManifestJson { path: String, source: serde_json::Error },

    #[error("invalid regex {pattern:?} in rule manifest: {source}")]
    BadPattern { pattern: String, source: regex::Error },

    /// A matcher's `matcher_array` names a capture group the regex doesn't have.
    #[error("matcher for {pattern:?} references capture group {group}, but the regex only has {available}")]
    MissingCaptureGroup { pattern: String, group: usize, available: usize },
}

pub type TranslateResult<T> = Result<T, TranslateError>;
