use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a [`DocumentProvider`](crate::DocumentProvider) while decoding bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The document is encrypted and the supplied password (if any) does not open it.
    #[error("document is password protected")]
    Locked,
    #[error("{0}")]
    Malformed(String),
}

/// Terminal failure of a single load attempt. The `Display` output is what consumers see in
/// `onError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("Source not found: {0}")]
    SourceNotFound(String),
    #[error("Invalid source: {0}")]
    InvalidSource(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Failed to read {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },
    #[error("Failed to parse PDF: {0}")]
    Decode(String),
    #[error("Invalid password")]
    InvalidPassword,
    #[error("Document is password protected")]
    LockedNoPassword,
}

impl LoadError {
    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        LoadError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

impl From<DecodeError> for LoadError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Locked => LoadError::LockedNoPassword,
            DecodeError::Malformed(message) => LoadError::Decode(message),
        }
    }
}
