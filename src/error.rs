//! Error types for the session store and its backends

use thiserror::Error;

/// Errors reported by an object backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The object does not exist at the requested key
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure (network, permission, throttling, ...)
    #[error("backend error: {0}")]
    Other(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

/// Errors surfaced to callers of the session store.
///
/// Only construction, `save` and `extract` produce these; existence checks and
/// deletes log their failures instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A required store option is missing or empty
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Configuration file could not be read or parsed
    #[error("failed to load configuration: {0}")]
    Config(String),

    #[error("failed to save session archive to '{key}': {source}")]
    Save {
        key: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to extract session archive '{key}' to '{path}': {source}")]
    Extract {
        key: String,
        path: String,
        #[source]
        source: BackendError,
    },
}
