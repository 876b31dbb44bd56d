use thiserror::Error;

/// A package record that cannot be turned into a search document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("invalid record {path:?}: {reason}")]
    InvalidRecord { path: String, reason: String },
}

impl DocumentError {
    pub(crate) fn invalid(path: &str, reason: impl Into<String>) -> Self {
        DocumentError::InvalidRecord { path: path.to_string(), reason: reason.into() }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("search cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Invalid(#[from] DocumentError),
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),
    #[error("codec: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh failed: {0}")]
    RefreshFailed(#[source] StoreError),
}
