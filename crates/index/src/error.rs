use thiserror::Error;

/// Failure talking to a backing store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Transient: connection refused, timeouts, 5xx. Worth retrying.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something we cannot use.
    #[error("store protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    /// Classify an HTTP failure status.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            StoreError::Unavailable(format!("{}: {}", status, body))
        } else {
            StoreError::Protocol(format!("{}: {}", status, body))
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Protocol(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

/// A relationship the graph writer refused. The batch carries on without it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphWriteError {
    #[error("relationship {0} points at itself")]
    SelfRelationship(String),

    #[error("entity {0} is neither in the batch nor in the graph")]
    UnknownEntity(String),

    #[error("ALIAS_OF is not stored as an edge")]
    NotAnEdge,
}

/// Build step aborted after retries ran out.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("graph store error: {0}")]
    GraphStore(#[source] StoreError),

    #[error("vector store error: {0}")]
    VectorStore(#[source] StoreError),
}
