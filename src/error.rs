use thiserror::Error;

/// Failures that abort a single pipeline run.
///
/// None of these are retried; the next scheduled refresh is the retry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("invalid time window: {0}")]
    InvalidWindow(String),

    #[error("{0}")]
    BackendUnavailable(String),

    #[error("backend rejected query (HTTP {status}): {message}")]
    BackendRequest { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),
}

impl QueryError {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::InvalidWindow(_) => "invalid_window",
            QueryError::BackendUnavailable(_) => "backend_unavailable",
            QueryError::BackendRequest { .. } => "backend_request",
            QueryError::Network(_) => "network",
        }
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        QueryError::Network(err.to_string())
    }
}
