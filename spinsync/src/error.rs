//! Error types for the spin log client

/// Result type alias for spin log operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the spin log backend
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// API returned an error status
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited by the backend (HTTP 429)
    #[error("Rate limit exceeded, please try again later")]
    RateLimited,

    /// Nothing resolvable for this request (HTTP 422). Benign: callers map
    /// this to an empty result rather than a failure.
    #[error("No data available for this request")]
    NoData,

    /// Payload did not match the expected shape. Fatal for the request,
    /// never retried.
    #[error("Invalid response shape: {0}")]
    InvalidResponse(String),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Map an HTTP status code and message to an error variant
    pub fn from_status_code(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => Self::RateLimited,
            422 => Self::NoData,
            _ => Self::Api {
                status,
                message: message.into(),
            },
        }
    }

    /// True for errors worth retrying: network failures, timeouts and
    /// rate limiting. Malformed payloads and other API errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout | Self::RateLimited => true,
            _ => false,
        }
    }

    /// True when the backend signalled rate limiting
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    /// True for the benign "nothing resolvable" condition
    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }
}
