use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScrapeError {
    #[error("Job queue is full")]
    QueueFull,

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("No browser session became available in time")]
    PoolExhausted,

    #[error("Browser pool is shutting down")]
    PoolClosed,

    #[error("Navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("Browser session crashed: {0}")]
    SessionCrashed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Extraction failed: {0}")]
    ExtractionError(String),

    #[error("Navigation did not produce a page: {0}")]
    UnsupportedContent(String),

    #[error("Unknown extraction strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("URL was judged to be unsafe: {0}")]
    UnsafeUrl(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ScrapeError {
    /// Transient infrastructure failures the orchestrator retries locally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::PoolExhausted
                | ScrapeError::NavigationTimeout(_)
                | ScrapeError::SessionCrashed(_)
                | ScrapeError::NetworkError(_)
                | ScrapeError::BrowserLaunchFailed(_)
        )
    }

    /// Whether the session that produced this error may hold dirty state and
    /// must be discarded instead of returned to the pool.
    pub fn implicates_session(&self) -> bool {
        matches!(
            self,
            ScrapeError::NavigationTimeout(_)
                | ScrapeError::SessionCrashed(_)
                | ScrapeError::NetworkError(_)
                | ScrapeError::Cancelled
        )
    }

    /// Errors that reject a submission before any job exists.
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            ScrapeError::QueueFull
                | ScrapeError::QueueClosed
                | ScrapeError::InvalidRequest(_)
                | ScrapeError::UnsafeUrl(_)
                | ScrapeError::UnknownStrategy(_)
        )
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::QueueFull => "queue_full",
            ScrapeError::QueueClosed => "queue_closed",
            ScrapeError::PoolExhausted => "pool_exhausted",
            ScrapeError::PoolClosed => "pool_closed",
            ScrapeError::NavigationTimeout(_) => "timeout",
            ScrapeError::SessionCrashed(_) => "session_crashed",
            ScrapeError::NetworkError(_) => "network",
            ScrapeError::ExtractionError(_) => "extraction",
            ScrapeError::UnsupportedContent(_) => "unsupported_content",
            ScrapeError::UnknownStrategy(_) => "unknown_strategy",
            ScrapeError::InvalidRequest(_) => "invalid_request",
            ScrapeError::UnsafeUrl(_) => "unsafe_url",
            ScrapeError::Cancelled => "cancelled",
            ScrapeError::BrowserLaunchFailed(_) => "launch_failed",
            ScrapeError::ConfigurationError(_) => "configuration",
            ScrapeError::IoError(_) => "io",
            ScrapeError::SerializationError(_) => "serialization",
        }
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(err: std::io::Error) -> Self {
        ScrapeError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        ScrapeError::SerializationError(err.to_string())
    }
}

impl From<image::ImageError> for ScrapeError {
    fn from(err: image::ImageError) -> Self {
        ScrapeError::ExtractionError(err.to_string())
    }
}
