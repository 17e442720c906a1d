use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Browser shutdown failed: {0}")]
    BrowserCloseFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Page error: {0}")]
    PageError(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("No rating found for {0}")]
    RatingNotFound(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("No worker available for {item} after {waited:?}")]
    Starvation { item: String, waited: Duration },

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Input error: {0}")]
    InputError(String),

    #[error("Output error: {0}")]
    OutputError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("CSV error: {0}")]
    CsvError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl ScrapeError {
    /// How loudly a per-item failure is logged.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ScrapeError::RatingNotFound(_) => ErrorSeverity::Low,
            ScrapeError::ElementNotFound(_) => ErrorSeverity::Low,
            ScrapeError::BrowserCloseFailed(_) => ErrorSeverity::Low,
            ScrapeError::WorkerPanicked(_) => ErrorSeverity::High,
            ScrapeError::ConfigurationError(_) => ErrorSeverity::High,
            ScrapeError::BrowserLaunchFailed(_) => ErrorSeverity::High,
            ScrapeError::InputError(_) => ErrorSeverity::Critical,
            ScrapeError::Starvation { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<std::io::Error> for ScrapeError {
    fn from(err: std::io::Error) -> Self {
        ScrapeError::IoError(err.to_string())
    }
}

impl From<csv::Error> for ScrapeError {
    fn from(err: csv::Error) -> Self {
        ScrapeError::CsvError(err.to_string())
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        ScrapeError::SerializationError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ScrapeError {
    fn from(err: tokio::task::JoinError) -> Self {
        ScrapeError::TaskFailed(err.to_string())
    }
}
