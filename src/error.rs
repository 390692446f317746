use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScrapeError>;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Missing or unusable credentials/settings. Never retried through the fallback.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An anti-automation defense answered instead of content.
    #[error("blocked: {0}")]
    SoftBlock(String),

    /// The backend answered but reported it is not ready for a session.
    #[error("scraper initialization failed")]
    InitializationFailed,

    #[error("extraction timeout after {}s", .0.as_secs())]
    ExtractionTimeout(Duration),

    #[error("no tweets collected for @{0}")]
    ZeroResult(String),

    #[error("unable to send request: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("unable to parse page: {0}")]
    Parse(String),

    #[error("webdriver error: {0}")]
    WebDriver(String),

    #[error("failed to launch fallback task: {0}")]
    Launch(String),

    #[error("interrupted by user")]
    Interrupted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        ScrapeError::Network(err.to_string())
    }
}
