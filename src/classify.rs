//! Decide whether a primary-backend failure is worth retrying through the browser.

use crate::error::ScrapeError;

/// Substrings that indicate an anti-automation defense rather than a permanent error.
pub const SOFT_BLOCK_INDICATORS: &[&str] = &[
    "cloudflare",
    "blocked",
    "authentication failed",
    "login",
    "cookies",
    "initialization failed",
    "no tweets collected",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub fallback_needed: bool,
    pub reason: String,
}

impl Classification {
    pub fn soft_block(reason: impl Into<String>) -> Self {
        Self {
            fallback_needed: true,
            reason: reason.into(),
        }
    }

    pub fn fatal() -> Self {
        Self {
            fallback_needed: false,
            reason: "fatal".to_owned(),
        }
    }
}

pub trait FailureClassifier: Send + Sync {
    /// Classify a raw error message.
    fn classify_message(&self, message: &str) -> Classification;

    /// Classify a typed error. Configuration errors are always fatal, typed soft
    /// blocks always fall back; anything else goes through the message.
    fn classify(&self, error: &ScrapeError) -> Classification {
        match error {
            ScrapeError::Configuration(_) => Classification::fatal(),
            ScrapeError::SoftBlock(_) => Classification::soft_block("blocked"),
            ScrapeError::ZeroResult(_) => Classification::soft_block("no tweets collected"),
            other => self.classify_message(&other.to_string()),
        }
    }
}

/// Case-insensitive substring match against a fixed vocabulary.
#[derive(Debug, Clone)]
pub struct SubstringClassifier {
    indicators: Vec<String>,
}

impl SubstringClassifier {
    pub fn new<I, S>(indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indicators: indicators
                .into_iter()
                .map(|s| s.into().to_lowercase())
                .collect(),
        }
    }
}

impl Default for SubstringClassifier {
    fn default() -> Self {
        Self::new(SOFT_BLOCK_INDICATORS.iter().copied())
    }
}

impl FailureClassifier for SubstringClassifier {
    fn classify_message(&self, message: &str) -> Classification {
        let message = message.to_lowercase();
        match self.indicators.iter().find(|i| message.contains(i.as_str())) {
            Some(indicator) => Classification::soft_block(indicator.clone()),
            None => Classification::fatal(),
        }
    }
}
