//! Per-account outcomes and the end-of-run summary.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::tweet::Tweet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Primary,
    Fallback,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Primary => write!(f, "primary"),
            Method::Fallback => write!(f, "fallback"),
        }
    }
}

/// Quick per-type counts for a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Breakdown {
    pub original: usize,
    pub retweets: usize,
    pub replies: usize,
}

impl Breakdown {
    pub fn of(tweets: &[Tweet]) -> Self {
        tweets.iter().fold(Self::default(), |mut acc, t| {
            if t.is_retweet {
                acc.retweets += 1;
            } else if t.is_reply {
                acc.replies += 1;
            } else {
                acc.original += 1;
            }
            acc
        })
    }
}

/// Outcome of one account. Built once, never changed afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub handle: String,
    pub success: bool,
    pub tweets: usize,
    pub method: Method,
    #[serde(rename = "duration_secs", serialize_with = "as_secs")]
    pub duration: Duration,
    pub error: Option<String>,
    /// Partial success, e.g. the fallback exited badly but its data was saved.
    pub warning: Option<String>,
    pub data_path: Option<PathBuf>,
    pub breakdown: Option<Breakdown>,
    /// Logout failure; never changes `success`.
    pub teardown_error: Option<String>,
    /// Why the primary backend was abandoned, when it was.
    pub fallback_reason: Option<String>,
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl ScrapeResult {
    pub(crate) fn new(handle: &str, method: Method, duration: Duration) -> Self {
        Self {
            handle: handle.to_owned(),
            success: false,
            tweets: 0,
            method,
            duration,
            error: None,
            warning: None,
            data_path: None,
            breakdown: None,
            teardown_error: None,
            fallback_reason: None,
        }
    }

    pub(crate) fn succeeded(mut self, tweets: usize) -> Self {
        self.success = true;
        self.tweets = tweets;
        self
    }

    pub(crate) fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Append-only list of results for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub results: Vec<ScrapeResult>,
}

impl RunReport {
    pub fn successes(&self) -> impl Iterator<Item = &ScrapeResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScrapeResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn total_tweets(&self) -> usize {
        self.successes().map(|r| r.tweets).sum()
    }

    pub fn count_by(&self, method: Method) -> usize {
        self.successes().filter(|r| r.method == method).count()
    }

    /// Accounts that went through the fallback, in run order.
    pub fn fallback_accounts(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.method == Method::Fallback)
            .map(|r| r.handle.as_str())
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let succeeded = self.successes().count();
        writeln!(f, "Scraping summary")?;
        writeln!(f, "  succeeded: {succeeded}/{}", self.results.len())?;
        writeln!(f, "  failed: {}", self.failures().count())?;
        writeln!(f, "  via primary: {}", self.count_by(Method::Primary))?;
        writeln!(f, "  via fallback: {}", self.count_by(Method::Fallback))?;
        writeln!(f, "  total tweets: {}", self.total_tweets())?;

        let fallback = self.fallback_accounts();
        if !fallback.is_empty() {
            let handles: Vec<String> = fallback.iter().map(|h| format!("@{h}")).collect();
            writeln!(f, "  needed fallback: {}", handles.join(", "))?;
        }

        for result in &self.results {
            if let Some(ref warning) = result.warning {
                writeln!(f, "  warning @{}: {warning}", result.handle)?;
            }
            if let Some(ref error) = result.error {
                writeln!(f, "  error @{} ({}): {error}", result.handle, result.method)?;
            }
        }
        Ok(())
    }
}
