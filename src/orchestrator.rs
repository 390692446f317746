//! Per-account primary/fallback state machine.
//!
//! Every account first goes through the [`PrimaryBackend`]. Failures are classified; soft
//! blocks hand the account to an out-of-process fallback task whose artifact on disk is the
//! source of truth. Accounts run strictly one after another with a pause in between.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use time::Date;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use crate::artifacts::{count_records, modified_since, read_tweets, today, PipelineLayout};
use crate::classify::{FailureClassifier, SubstringClassifier};
use crate::config::OrchestratorConfig;
use crate::error::{Result, ScrapeError};
use crate::primary::PrimaryBackend;
use crate::report::{Breakdown, Method, RunReport, ScrapeResult};
use crate::supervise::{Completion, RunningTask, Shutdown, TaskLauncher};
use crate::tweet::Tweet;

/// Filesystems with coarse timestamps may date a fresh artifact slightly before launch.
const MTIME_SLACK: Duration = Duration::from_secs(2);

#[derive(TypedBuilder)]
pub struct Orchestrator<P: PrimaryBackend> {
    primary: P,

    launcher: Box<dyn TaskLauncher>,

    #[builder(default = default_classifier())]
    classifier: Box<dyn FailureClassifier>,

    #[builder(default)]
    layout: PipelineLayout,

    #[builder(default)]
    config: OrchestratorConfig,

    #[builder(default = Shutdown::never())]
    shutdown: Shutdown,
}

struct PrimaryAttempt {
    outcome: Result<Vec<Tweet>>,
    teardown_error: Option<String>,
}

impl PrimaryAttempt {
    fn failed(error: ScrapeError) -> Self {
        Self {
            outcome: Err(error),
            teardown_error: None,
        }
    }
}

enum FallbackOutcome {
    Exited(Result<Completion>),
    TimedOut,
    Interrupted,
}

impl<P: PrimaryBackend> Orchestrator<P> {
    /// Scrape every handle in order.
    ///
    /// Per-account failures end up in the report. Only an interrupt aborts the run.
    pub async fn scrape_accounts(&self, handles: &[String]) -> Result<RunReport> {
        let mut report = RunReport::default();

        for (index, handle) in handles.iter().enumerate() {
            info!(handle = %handle, position = index + 1, total = handles.len(), "Scraping account");
            let result = self.scrape_account(handle).await?;
            if self.shutdown.is_triggered() {
                return Err(ScrapeError::Interrupted);
            }
            let delay = match result.method {
                Method::Primary => self.config.primary_delay,
                Method::Fallback => self.config.fallback_delay,
            };
            report.results.push(result);

            if index + 1 < handles.len() {
                self.pause(delay).await?;
            }
        }

        Ok(report)
    }

    /// Run the state machine for one account. Fails only with [`ScrapeError::Interrupted`].
    pub async fn scrape_account(&self, handle: &str) -> Result<ScrapeResult> {
        let started = Instant::now();

        let mut shutdown = self.shutdown.clone();
        let attempt = tokio::select! {
            attempt = self.attempt_primary(handle) => attempt,
            _ = shutdown.triggered() => return Err(ScrapeError::Interrupted),
        };

        let error = match attempt.outcome {
            Ok(tweets) => {
                let mut result = self.finish_primary(handle, &tweets, started).await;
                result.teardown_error = attempt.teardown_error;
                return Ok(result);
            }
            Err(error) => error,
        };

        let classification = self.classifier.classify(&error);
        if !classification.fallback_needed {
            error!(handle, error = %error, "Primary backend failed");
            let mut result =
                ScrapeResult::new(handle, Method::Primary, started.elapsed()).failed(error.to_string());
            result.teardown_error = attempt.teardown_error;
            return Ok(result);
        }

        warn!(handle, reason = %classification.reason, error = %error, "Primary backend blocked, switching to fallback");
        let mut result = self.run_fallback(handle, started).await?;
        result.fallback_reason = Some(classification.reason);
        result.teardown_error = attempt.teardown_error;
        Ok(result)
    }

    async fn attempt_primary(&self, handle: &str) -> PrimaryAttempt {
        if let Err(e) = self.primary.validate_environment() {
            return PrimaryAttempt::failed(e);
        }

        let mut session = match self.primary.initialize(handle).await {
            Ok(Some(session)) => session,
            Ok(None) => return PrimaryAttempt::failed(ScrapeError::InitializationFailed),
            Err(e) => return PrimaryAttempt::failed(e),
        };

        let collected = self.primary.collect_tweets(&mut session).await;

        let teardown_error = match self.primary.logout(session).await {
            Ok(()) => None,
            Err(e) => {
                warn!(handle, error = %e, "Logout failed");
                Some(e.to_string())
            }
        };

        let outcome = match collected {
            Ok(tweets) if tweets.is_empty() => Err(ScrapeError::ZeroResult(handle.to_owned())),
            other => other,
        };
        PrimaryAttempt {
            outcome,
            teardown_error,
        }
    }

    async fn finish_primary(&self, handle: &str, tweets: &[Tweet], started: Instant) -> ScrapeResult {
        let breakdown = Breakdown::of(tweets);
        match self.layout.write_run(handle, today(), tweets).await {
            Ok(artifacts) => {
                info!(
                    handle,
                    count = tweets.len(),
                    original = breakdown.original,
                    retweets = breakdown.retweets,
                    replies = breakdown.replies,
                    "Primary backend succeeded"
                );
                let mut result =
                    ScrapeResult::new(handle, Method::Primary, started.elapsed()).succeeded(tweets.len());
                result.data_path = Some(artifacts.raw_path);
                result.breakdown = Some(breakdown);
                result
            }
            Err(e) => {
                error!(handle, error = %e, "Could not save collected tweets");
                ScrapeResult::new(handle, Method::Primary, started.elapsed())
                    .failed(format!("failed to save tweets: {e}"))
            }
        }
    }

    async fn run_fallback(&self, handle: &str, started: Instant) -> Result<ScrapeResult> {
        let started_on = today();
        let launched_at = SystemTime::now();
        let timeout = self.config.fallback_timeout;

        let mut task = match self
            .launcher
            .start(handle, self.config.fallback_max_tweets)
            .await
        {
            Ok(task) => task,
            Err(e) => {
                error!(handle, error = %e, "Could not start fallback");
                return Ok(ScrapeResult::new(handle, Method::Fallback, started.elapsed()).failed(e.to_string()));
            }
        };

        let mut shutdown = self.shutdown.clone();
        let outcome = tokio::select! {
            biased;
            _ = shutdown.triggered() => FallbackOutcome::Interrupted,
            waited = tokio::time::timeout(timeout, task.wait()) => match waited {
                Ok(completion) => FallbackOutcome::Exited(completion),
                Err(_) => FallbackOutcome::TimedOut,
            },
        };
        // A terminal Ctrl-C reaches the child too; its exit must not be credited.
        let outcome = if self.shutdown.is_triggered() {
            FallbackOutcome::Interrupted
        } else {
            outcome
        };

        match outcome {
            FallbackOutcome::Interrupted => {
                cancel(task.as_mut(), handle).await;
                Err(ScrapeError::Interrupted)
            }
            FallbackOutcome::TimedOut => {
                cancel(task.as_mut(), handle).await;
                let e = ScrapeError::ExtractionTimeout(timeout);
                error!(handle, error = %e, "Fallback timed out");
                Ok(ScrapeResult::new(handle, Method::Fallback, started.elapsed()).failed(e.to_string()))
            }
            FallbackOutcome::Exited(Err(e)) => {
                error!(handle, error = %e, "Lost track of fallback task");
                Ok(ScrapeResult::new(handle, Method::Fallback, started.elapsed()).failed(e.to_string()))
            }
            FallbackOutcome::Exited(Ok(completion)) => {
                let saved = self.saved_records(handle, started_on, launched_at).await;
                Ok(judge_fallback(handle, &completion, saved, started).await)
            }
        }
    }

    /// Raw artifact the fallback left behind, checked for the start date and today.
    /// Files not written since `launched_at` belong to an earlier run and are ignored.
    async fn saved_records(
        &self,
        handle: &str,
        started_on: Date,
        launched_at: SystemTime,
    ) -> Option<(PathBuf, usize)> {
        let mut dates = vec![started_on];
        let now = today();
        if now != started_on {
            dates.push(now);
        }

        for date in dates {
            let path = self.layout.raw_tweets_path(handle, date);
            match modified_since(&path, launched_at - MTIME_SLACK).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(handle, path = %path.display(), "Ignoring artifact left by an earlier run");
                    continue;
                }
                Err(e) => {
                    debug!(handle, path = %path.display(), error = %e, "No readable fallback artifact");
                    continue;
                }
            }
            match count_records(&path).await {
                Ok(count) if count > 0 => return Some((path, count)),
                Ok(_) => debug!(handle, path = %path.display(), "Fallback artifact is empty"),
                Err(e) => debug!(handle, path = %path.display(), error = %e, "No readable fallback artifact"),
            }
        }
        None
    }

    async fn pause(&self, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return Ok(());
        }
        info!(secs = delay.as_secs(), "Waiting before next account");
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = shutdown.triggered() => Err(ScrapeError::Interrupted),
        }
    }
}

fn default_classifier() -> Box<dyn FailureClassifier> {
    Box::new(SubstringClassifier::default())
}

async fn cancel(task: &mut dyn RunningTask, handle: &str) {
    if let Err(e) = task.cancel().await {
        warn!(handle, error = %e, "Failed to kill fallback task");
    }
}

/// The artifact decides: data on disk is a success even if the process exited badly.
async fn judge_fallback(
    handle: &str,
    completion: &Completion,
    saved: Option<(PathBuf, usize)>,
    started: Instant,
) -> ScrapeResult {
    let result = ScrapeResult::new(handle, Method::Fallback, started.elapsed());

    let Some((path, count)) = saved else {
        let message = if completion.success() {
            "no data file created".to_owned()
        } else {
            let detail = completion
                .stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no output");
            format!("fallback process failed with {}: {}", completion.describe_exit(), detail.trim())
        };
        error!(handle, error = %message, "Fallback failed");
        return result.failed(message);
    };

    let mut result = result.succeeded(count);
    if !completion.success() {
        let warning = format!(
            "process failed with {} but data was saved",
            completion.describe_exit()
        );
        warn!(handle, %warning, "Fallback partially succeeded");
        result.warning = Some(warning);
    } else {
        info!(handle, count, "Fallback succeeded");
    }
    result.breakdown = read_tweets(&path).await.ok().map(|t| Breakdown::of(&t));
    result.data_path = Some(path);
    result
}
