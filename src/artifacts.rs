//! Per-run artifact layout:
//!
//! ```text
//! <root>/<handle>/<YYYY-MM-DD>/raw/tweets.json
//!                            /raw/merge_stats.json      (merge runs only)
//!                            /processed/finetuning.jsonl
//!                            /analytics/stats.json
//! ```

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, ScrapeError};
use crate::stats::Stats;
use crate::tweet::Tweet;

static DATE_FORMAT: &[FormatItem<'_>] = format_description!("[year]-[month]-[day]");

/// Processed fine-tuning lines skip texts this short.
const MIN_FINETUNING_CHARS: usize = 20;

pub const DEFAULT_ROOT: &str = "pipeline";

#[derive(Debug, Clone)]
pub struct PipelineLayout {
    root: PathBuf,
}

/// What a run wrote to disk.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub base_dir: PathBuf,
    pub raw_path: PathBuf,
    pub stats: Stats,
}

#[derive(Serialize)]
struct FinetuningLine<'a> {
    text: &'a str,
}

pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

pub fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT)
        .unwrap_or_else(|_| date.to_string())
}

pub fn parse_date(s: &str) -> Option<Date> {
    Date::parse(s, DATE_FORMAT).ok()
}

impl Default for PipelineLayout {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl PipelineLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, handle: &str, date: Date) -> PathBuf {
        self.root.join(handle).join(format_date(date))
    }

    pub fn raw_tweets_path(&self, handle: &str, date: Date) -> PathBuf {
        self.run_dir(handle, date).join("raw").join("tweets.json")
    }

    pub fn merge_stats_path(&self, handle: &str, date: Date) -> PathBuf {
        self.run_dir(handle, date).join("raw").join("merge_stats.json")
    }

    pub fn finetuning_path(&self, handle: &str, date: Date) -> PathBuf {
        self.run_dir(handle, date)
            .join("processed")
            .join("finetuning.jsonl")
    }

    pub fn stats_path(&self, handle: &str, date: Date) -> PathBuf {
        self.run_dir(handle, date).join("analytics").join("stats.json")
    }

    /// Write raw, processed and analytics artifacts for one account run.
    pub async fn write_run(&self, handle: &str, date: Date, tweets: &[Tweet]) -> Result<RunArtifacts> {
        let base_dir = self.run_dir(handle, date);
        for sub in ["raw", "processed", "analytics"] {
            fs::create_dir_all(base_dir.join(sub)).await?;
        }

        let raw_path = self.raw_tweets_path(handle, date);
        fs::write(&raw_path, serde_json::to_vec_pretty(tweets)?).await?;

        let lines = tweets
            .iter()
            .filter(|t| !t.is_retweet && t.text.chars().count() > MIN_FINETUNING_CHARS)
            .map(|t| serde_json::to_string(&FinetuningLine { text: &t.text }))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        fs::write(self.finetuning_path(handle, date), lines.join("\n")).await?;

        let stats = Stats::from_tweets(tweets);
        fs::write(
            self.stats_path(handle, date),
            serde_json::to_vec_pretty(&stats)?,
        )
        .await?;

        info!(handle, dir = %base_dir.display(), count = tweets.len(), "Saved run artifacts");
        Ok(RunArtifacts {
            base_dir,
            raw_path,
            stats,
        })
    }

    pub async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, serde_json::to_vec_pretty(value)?).await?;
        Ok(())
    }

    /// Most recent dated run directory for an account.
    pub async fn latest_date(&self, handle: &str) -> Result<Option<Date>> {
        let account_dir = self.root.join(handle);
        let mut entries = match fs::read_dir(&account_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest = None;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(date) = name.to_str().and_then(parse_date) {
                latest = latest.max(Some(date));
            }
        }
        Ok(latest)
    }

    /// Tweets from the most recent run of an account.
    pub async fn latest_tweets(&self, handle: &str) -> Result<Vec<Tweet>> {
        let date = self.latest_date(handle).await?.ok_or_else(|| {
            ScrapeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no runs recorded for @{handle} under {}", self.root.display()),
            ))
        })?;
        read_tweets(&self.raw_tweets_path(handle, date)).await
    }
}

pub async fn read_tweets(path: &Path) -> Result<Vec<Tweet>> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Whether `path` was last written at or after `since`.
pub async fn modified_since(path: &Path, since: SystemTime) -> Result<bool> {
    let modified = fs::metadata(path).await?.modified()?;
    Ok(modified >= since)
}

/// Number of records in a raw artifact, without requiring them to be well-formed tweets.
pub async fn count_records(path: &Path) -> Result<usize> {
    let bytes = fs::read(path).await?;
    let records: Vec<serde_json::Value> = serde_json::from_slice(&bytes)?;
    debug!(path = %path.display(), count = records.len(), "Counted artifact records");
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn tweet(id: &str, text: &str, retweet: bool) -> Tweet {
        Tweet {
            id: id.to_owned(),
            text: text.to_owned(),
            username: "jack".to_owned(),
            name: "Jack".to_owned(),
            created_at: datetime!(2024-02-02 10:00 UTC),
            likes: 3,
            retweet_count: 1,
            replies: 0,
            urls: vec![],
            hashtags: vec!["rust".to_owned()],
            is_reply: false,
            is_retweet: retweet,
            permanent_url: format!("https://x.com/jack/status/{id}"),
        }
    }

    #[test]
    fn layout_paths() {
        let layout = PipelineLayout::new("/data");
        let d = date!(2024 - 05 - 09);
        assert_eq!(
            layout.raw_tweets_path("jack", d),
            PathBuf::from("/data/jack/2024-05-09/raw/tweets.json")
        );
        assert_eq!(
            layout.finetuning_path("jack", d),
            PathBuf::from("/data/jack/2024-05-09/processed/finetuning.jsonl")
        );
        assert_eq!(
            layout.stats_path("jack", d),
            PathBuf::from("/data/jack/2024-05-09/analytics/stats.json")
        );
    }

    #[tokio::test]
    async fn write_run_then_read_latest() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PipelineLayout::new(dir.path());
        let tweets = vec![
            tweet("1", "a long enough tweet to keep for finetuning", false),
            tweet("2", "RT @x: a long enough retweet to be dropped", true),
            tweet("3", "too short", false),
        ];

        layout
            .write_run("jack", date!(2024 - 01 - 01), &tweets[..1])
            .await
            .unwrap();
        let artifacts = layout
            .write_run("jack", date!(2024 - 02 - 02), &tweets)
            .await
            .unwrap();
        assert_eq!(artifacts.stats.total_tweets, 3);

        let finetuning = std::fs::read_to_string(layout.finetuning_path("jack", date!(2024 - 02 - 02))).unwrap();
        assert_eq!(
            finetuning,
            r#"{"text":"a long enough tweet to keep for finetuning"}"#
        );

        assert_eq!(
            layout.latest_date("jack").await.unwrap(),
            Some(date!(2024 - 02 - 02))
        );
        let read = layout.latest_tweets("jack").await.unwrap();
        assert_eq!(read, tweets);
        assert_eq!(count_records(&artifacts.raw_path).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn modification_time_is_compared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tweets.json");
        let before = SystemTime::now() - std::time::Duration::from_secs(60);
        std::fs::write(&path, "[]").unwrap();

        assert!(modified_since(&path, before).await.unwrap());
        let later = SystemTime::now() + std::time::Duration::from_secs(3_600);
        assert!(!modified_since(&path, later).await.unwrap());
        assert!(modified_since(&dir.path().join("missing.json"), before).await.is_err());
    }

    #[tokio::test]
    async fn unknown_account_has_no_runs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PipelineLayout::new(dir.path());
        assert_eq!(layout.latest_date("nobody").await.unwrap(), None);
        assert!(layout.latest_tweets("nobody").await.is_err());
    }
}
