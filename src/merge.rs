//! Combine several accounts' collections into one ranked, size-bounded persona dataset.

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifacts::{today, PipelineLayout, RunArtifacts};
use crate::error::{Result, ScrapeError};
use crate::tweet::Tweet;

/// Where per-account collections come from.
#[async_trait]
pub trait TweetSource: Send + Sync {
    async fn tweets_for_account(&self, handle: &str) -> Result<Vec<Tweet>>;
}

/// Reads the most recent `raw/tweets.json` of each account.
#[async_trait]
impl TweetSource for PipelineLayout {
    async fn tweets_for_account(&self, handle: &str) -> Result<Vec<Tweet>> {
        self.latest_tweets(handle).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Likes plus retweets.
    #[default]
    Total,
    Likes,
    Retweets,
}

impl SortBy {
    fn key(self, tweet: &Tweet) -> u64 {
        match self {
            SortBy::Total => tweet.engagement(),
            SortBy::Likes => tweet.likes,
            SortBy::Retweets => tweet.retweet_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeOptions {
    pub tweets_per_account: usize,
    pub filter_retweets: bool,
    pub sort_by: SortBy,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            tweets_per_account: 50,
            filter_retweets: true,
            sort_by: SortBy::Total,
        }
    }
}

impl MergeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.tweets_per_account == 0 {
            return Err(ScrapeError::Configuration(
                "tweets per account must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSelection {
    pub handle: String,
    pub available: usize,
    pub selected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Handles exactly as supplied.
    pub source_accounts: Vec<String>,
    pub total_tweets: usize,
    pub per_account: Vec<AccountSelection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    pub options: MergeOptions,
}

#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub tweets: Vec<Tweet>,
    pub stats: MergeStats,
}

/// Filter, stable-sort descending by `sort_by` and keep the top `tweets_per_account`.
pub fn rank(tweets: Vec<Tweet>, options: &MergeOptions) -> Vec<Tweet> {
    let mut selected: Vec<Tweet> = tweets
        .into_iter()
        .filter(|t| !(options.filter_retweets && t.is_retweet))
        .collect();
    selected.sort_by_key(|t| std::cmp::Reverse(options.sort_by.key(t)));
    selected.truncate(options.tweets_per_account);
    selected
}

/// Select the top tweets of every account and concatenate them in the supplied order.
///
/// An account that cannot be read or has no tweets contributes nothing.
pub async fn merge_accounts<S: TweetSource + ?Sized>(
    source: &S,
    accounts: &[String],
    options: &MergeOptions,
) -> Result<MergeOutput> {
    options.validate()?;

    let mut tweets = Vec::new();
    let mut per_account = Vec::with_capacity(accounts.len());

    for handle in accounts {
        let (available, error) = match source.tweets_for_account(handle).await {
            Ok(collection) if collection.is_empty() => {
                warn!(handle = %handle, "No tweets available, skipping");
                (Vec::new(), None)
            }
            Ok(collection) => (collection, None),
            Err(e) => {
                warn!(handle = %handle, error = %e, "Could not load tweets, skipping");
                (Vec::new(), Some(e.to_string()))
            }
        };

        let count = available.len();
        let selected = rank(available, options);
        info!(handle = %handle, available = count, selected = selected.len(), "Selected tweets");
        per_account.push(AccountSelection {
            handle: handle.clone(),
            available: count,
            selected: selected.len(),
            error,
        });
        tweets.extend(selected);
    }

    let total_tweets = tweets.len();
    Ok(MergeOutput {
        tweets,
        stats: MergeStats {
            source_accounts: accounts.to_vec(),
            total_tweets,
            per_account,
            persona: None,
            options: *options,
        },
    })
}

/// Merge `accounts` and store the result as a run of the persona `name`.
pub async fn create_merged_persona<S: TweetSource + ?Sized>(
    layout: &PipelineLayout,
    source: &S,
    name: &str,
    accounts: &[String],
    options: &MergeOptions,
) -> Result<(MergeOutput, RunArtifacts)> {
    let mut output = merge_accounts(source, accounts, options).await?;
    output.stats.persona = Some(name.to_owned());

    let date = today();
    let artifacts = layout.write_run(name, date, &output.tweets).await?;
    layout
        .write_json(&layout.merge_stats_path(name, date), &output.stats)
        .await?;

    info!(persona = name, total = output.stats.total_tweets, accounts = accounts.len(), "Merged persona saved");
    Ok((output, artifacts))
}
