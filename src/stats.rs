//! Summary metrics over any tweet collection.

use serde::Serialize;
use time::macros::format_description;

use crate::tweet::Tweet;

const TOP_TWEETS: usize = 5;
const TOP_TWEET_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_tweets: usize,
    pub direct_tweets: usize,
    pub replies: usize,
    pub retweets: usize,
    pub engagement: Engagement,
    pub time_range: Option<TimeRange>,
    pub content_types: ContentTypes,
}

#[derive(Debug, Clone, Serialize)]
pub struct Engagement {
    pub total_likes: u64,
    pub total_retweet_count: u64,
    pub total_replies: u64,
    /// NaN for an empty collection; serialized as `null`.
    pub average_likes: f64,
    pub top_tweets: Vec<TopTweet>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopTweet {
    pub id: String,
    pub text: String,
    pub likes: u64,
    pub retweet_count: u64,
    pub url: String,
}

/// Earliest and latest post, as `YYYY-MM-DD` calendar dates (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// Heuristic counts from substrings in the text, not from attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentTypes {
    pub with_images: usize,
    pub with_videos: usize,
    pub with_links: usize,
    pub text_only: usize,
}

impl Stats {
    pub fn from_tweets(tweets: &[Tweet]) -> Self {
        let mut direct_tweets = 0;
        let mut replies = 0;
        let mut retweets = 0;
        for tweet in tweets {
            // A retweet-flagged record is a retweet even when it also looks like a reply.
            if tweet.is_retweet {
                retweets += 1;
            } else if tweet.is_reply {
                replies += 1;
            } else {
                direct_tweets += 1;
            }
        }

        Self {
            total_tweets: tweets.len(),
            direct_tweets,
            replies,
            retweets,
            engagement: Engagement::from_tweets(tweets),
            time_range: TimeRange::from_tweets(tweets),
            content_types: ContentTypes::from_tweets(tweets),
        }
    }
}

impl Engagement {
    fn from_tweets(tweets: &[Tweet]) -> Self {
        let total_likes = saturating_sum(tweets.iter().map(|t| t.likes));
        let total_retweet_count = saturating_sum(tweets.iter().map(|t| t.retweet_count));
        let total_replies = saturating_sum(tweets.iter().map(|t| t.replies));
        let average_likes = total_likes as f64 / tweets.len() as f64;

        let mut ranked: Vec<&Tweet> = tweets.iter().collect();
        ranked.sort_by(|a, b| b.engagement().cmp(&a.engagement()));
        let top_tweets = ranked
            .into_iter()
            .take(TOP_TWEETS)
            .map(|t| TopTweet {
                id: t.id.clone(),
                text: t.text.chars().take(TOP_TWEET_PREVIEW_CHARS).collect(),
                likes: t.likes,
                retweet_count: t.retweet_count,
                url: t.permanent_url.clone(),
            })
            .collect();

        Self {
            total_likes,
            total_retweet_count,
            total_replies,
            average_likes,
            top_tweets,
        }
    }
}

fn saturating_sum(counts: impl Iterator<Item = u64>) -> u64 {
    counts.fold(0, u64::saturating_add)
}

impl TimeRange {
    fn from_tweets(tweets: &[Tweet]) -> Option<Self> {
        let format = format_description!("[year]-[month]-[day]");
        let earliest = tweets.iter().map(|t| t.created_at).min()?;
        let latest = tweets.iter().map(|t| t.created_at).max()?;
        let date = |t: time::OffsetDateTime| {
            t.to_offset(time::UtcOffset::UTC)
                .date()
                .format(format)
                .unwrap_or_default()
        };
        Some(Self {
            start: date(earliest),
            end: date(latest),
        })
    }
}

impl ContentTypes {
    fn from_tweets(tweets: &[Tweet]) -> Self {
        let mut counts = Self::default();
        for tweet in tweets {
            let photo = tweet.text.contains("photo");
            let video = tweet.text.contains("video");
            let link = tweet.text.contains("http");
            counts.with_images += photo as usize;
            counts.with_videos += video as usize;
            counts.with_links += link as usize;
            counts.text_only += (!photo && !video && !link) as usize;
        }
        counts
    }
}
