//! The browser surface driven by the extraction loop.

use async_trait::async_trait;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::Result;
use crate::tweet::{self, Tweet};

/// A post as it appears in the rendered page, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedItem {
    pub text: Option<String>,
    /// `datetime` attribute of the post's `<time>` element (RFC 3339).
    pub datetime: Option<String>,
    pub display_name: Option<String>,
    pub handle: Option<String>,
    pub permalink: Option<String>,
    pub likes: u64,
    pub retweets: u64,
    pub replies: u64,
    pub urls: Vec<String>,
    pub hashtags: Vec<String>,
    /// Header above the post such as "jack reposted".
    pub social_context: Option<String>,
    pub replying_to: bool,
}

impl RenderedItem {
    /// Validate and convert. Items without a text body or a parseable timestamp are dropped.
    pub fn into_tweet(self, account: &str) -> Option<Tweet> {
        let text = self.text.filter(|t| !t.trim().is_empty())?;
        let datetime = self.datetime?;
        let created_at = OffsetDateTime::parse(&datetime, &Rfc3339).ok()?;

        let username = self
            .handle
            .map(|h| h.trim().trim_start_matches('@').to_owned())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| account.to_owned());
        let id = tweet::stable_id(self.permalink.as_deref(), &username, &datetime, &text);
        let permanent_url = tweet::permalink(&username, &id);

        let is_retweet = text.starts_with("RT @")
            || self.social_context.as_deref().is_some_and(|c| {
                let c = c.to_lowercase();
                c.contains("reposted") || c.contains("retweeted")
            });
        let is_reply = self.replying_to || text.starts_with('@');

        Some(Tweet {
            id,
            name: self.display_name.unwrap_or_else(|| username.clone()),
            username,
            text,
            created_at,
            likes: self.likes,
            retweet_count: self.retweets,
            replies: self.replies,
            urls: self.urls,
            hashtags: self.hashtags,
            is_reply,
            is_retweet,
            permanent_url,
        })
    }
}

#[async_trait]
pub trait RenderedView: Send {
    /// Load the account's profile and wait for the timeline column.
    async fn open_profile(&mut self, handle: &str) -> Result<()>;

    /// Every post currently rendered in the view.
    async fn extract_items(&mut self) -> Result<Vec<RenderedItem>>;

    async fn scroll_by(&mut self, pixels: u32) -> Result<()>;

    async fn scroll_to_bottom(&mut self) -> Result<()>;

    /// Document scroll height, used as a proxy for "more content loaded".
    async fn page_height(&mut self) -> Result<u64>;

    /// Release the browser session.
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> RenderedItem {
        RenderedItem {
            text: Some("hello world".into()),
            datetime: Some("2024-04-01T09:30:00.000Z".into()),
            display_name: Some("Jack".into()),
            handle: Some("@jack".into()),
            permalink: Some("/jack/status/42".into()),
            likes: 5,
            retweets: 2,
            replies: 1,
            ..Default::default()
        }
    }

    #[test]
    fn converts_valid_item() {
        let tweet = item().into_tweet("someone").unwrap();
        assert_eq!(tweet.id, "42");
        assert_eq!(tweet.username, "jack");
        assert_eq!(tweet.name, "Jack");
        assert_eq!(tweet.permanent_url, "https://x.com/jack/status/42");
        assert_eq!(tweet.engagement(), 7);
        assert!(tweet.is_direct());
    }

    #[test]
    fn drops_items_without_text_or_time() {
        let mut no_text = item();
        no_text.text = None;
        assert!(no_text.into_tweet("jack").is_none());

        let mut blank = item();
        blank.text = Some("  ".into());
        assert!(blank.into_tweet("jack").is_none());

        let mut no_time = item();
        no_time.datetime = None;
        assert!(no_time.into_tweet("jack").is_none());

        let mut bad_time = item();
        bad_time.datetime = Some("yesterday".into());
        assert!(bad_time.into_tweet("jack").is_none());
    }

    #[test]
    fn flags_from_context() {
        let mut rt = item();
        rt.social_context = Some("jack reposted".into());
        assert!(rt.into_tweet("jack").unwrap().is_retweet);

        let mut reply = item();
        reply.replying_to = true;
        assert!(reply.into_tweet("jack").unwrap().is_reply);

        let mut mention = item();
        mention.text = Some("@ev congrats".into());
        assert!(mention.into_tweet("jack").unwrap().is_reply);
    }

    #[test]
    fn missing_handle_uses_account_and_hashes_id() {
        let mut anon = item();
        anon.handle = None;
        anon.permalink = None;
        let a = anon.clone().into_tweet("levelsio").unwrap();
        let b = anon.into_tweet("levelsio").unwrap();
        assert_eq!(a.username, "levelsio");
        assert!(a.id.starts_with('h'));
        assert_eq!(a.id, b.id);
    }
}
