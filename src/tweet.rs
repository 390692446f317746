use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    pub username: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub likes: u64,
    pub retweet_count: u64,
    pub replies: u64,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    pub is_reply: bool,
    pub is_retweet: bool,
    pub permanent_url: String,
}

impl Tweet {
    /// Likes plus re-shares.
    pub fn engagement(&self) -> u64 {
        self.likes.saturating_add(self.retweet_count)
    }

    /// Direct posts are neither replies nor retweets.
    pub fn is_direct(&self) -> bool {
        !self.is_reply && !self.is_retweet
    }
}

static STATUS_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(?P<screen_name>\w+)/status/(?P<id>\d+)").unwrap());

/// Platform status id embedded in a permalink such as `https://x.com/jack/status/20`.
pub fn status_id_from_permalink(link: &str) -> Option<String> {
    STATUS_LINK_RE
        .captures(link)
        .and_then(|caps| caps.name("id"))
        .map(|m| m.as_str().to_owned())
}

/// Screen name embedded in a permalink.
pub fn screen_name_from_permalink(link: &str) -> Option<String> {
    STATUS_LINK_RE
        .captures(link)
        .and_then(|caps| caps.name("screen_name"))
        .map(|m| m.as_str().to_owned())
}

/// Derive a run-independent id for a post.
///
/// The platform status id wins when the permalink carries one. Otherwise the id is
/// a truncated SHA-256 over author, timestamp and text, so the same post rendered
/// twice maps to the same id across runs.
pub fn stable_id(permalink: Option<&str>, username: &str, created_at: &str, text: &str) -> String {
    if let Some(id) = permalink.and_then(status_id_from_permalink) {
        return id;
    }

    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update([0]);
    hasher.update(created_at.as_bytes());
    hasher.update([0]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    format!("h{}", hex::encode(&digest[..16]))
}

/// Canonical permalink for a status.
pub fn permalink(username: &str, id: &str) -> String {
    format!("https://x.com/{}/status/{}", username, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_id_is_taken_from_permalink() {
        let id = stable_id(
            Some("https://x.com/levelsio/status/1790000000000000000?s=20"),
            "levelsio",
            "2024-05-13T10:00:00Z",
            "ship it",
        );
        assert_eq!(id, "1790000000000000000");
    }

    #[test]
    fn relative_nitter_links_are_recognized() {
        assert_eq!(
            status_id_from_permalink("/jack/status/20#m").as_deref(),
            Some("20")
        );
        assert_eq!(
            screen_name_from_permalink("/jack/status/20#m").as_deref(),
            Some("jack")
        );
    }

    #[test]
    fn content_hash_is_deterministic() {
        let a = stable_id(None, "jack", "2006-03-21T20:50:14Z", "just setting up my twttr");
        let b = stable_id(None, "jack", "2006-03-21T20:50:14Z", "just setting up my twttr");
        let c = stable_id(None, "jack", "2006-03-21T20:50:14Z", "just setting up my twtr");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with('h'));
        assert_eq!(a.len(), 33);
    }

    #[test]
    fn engagement_saturates() {
        let tweet = Tweet {
            id: "1".into(),
            text: "viral".into(),
            username: "jack".into(),
            name: "jack".into(),
            created_at: time::macros::datetime!(2024-03-01 12:00 UTC),
            likes: u64::MAX,
            retweet_count: 5,
            replies: 0,
            urls: vec![],
            hashtags: vec![],
            is_reply: false,
            is_retweet: false,
            permanent_url: "https://x.com/jack/status/1".into(),
        };
        assert_eq!(tweet.engagement(), u64::MAX);
    }

    #[test]
    fn profile_links_fall_back_to_hash() {
        let id = stable_id(Some("https://x.com/jack"), "jack", "t", "x");
        assert!(id.starts_with('h'));
    }
}
