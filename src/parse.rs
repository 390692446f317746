//! Nitter timeline HTML → tweet records.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{Result, ScrapeError};
use crate::tweet::{self, Tweet};

/// One page of a Nitter timeline.
#[derive(Debug)]
pub struct TimelinePage {
    pub tweets: Vec<Tweet>,
    /// Query string for the next page, e.g. `?cursor=DAABCgAB...`.
    pub cursor: Option<String>,
}

pub fn parse_timeline_html(html: &str) -> Result<TimelinePage> {
    static TWEET_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(".timeline-item:not(.show-more)").unwrap());

    let document = Html::parse_document(html);
    if let Some(message) = parse_error_panel(&document.root_element()) {
        return Err(ScrapeError::Api {
            status: 404,
            message,
        });
    }

    let mut tweets = vec![];
    for element in document.select(&TWEET_SELECTOR) {
        // Tombstones and "unavailable" items carry no link
        let Some((screen_name, id)) = parse_tweet_link(&element) else {
            continue;
        };
        let text = parse_tweet_body(&element)?;
        let created_at = parse_tweet_time(&element)?;
        let (replies, retweet_count, likes) = parse_tweet_stats(&element);
        let (urls, hashtags) = parse_tweet_links(&element);

        tweets.push(Tweet {
            permanent_url: tweet::permalink(&screen_name, &id),
            id,
            text,
            name: parse_fullname(&element).unwrap_or_else(|| screen_name.clone()),
            username: screen_name,
            created_at,
            likes,
            retweet_count,
            replies,
            urls,
            hashtags,
            is_reply: parse_tweet_reply(&element),
            is_retweet: parse_tweet_retweet(&element),
        })
    }

    let cursor = parse_cursor(&document.root_element());

    Ok(TimelinePage { tweets, cursor })
}

/// Recognize an anti-bot interstitial instead of a timeline.
pub fn detect_block(status: u16, body: &str) -> Option<String> {
    let lower = body.to_lowercase();
    if lower.contains("cloudflare") && (lower.contains("challenge") || lower.contains("cf-ray")) {
        return Some("Cloudflare protection detected".to_owned());
    }
    match status {
        403 => Some("request blocked (HTTP 403)".to_owned()),
        429 => Some("rate limited, request blocked (HTTP 429)".to_owned()),
        _ => None,
    }
}

static TWEET_LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a.tweet-link").unwrap());

fn parse_tweet_link(element: &ElementRef) -> Option<(String, String)> {
    let link = element.select(&TWEET_LINK_SELECTOR).next()?.value().attr("href")?;
    let screen_name = tweet::screen_name_from_permalink(link)?;
    let id = tweet::status_id_from_permalink(link)?;
    Some((screen_name, id))
}

fn parse_fullname(element: &ElementRef) -> Option<String> {
    static FULLNAME_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse("a.fullname").unwrap());

    element
        .select(&FULLNAME_SELECTOR)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_owned())
}

fn parse_tweet_body(element: &ElementRef) -> Result<String> {
    static TWEET_BODY_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(".tweet-content").unwrap());

    let body = element
        .select(&TWEET_BODY_SELECTOR)
        .next()
        .ok_or_else(|| ScrapeError::Parse("tweet without .tweet-content".into()))?;
    Ok(body.text().collect::<String>().trim().to_owned())
}

fn parse_tweet_time(element: &ElementRef) -> Result<OffsetDateTime> {
    static TWEET_DATE_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse("span.tweet-date a").unwrap());
    static TIME_FORMAT_DESCRIPTION: &[FormatItem<'_>] = format_description!(
        "[month repr:short] [day padding:none], [year] · [hour repr:12 padding:none]:[minute] [period] UTC"
    );

    let time_str = element
        .select(&TWEET_DATE_SELECTOR)
        .next()
        .and_then(|e| e.value().attr("title"))
        .ok_or_else(|| ScrapeError::Parse("tweet without date".into()))?;
    let time = PrimitiveDateTime::parse(time_str, TIME_FORMAT_DESCRIPTION)
        .map_err(|e| ScrapeError::Parse(format!("bad tweet date {time_str:?}: {e}")))?;
    Ok(time.assume_utc())
}

/// (replies, retweets, likes)
fn parse_tweet_stats(element: &ElementRef) -> (u64, u64, u64) {
    static STAT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse(".tweet-stat").unwrap());
    static ICON_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse("span[class^=\"icon-\"]").unwrap());

    let (mut replies, mut retweets, mut likes) = (0, 0, 0);
    for stat in element.select(&STAT_SELECTOR) {
        let Some(icon) = stat
            .select(&ICON_SELECTOR)
            .next()
            .and_then(|i| i.value().attr("class"))
        else {
            continue;
        };
        let count = parse_count(&stat.text().collect::<String>());
        if icon.contains("icon-comment") {
            replies = count;
        } else if icon.contains("icon-retweet") {
            retweets = count;
        } else if icon.contains("icon-heart") {
            likes = count;
        }
    }
    (replies, retweets, likes)
}

/// "1,234" → 1234; empty → 0.
pub(crate) fn parse_count(s: &str) -> u64 {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// (outbound urls, hashtags)
fn parse_tweet_links(element: &ElementRef) -> (Vec<String>, Vec<String>) {
    static CONTENT_LINK_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(".tweet-content a").unwrap());

    let mut urls = vec![];
    let mut hashtags = vec![];
    for link in element.select(&CONTENT_LINK_SELECTOR) {
        let text = link.text().collect::<String>();
        if let Some(tag) = text.trim().strip_prefix('#') {
            hashtags.push(tag.to_owned());
        } else if let Some(href) = link.value().attr("href") {
            if href.starts_with("http") {
                urls.push(href.to_owned());
            }
        }
    }
    (urls, hashtags)
}

fn parse_tweet_retweet(element: &ElementRef) -> bool {
    static RETWEET_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(".retweet-header").unwrap());

    element.select(&RETWEET_SELECTOR).next().is_some()
}

fn parse_tweet_reply(element: &ElementRef) -> bool {
    static REPLY_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(".replying-to").unwrap());

    element.select(&REPLY_SELECTOR).next().is_some()
}

fn parse_cursor(element: &ElementRef) -> Option<String> {
    static CURSOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse(".show-more a").unwrap());

    element
        .select(&CURSOR_SELECTOR)
        .last()
        .and_then(|e| e.value().attr("href"))
        .filter(|href| href.contains("cursor="))
        .map(str::to_owned)
}

fn parse_error_panel(element: &ElementRef) -> Option<String> {
    static ERROR_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(".error-panel").unwrap());

    element
        .select(&ERROR_SELECTOR)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const TIMELINE: &str = r##"
<html><body><div class="timeline">
  <div class="timeline-item">
    <a class="tweet-link" href="/jack/status/20#m"></a>
    <div class="tweet-body">
      <div class="tweet-header">
        <a class="fullname" href="/jack">jack</a>
        <a class="username" href="/jack">@jack</a>
        <span class="tweet-date"><a href="/jack/status/20#m" title="Mar 21, 2006 · 8:50 PM UTC">Mar 21, 2006</a></span>
      </div>
      <div class="tweet-content media-body">just setting up my <a href="/search?q=%23twttr">#twttr</a> <a href="https://example.com/a">example.com/a</a></div>
      <div class="tweet-stats">
        <span class="tweet-stat"><div class="icon-container"><span class="icon-comment" title=""></span> 1,204</div></span>
        <span class="tweet-stat"><div class="icon-container"><span class="icon-retweet" title=""></span> 120</div></span>
        <span class="tweet-stat"><div class="icon-container"><span class="icon-quote" title=""></span> 7</div></span>
        <span class="tweet-stat"><div class="icon-container"><span class="icon-heart" title=""></span> 25,300</div></span>
      </div>
    </div>
  </div>
  <div class="timeline-item">
    <a class="tweet-link" href="/biz/status/21#m"></a>
    <div class="retweet-header"><div class="icon-container"><span class="icon-retweet"></span> jack retweeted</div></div>
    <div class="tweet-body">
      <a class="fullname" href="/biz">Biz Stone</a>
      <div class="replying-to">Replying to <a href="/ev">@ev</a></div>
      <span class="tweet-date"><a title="Mar 22, 2006 · 9:05 AM UTC">Mar 22, 2006</a></span>
      <div class="tweet-content">hello</div>
    </div>
  </div>
  <div class="timeline-item unavailable"><div class="unavailable-box">This tweet is unavailable</div></div>
  <div class="show-more"><a href="?cursor=DAABCgABF">Load more</a></div>
</div></body></html>
"##;

    #[test]
    fn parses_timeline_page() {
        let page = parse_timeline_html(TIMELINE).unwrap();
        assert_eq!(page.cursor.as_deref(), Some("?cursor=DAABCgABF"));
        assert_eq!(page.tweets.len(), 2);

        let first = &page.tweets[0];
        assert_eq!(first.id, "20");
        assert_eq!(first.username, "jack");
        assert_eq!(first.name, "jack");
        assert_eq!(first.text, "just setting up my #twttr example.com/a");
        assert_eq!(first.created_at, datetime!(2006-03-21 20:50 UTC));
        assert_eq!(first.replies, 1204);
        assert_eq!(first.retweet_count, 120);
        assert_eq!(first.likes, 25300);
        assert_eq!(first.hashtags, ["twttr"]);
        assert_eq!(first.urls, ["https://example.com/a"]);
        assert_eq!(first.permanent_url, "https://x.com/jack/status/20");
        assert!(!first.is_reply && !first.is_retweet);

        let second = &page.tweets[1];
        assert_eq!(second.username, "biz");
        assert_eq!(second.name, "Biz Stone");
        assert!(second.is_retweet);
        assert!(second.is_reply);
        assert_eq!(second.likes, 0);
    }

    #[test]
    fn last_page_has_no_cursor() {
        let html = r#"<div class="timeline"><div class="timeline-item show-more"><a href="/jack">Load newest</a></div></div>"#;
        let page = parse_timeline_html(html).unwrap();
        assert!(page.tweets.is_empty());
        assert!(page.cursor.is_none());
    }

    #[test]
    fn error_panel_is_an_api_error() {
        let html = r#"<div class="error-panel"><span>User "nobody" not found</span></div>"#;
        match parse_timeline_html(html) {
            Err(ScrapeError::Api { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "User \"nobody\" not found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn block_detection() {
        assert_eq!(
            detect_block(503, "<title>Just a moment...</title> Cloudflare challenge cf-ray").as_deref(),
            Some("Cloudflare protection detected")
        );
        assert!(detect_block(403, "").unwrap().contains("blocked"));
        assert!(detect_block(200, "<div class=\"timeline\"></div>").is_none());
    }

    #[test]
    fn counts() {
        assert_eq!(parse_count(" 1,234 "), 1234);
        assert_eq!(parse_count(""), 0);
    }
}
