//! Rendered X/Twitter timeline HTML → [`RenderedItem`]s.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::parse::parse_count;
use crate::view::RenderedItem;

static ARTICLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"article[data-testid="tweet"]"#).unwrap());

pub fn parse_articles(html: &str) -> Vec<RenderedItem> {
    let document = Html::parse_document(html);
    document.select(&ARTICLE_SELECTOR).map(parse_article).collect()
}

fn parse_article(article: ElementRef) -> RenderedItem {
    let (display_name, handle) = parse_user_names(&article);
    let (urls, hashtags) = parse_links(&article);

    RenderedItem {
        text: parse_text(&article),
        datetime: parse_datetime(&article),
        display_name,
        handle,
        permalink: parse_permalink(&article),
        likes: parse_action_count(&article, &LIKE_SELECTOR),
        retweets: parse_action_count(&article, &RETWEET_SELECTOR),
        replies: parse_action_count(&article, &REPLY_SELECTOR),
        urls,
        hashtags,
        social_context: parse_social_context(&article),
        replying_to: article.text().any(|t| t.contains("Replying to")),
    }
}

fn parse_text(article: &ElementRef) -> Option<String> {
    static TEXT_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[data-testid="tweetText"]"#).unwrap());

    article
        .select(&TEXT_SELECTOR)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_owned())
}

static TIME_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("time").unwrap());

fn parse_datetime(article: &ElementRef) -> Option<String> {
    article
        .select(&TIME_SELECTOR)
        .next()
        .and_then(|e| e.value().attr("datetime"))
        .map(str::to_owned)
}

/// The status link wrapping the post's `<time>`; quoted posts carry their own.
fn parse_permalink(article: &ElementRef) -> Option<String> {
    static STATUS_LINK_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"a[href*="/status/"]"#).unwrap());

    let mut links = article.select(&STATUS_LINK_SELECTOR);
    let first = links.next()?;
    std::iter::once(first)
        .chain(links)
        .find(|a| a.select(&TIME_SELECTOR).next().is_some())
        .unwrap_or(first)
        .value()
        .attr("href")
        .map(str::to_owned)
}

/// (display name, @handle)
fn parse_user_names(article: &ElementRef) -> (Option<String>, Option<String>) {
    static USER_NAME_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[data-testid="User-Name"]"#).unwrap());
    static SPAN_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("span").unwrap());

    let Some(block) = article.select(&USER_NAME_SELECTOR).next() else {
        return (None, None);
    };
    let spans: Vec<String> = block
        .select(&SPAN_SELECTOR)
        .map(|s| s.text().collect::<String>().trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect();
    let handle = spans.iter().find(|s| s.starts_with('@')).cloned();
    let name = spans.into_iter().find(|s| !s.starts_with('@'));
    (name, handle)
}

static LIKE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"[data-testid="like"], [data-testid="unlike"]"#).unwrap());
static RETWEET_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-testid="retweet"], [data-testid="unretweet"]"#).unwrap()
});
static REPLY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"[data-testid="reply"]"#).unwrap());

/// Counts come from `aria-label`s such as "1,204 Likes. Like".
fn parse_action_count(article: &ElementRef, selector: &Selector) -> u64 {
    static COUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,]*").unwrap());

    article
        .select(selector)
        .next()
        .and_then(|e| e.value().attr("aria-label"))
        .and_then(|label| COUNT_RE.find(label))
        .map(|m| parse_count(m.as_str()))
        .unwrap_or(0)
}

/// (outbound urls, hashtags)
fn parse_links(article: &ElementRef) -> (Vec<String>, Vec<String>) {
    static LINK_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"a[role="link"]"#).unwrap());
    static HASHTAG_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"a[href*="hashtag"]"#).unwrap());

    let urls = article
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| href.starts_with("http") && !is_platform_link(href))
        .map(str::to_owned)
        .collect();
    let hashtags = article
        .select(&HASHTAG_SELECTOR)
        .map(|a| a.text().collect::<String>().trim().trim_start_matches('#').to_owned())
        .filter(|tag| !tag.is_empty())
        .collect();
    (urls, hashtags)
}

fn is_platform_link(href: &str) -> bool {
    ["//twitter.com", "//x.com", "//www.twitter.com", "//www.x.com"]
        .iter()
        .any(|host| href.contains(host))
}

fn parse_social_context(article: &ElementRef) -> Option<String> {
    static CONTEXT_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[data-testid="socialContext"]"#).unwrap());

    article
        .select(&CONTEXT_SELECTOR)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMELINE: &str = r##"
<main><div data-testid="primaryColumn">
<article data-testid="tweet">
  <div data-testid="User-Name">
    <a href="/levelsio" role="link"><span>@levelsio</span></a>
  </div>
  <div data-testid="User-Name"><span>ignored</span></div>
  <a href="/levelsio/status/1790000000000000001" role="link"><time datetime="2024-05-13T10:00:00.000Z">May 13</time></a>
  <div data-testid="tweetText"><span>Shipped a new </span><a href="/hashtag/buildinpublic" role="link">#buildinpublic</a><span> thing </span><a href="https://t.co/abc" role="link">t.co/abc</a></div>
  <div data-testid="reply" aria-label="12 Replies. Reply"></div>
  <div data-testid="retweet" aria-label="1,034 reposts. Repost"></div>
  <div data-testid="like" aria-label="25,301 Likes. Like"></div>
  <a href="https://x.com/levelsio/photo/1" role="link">photo</a>
</article>
<article data-testid="tweet">
  <div data-testid="socialContext">levelsio reposted</div>
  <div data-testid="User-Name"><span>Pieter</span><span>@pieter</span></div>
  <a href="/pieter/status/5/analytics" role="link">views</a>
  <a href="/pieter/status/5" role="link"><time datetime="2024-05-12T08:00:00.000Z">May 12</time></a>
  <div>Replying to <a href="/ev">@ev</a></div>
  <div data-testid="tweetText">hey</div>
  <div data-testid="unlike" aria-label="3 Likes. Liked"></div>
</article>
<article data-testid="tweet">
  <div data-testid="User-Name"><span>Media only</span><span>@media</span></div>
  <time datetime="2024-05-11T08:00:00.000Z">May 11</time>
</article>
</div></main>
"##;

    #[test]
    fn parses_rendered_articles() {
        let items = parse_articles(TIMELINE);
        assert_eq!(items.len(), 3);

        let first = &items[0];
        assert_eq!(first.text.as_deref(), Some("Shipped a new #buildinpublic thing t.co/abc"));
        assert_eq!(first.datetime.as_deref(), Some("2024-05-13T10:00:00.000Z"));
        assert_eq!(first.handle.as_deref(), Some("@levelsio"));
        assert_eq!(first.display_name, None);
        assert_eq!(first.permalink.as_deref(), Some("/levelsio/status/1790000000000000001"));
        assert_eq!((first.replies, first.retweets, first.likes), (12, 1034, 25301));
        assert_eq!(first.hashtags, ["buildinpublic"]);
        assert_eq!(first.urls, ["https://t.co/abc"]);
        assert!(!first.replying_to);

        let second = &items[1];
        assert_eq!(second.display_name.as_deref(), Some("Pieter"));
        assert_eq!(second.permalink.as_deref(), Some("/pieter/status/5"));
        assert_eq!(second.social_context.as_deref(), Some("levelsio reposted"));
        assert_eq!(second.likes, 3);
        assert!(second.replying_to);

        assert_eq!(items[2].text, None);
    }

    #[test]
    fn media_only_posts_are_dropped_on_conversion() {
        let tweets: Vec<_> = parse_articles(TIMELINE)
            .into_iter()
            .filter_map(|i| i.into_tweet("levelsio"))
            .collect();
        assert_eq!(tweets.len(), 2);
        assert_eq!(tweets[0].id, "1790000000000000001");
        assert!(tweets[1].is_retweet && tweets[1].is_reply);
    }
}
