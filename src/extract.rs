//! The browser backend's scroll / extract / dedup loop.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::error::{Result, ScrapeError};
use crate::tweet::Tweet;
use crate::view::RenderedView;

/// A randomized wait, uniformly distributed in `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pause {
    min: Duration,
    max: Duration,
}

impl Pause {
    pub const fn millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    pub const fn none() -> Self {
        Self::millis(0, 0)
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let ms = rand::rng().random_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(ms as u64)
    }

    pub async fn wait(&self) {
        let d = self.sample();
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct ExtractOptions {
    #[builder(default = 500)]
    pub max_tweets: usize,

    /// Consecutive iterations without page growth before giving up.
    #[builder(default = 5)]
    pub max_no_growth: u32,

    /// Before navigating to the profile.
    #[builder(default = Pause::millis(2_000, 5_000))]
    pub before_navigation: Pause,

    /// After the profile loaded.
    #[builder(default = Pause::millis(2_000, 5_000))]
    pub after_navigation: Pause,

    /// Once, before the first extraction.
    #[builder(default = Pause::millis(5_000, 10_000))]
    pub warmup: Pause,

    /// After each extraction, before scrolling.
    #[builder(default = Pause::millis(3_000, 7_000))]
    pub reading: Pause,

    /// Small scroll steps and the pause after each, followed by a jump to the bottom.
    #[builder(default = vec![(300, Pause::millis(500, 1_500)), (400, Pause::millis(800, 2_000))])]
    pub scroll_steps: Vec<(u32, Pause)>,

    /// After jumping to the bottom, for new content to load.
    #[builder(default = Pause::millis(3_000, 7_000))]
    pub settle: Pause,
}

impl ExtractOptions {
    /// Same limits, no waiting.
    pub fn without_pauses(max_tweets: usize) -> Self {
        Self::builder()
            .max_tweets(max_tweets)
            .before_navigation(Pause::none())
            .after_navigation(Pause::none())
            .warmup(Pause::none())
            .reading(Pause::none())
            .scroll_steps(vec![(300, Pause::none()), (400, Pause::none())])
            .settle(Pause::none())
            .build()
    }
}

/// Open the profile and run the extraction loop on it.
pub async fn scrape_profile<V: RenderedView + ?Sized>(
    view: &mut V,
    handle: &str,
    options: &ExtractOptions,
) -> Result<Vec<Tweet>> {
    options.before_navigation.wait().await;
    view.open_profile(handle).await?;
    options.after_navigation.wait().await;
    info!(handle, "Loaded profile");

    extract_tweets(view, handle, options).await
}

/// Accumulate unique tweets from the view until `max_tweets` is reached or the page
/// stops growing for `max_no_growth` consecutive iterations.
///
/// Returns tweets in discovery order. An empty result is [`ScrapeError::ZeroResult`].
pub async fn extract_tweets<V: RenderedView + ?Sized>(
    view: &mut V,
    handle: &str,
    options: &ExtractOptions,
) -> Result<Vec<Tweet>> {
    let mut tweets: Vec<Tweet> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut previous_height = 0;
    let mut no_growth = 0;
    let mut iterations = 0usize;

    options.warmup.wait().await;

    while tweets.len() < options.max_tweets && no_growth < options.max_no_growth {
        iterations += 1;
        match extract_step(view, handle, options, &mut tweets, &mut seen).await {
            Ok(added) => debug!(handle, added, total = tweets.len(), "Extraction pass"),
            Err(e) if tweets.is_empty() => return Err(e),
            Err(e) => {
                warn!(handle, error = %e, kept = tweets.len(), "View failed, keeping what was extracted");
                break;
            }
        }
        if tweets.len() >= options.max_tweets {
            break;
        }

        match advance(view, options).await {
            Ok(height) if height == previous_height => no_growth += 1,
            Ok(height) => {
                no_growth = 0;
                previous_height = height;
            }
            Err(e) if tweets.is_empty() => return Err(e),
            Err(e) => {
                warn!(handle, error = %e, kept = tweets.len(), "Scrolling failed, keeping what was extracted");
                break;
            }
        }
    }

    info!(handle, count = tweets.len(), iterations, "Extraction finished");
    if tweets.is_empty() {
        return Err(ScrapeError::ZeroResult(handle.to_owned()));
    }
    Ok(tweets)
}

/// Merge currently rendered items into the accumulator. Returns how many were new.
async fn extract_step<V: RenderedView + ?Sized>(
    view: &mut V,
    handle: &str,
    options: &ExtractOptions,
    tweets: &mut Vec<Tweet>,
    seen: &mut HashSet<String>,
) -> Result<usize> {
    let items = view.extract_items().await?;
    let before = tweets.len();
    for tweet in items.into_iter().filter_map(|item| item.into_tweet(handle)) {
        if tweets.len() >= options.max_tweets {
            break;
        }
        if seen.insert(tweet.id.clone()) {
            tweets.push(tweet);
        }
    }
    Ok(tweets.len() - before)
}

/// Read, scroll in small steps, jump to the bottom and return the new page height.
async fn advance<V: RenderedView + ?Sized>(view: &mut V, options: &ExtractOptions) -> Result<u64> {
    options.reading.wait().await;
    for (pixels, pause) in &options.scroll_steps {
        view.scroll_by(*pixels).await?;
        pause.wait().await;
    }
    view.scroll_to_bottom().await?;
    options.settle.wait().await;
    view.page_height().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::RenderedItem;
    use async_trait::async_trait;

    /// Serves a fixed sequence of rendered snapshots; height grows with the snapshot index.
    struct ScriptedView {
        pages: Vec<Vec<RenderedItem>>,
        position: usize,
        extract_calls: usize,
        scrolls: Vec<u32>,
        grow: bool,
    }

    impl ScriptedView {
        fn new(pages: Vec<Vec<RenderedItem>>) -> Self {
            Self {
                pages,
                position: 0,
                extract_calls: 0,
                scrolls: vec![],
                grow: true,
            }
        }
    }

    #[async_trait]
    impl RenderedView for ScriptedView {
        async fn open_profile(&mut self, _handle: &str) -> Result<()> {
            Ok(())
        }

        async fn extract_items(&mut self) -> Result<Vec<RenderedItem>> {
            self.extract_calls += 1;
            let idx = self.position.min(self.pages.len().saturating_sub(1));
            Ok(self.pages.get(idx).cloned().unwrap_or_default())
        }

        async fn scroll_by(&mut self, pixels: u32) -> Result<()> {
            self.scrolls.push(pixels);
            Ok(())
        }

        async fn scroll_to_bottom(&mut self) -> Result<()> {
            if self.position + 1 < self.pages.len() {
                self.position += 1;
            }
            Ok(())
        }

        async fn page_height(&mut self) -> Result<u64> {
            if self.grow {
                Ok(1_000 * (self.position as u64 + 1))
            } else {
                Ok(1_000)
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn item(id: u32) -> RenderedItem {
        RenderedItem {
            text: Some(format!("post {id}")),
            datetime: Some("2024-01-01T00:00:00Z".into()),
            handle: Some("@jack".into()),
            permalink: Some(format!("/jack/status/{id}")),
            ..Default::default()
        }
    }

    fn window(from: u32, to: u32) -> Vec<RenderedItem> {
        (from..to).map(item).collect()
    }

    #[tokio::test]
    async fn overlapping_snapshots_are_deduplicated_in_discovery_order() {
        let mut view = ScriptedView::new(vec![window(0, 5), window(3, 8), window(6, 10)]);
        let tweets = extract_tweets(&mut view, "jack", &ExtractOptions::without_pauses(100))
            .await
            .unwrap();

        let ids: Vec<String> = tweets.iter().map(|t| t.id.clone()).collect();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn never_exceeds_max_tweets() {
        let mut view = ScriptedView::new(vec![window(0, 20), window(20, 40)]);
        let tweets = extract_tweets(&mut view, "jack", &ExtractOptions::without_pauses(7))
            .await
            .unwrap();
        assert_eq!(tweets.len(), 7);
        assert_eq!(view.extract_calls, 1);
    }

    #[tokio::test]
    async fn stops_after_five_iterations_without_growth() {
        let mut view = ScriptedView::new(vec![window(0, 3)]);
        view.grow = false;
        let tweets = extract_tweets(&mut view, "jack", &ExtractOptions::without_pauses(500))
            .await
            .unwrap();
        assert_eq!(tweets.len(), 3);
        // First pass moves the height from 0 to 1000, then five unchanged passes.
        assert_eq!(view.extract_calls, 6);
    }

    #[tokio::test]
    async fn growth_resets_the_counter() {
        // Height grows for three scrolls, then stays flat.
        let mut view = ScriptedView::new(vec![window(0, 2), window(2, 4), window(4, 6), window(6, 8)]);
        let tweets = extract_tweets(&mut view, "jack", &ExtractOptions::without_pauses(500))
            .await
            .unwrap();
        assert_eq!(tweets.len(), 8);
        assert_eq!(view.extract_calls, 3 + 5);
    }

    #[tokio::test]
    async fn invalid_items_are_skipped() {
        let mut broken = item(99);
        broken.datetime = None;
        let mut view = ScriptedView::new(vec![vec![item(1), broken, item(2)]]);
        let tweets = extract_tweets(&mut view, "jack", &ExtractOptions::without_pauses(500))
            .await
            .unwrap();
        assert_eq!(tweets.len(), 2);
    }

    #[tokio::test]
    async fn empty_timeline_is_an_error() {
        let mut view = ScriptedView::new(vec![vec![]]);
        let err = extract_tweets(&mut view, "jack", &ExtractOptions::without_pauses(500))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::ZeroResult(ref h) if h == "jack"));
        assert!(err.to_string().contains("no tweets collected"));
    }

    #[tokio::test]
    async fn scrolls_in_small_steps() {
        let mut view = ScriptedView::new(vec![window(0, 1)]);
        view.grow = false;
        let options = ExtractOptions::without_pauses(500);
        extract_tweets(&mut view, "jack", &options).await.unwrap();
        assert_eq!(&view.scrolls[..2], &[300, 400]);
    }

    #[tokio::test(start_paused = true)]
    async fn default_pacing_is_unhurried() {
        let mut view = ScriptedView::new(vec![window(0, 3)]);
        view.grow = false;
        let start = tokio::time::Instant::now();
        let options = ExtractOptions::builder().max_tweets(500).build();
        scrape_profile(&mut view, "jack", &options).await.unwrap();
        // 2s + 2s navigation, 5s warmup, six passes of at least 3 + 0.5 + 0.8 + 3 seconds.
        assert!(start.elapsed() >= Duration::from_millis(9_000 + 6 * 7_300));
    }

    #[test]
    fn pause_sampling_stays_in_range() {
        let pause = Pause::millis(100, 200);
        for _ in 0..100 {
            let d = pause.sample();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
        assert_eq!(Pause::none().sample(), Duration::ZERO);
    }
}
