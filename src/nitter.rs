//! Primary backend: account timelines served by a Nitter instance.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::COOKIE;
use reqwest::Client;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::error::{Result, ScrapeError};
use crate::parse::{detect_block, parse_timeline_html};
use crate::primary::PrimaryBackend;
use crate::tweet::Tweet;

const PREFERENCE_COOKIES: &str = "replaceTwitter=; replaceYouTube=; replaceReddit=";

/// Pages through one account's timeline, yielding tweets until `limit` is reached,
/// the timeline runs out, or a request fails.
#[derive(TypedBuilder)]
pub struct NitterTimeline<'a> {
    client: &'a Client,

    #[builder(setter(into))]
    instance: String,

    #[builder(setter(into))]
    handle: String,

    #[builder(setter(strip_option), default)]
    limit: Option<usize>,

    #[builder(setter(skip), default)]
    state: TimelineState,
}

#[derive(Default, Debug)]
struct TimelineState {
    tweets: VecDeque<Tweet>,
    seen: HashSet<String>,
    cursor: Option<String>,
    count: usize,
    exhausted: bool,
    errored: bool,
}

impl<'a> NitterTimeline<'a> {
    pub fn tweets(&'a mut self) -> impl Stream<Item = Result<Tweet>> + 'a {
        // Reset internal state
        self.state = Default::default();

        futures_util::stream::unfold(self, |timeline| async move {
            if timeline.state.errored {
                return None;
            }
            if let Some(limit) = timeline.limit {
                if timeline.state.count >= limit {
                    return None;
                }
            }

            while timeline.state.tweets.is_empty() {
                if timeline.state.exhausted {
                    return None;
                }
                match timeline.fetch_page().await {
                    Ok(tweets) => {
                        // Pinned tweets reappear on later pages
                        let seen = &mut timeline.state.seen;
                        let fresh = tweets.into_iter().filter(|t| seen.insert(t.id.clone()));
                        timeline.state.tweets.extend(fresh);
                    }
                    Err(e) => {
                        timeline.state.errored = true;
                        return Some((Err(e), timeline));
                    }
                }
            }

            let tweet = timeline.state.tweets.pop_front()?;
            timeline.state.count += 1;
            Some((Ok(tweet), timeline))
        })
    }

    async fn fetch_page(&mut self) -> Result<Vec<Tweet>> {
        let handle = utf8_percent_encode(&self.handle, NON_ALPHANUMERIC);
        let url = match self.state.cursor {
            Some(ref c) => format!("{}/{}{}", self.instance, handle, c),
            None => format!("{}/{}", self.instance, handle),
        };

        debug!(%url, "Fetching timeline page");
        let response = self
            .client
            .get(&url)
            .header(COOKIE, PREFERENCE_COOKIES)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if let Some(reason) = detect_block(status.as_u16(), &body) {
            return Err(ScrapeError::SoftBlock(reason));
        }
        if !status.is_success() {
            return Err(ScrapeError::Api {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let page = parse_timeline_html(&body)?;
        if page.tweets.is_empty() || page.cursor.is_none() {
            self.state.exhausted = true;
        }
        self.state.cursor = page.cursor;
        Ok(page.tweets)
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct NitterConfig {
    /// Base URL such as `https://nitter.example.net`. Required.
    #[builder(default, setter(strip_option, into))]
    pub instance: Option<String>,

    #[builder(default = 500)]
    pub max_tweets: usize,

    #[builder(default = Duration::from_secs(10))]
    pub request_timeout: Duration,
}

pub struct NitterBackend {
    config: NitterConfig,
}

pub struct NitterSession {
    client: Client,
    instance: String,
    handle: String,
}

impl NitterBackend {
    pub fn new(config: NitterConfig) -> Self {
        Self { config }
    }

    fn instance(&self) -> Result<String> {
        match self.config.instance.as_deref().map(str::trim) {
            Some(instance) if !instance.is_empty() => Ok(instance.trim_end_matches('/').to_owned()),
            _ => Err(ScrapeError::Configuration(
                "no Nitter instance configured (set NITTER_INSTANCE)".into(),
            )),
        }
    }
}

#[async_trait]
impl PrimaryBackend for NitterBackend {
    type Session = NitterSession;

    fn validate_environment(&self) -> Result<()> {
        self.instance().map(|_| ())
    }

    async fn initialize(&self, handle: &str) -> Result<Option<NitterSession>> {
        let instance = self.instance()?;
        let client = Client::builder()
            .timeout(self.config.request_timeout)
            .build()?;

        // Readiness probe against the instance front page
        let response = client
            .get(&instance)
            .header(COOKIE, PREFERENCE_COOKIES)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if let Some(reason) = detect_block(status.as_u16(), &body) {
            return Err(ScrapeError::SoftBlock(reason));
        }
        if !status.is_success() {
            warn!(%instance, status = status.as_u16(), "Nitter instance not ready");
            return Ok(None);
        }

        info!(%instance, handle, "Nitter session ready");
        Ok(Some(NitterSession {
            client,
            instance,
            handle: handle.to_owned(),
        }))
    }

    async fn collect_tweets(&self, session: &mut NitterSession) -> Result<Vec<Tweet>> {
        let mut timeline = NitterTimeline::builder()
            .client(&session.client)
            .instance(session.instance.clone())
            .handle(session.handle.clone())
            .limit(self.config.max_tweets)
            .build();
        let stream = timeline.tweets();
        futures_util::pin_mut!(stream);

        let mut tweets = vec![];
        while let Some(result) = stream.next().await {
            match result {
                Ok(tweet) => tweets.push(tweet),
                // Keep a partial timeline; only an empty one is an error
                Err(e) if !tweets.is_empty() => {
                    warn!(handle = %session.handle, error = %e, kept = tweets.len(), "Timeline ended early");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        info!(handle = %session.handle, count = tweets.len(), "Collected timeline");
        Ok(tweets)
    }

    async fn logout(&self, session: NitterSession) -> Result<()> {
        debug!(handle = %session.handle, "Closing Nitter session");
        drop(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_instance_is_a_configuration_error() {
        let backend = NitterBackend::new(NitterConfig::builder().build());
        assert!(matches!(
            backend.validate_environment(),
            Err(ScrapeError::Configuration(_))
        ));

        let backend = NitterBackend::new(NitterConfig::builder().instance("  ").build());
        assert!(backend.validate_environment().is_err());
    }

    #[test]
    fn instance_is_normalized() {
        let backend = NitterBackend::new(
            NitterConfig::builder()
                .instance("https://nitter.example.net/")
                .build(),
        );
        assert!(backend.validate_environment().is_ok());
        assert_eq!(backend.instance().unwrap(), "https://nitter.example.net");
    }
}
