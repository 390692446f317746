//! [`RenderedView`] backed by a W3C WebDriver server (chromedriver, geckodriver, ...).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, ScrapeError};
use crate::rendered::parse_articles;
use crate::view::{RenderedItem, RenderedView};

const PROFILE_BASE_URL: &str = "https://x.com";
const PRIMARY_COLUMN: &str = r#"[data-testid="primaryColumn"]"#;
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(45);
const COLUMN_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Cookie as exported by browser extensions (`x-cookies.json`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserCookie {
    pub name: Option<String>,
    pub value: Option<String>,
    pub domain: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    pub same_site: Option<String>,
    pub expiration_date: Option<f64>,
}

/// Cookie in the shape the WebDriver `cookie` endpoint accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebDriverCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

/// Drop incomplete cookies and map `sameSite` onto `None`/`Lax`/`Strict`.
pub fn normalize_cookies(cookies: Vec<BrowserCookie>) -> Vec<WebDriverCookie> {
    cookies
        .into_iter()
        .filter_map(|cookie| {
            let Some(same_site) = cookie.same_site else {
                debug!(name = ?cookie.name, "Skipping cookie without sameSite");
                return None;
            };
            let (Some(name), Some(value), Some(domain)) = (cookie.name, cookie.value, cookie.domain)
            else {
                debug!("Skipping cookie with missing fields");
                return None;
            };
            if name.is_empty() || value.is_empty() || domain.is_empty() {
                return None;
            }
            let same_site = match same_site.to_lowercase().as_str() {
                "no_restriction" | "none" => "None",
                "strict" => "Strict",
                _ => "Lax",
            };
            Some(WebDriverCookie {
                name,
                value,
                domain,
                path: cookie.path.unwrap_or_else(|| "/".to_owned()),
                secure: cookie.secure,
                http_only: cookie.http_only,
                same_site: same_site.to_owned(),
                expiry: cookie.expiration_date.map(|e| e as u64),
            })
        })
        .collect()
}

pub async fn load_cookies(path: &Path) -> Result<Vec<WebDriverCookie>> {
    let bytes = tokio::fs::read(path).await?;
    let cookies: Vec<BrowserCookie> = serde_json::from_slice(&bytes)?;
    let loaded = cookies.len();
    let normalized = normalize_cookies(cookies);
    info!(loaded, kept = normalized.len(), path = %path.display(), "Loaded cookies");
    Ok(normalized)
}

pub struct WebDriverView {
    client: Client,
    base_url: String,
    session_id: String,
    cookies: Vec<WebDriverCookie>,
}

impl WebDriverView {
    /// Start a browser session. `profile_dir` keeps logins between runs.
    pub async fn connect(
        base_url: &str,
        profile_dir: Option<&Path>,
        headless: bool,
        cookies: Vec<WebDriverCookie>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(NAVIGATION_TIMEOUT + Duration::from_secs(15))
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_owned();

        let mut args = vec![
            "--disable-blink-features=AutomationControlled".to_owned(),
            "--no-first-run".to_owned(),
            "--no-default-browser-check".to_owned(),
            "--password-store=basic".to_owned(),
            format!("--user-agent={USER_AGENT}"),
        ];
        if headless {
            args.push("--headless=new".to_owned());
        }
        if let Some(dir) = profile_dir {
            args.push(format!("--user-data-dir={}", dir.display()));
        }

        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "excludeSwitches": ["enable-automation"],
                    },
                    "timeouts": { "pageLoad": NAVIGATION_TIMEOUT.as_millis() as u64 },
                }
            }
        });
        let value = send(&client, Method::POST, &format!("{base_url}/session"), Some(body)).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ScrapeError::WebDriver("session response without sessionId".into()))?
            .to_owned();

        info!(%base_url, %session_id, "Browser session started");
        Ok(Self {
            client,
            base_url,
            session_id,
            cookies,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/session/{}/{}", self.base_url, self.session_id, path)
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        send(&self.client, method, &self.endpoint(path), body).await
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    /// Poll until at least one element matches `css`.
    pub async fn wait_for(&self, css: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let found = self
                .command(
                    Method::POST,
                    "elements",
                    Some(json!({ "using": "css selector", "value": css })),
                )
                .await?;
            if found.as_array().is_some_and(|a| !a.is_empty()) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ScrapeError::WebDriver(format!(
                    "timed out waiting for {css}"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn install_cookies(&mut self) -> Result<()> {
        if self.cookies.is_empty() {
            warn!("No cookies configured, continuing without an authenticated session");
            return Ok(());
        }
        // Cookies can only be set for the current document's domain
        self.navigate(PROFILE_BASE_URL).await?;
        let mut installed = 0;
        for cookie in std::mem::take(&mut self.cookies) {
            match self
                .command(Method::POST, "cookie", Some(json!({ "cookie": cookie })))
                .await
            {
                Ok(_) => installed += 1,
                Err(e) => warn!(name = %cookie.name, error = %e, "Failed to set cookie"),
            }
        }
        info!(installed, "Cookies loaded");
        Ok(())
    }
}

#[async_trait]
impl RenderedView for WebDriverView {
    async fn open_profile(&mut self, handle: &str) -> Result<()> {
        self.install_cookies().await?;
        let handle = utf8_percent_encode(handle, NON_ALPHANUMERIC).to_string();
        self.navigate(&format!("{PROFILE_BASE_URL}/{handle}")).await?;
        self.wait_for(PRIMARY_COLUMN, COLUMN_TIMEOUT).await
    }

    async fn extract_items(&mut self) -> Result<Vec<RenderedItem>> {
        let html = self
            .execute("return document.documentElement.outerHTML;", vec![])
            .await?;
        let html = html
            .as_str()
            .ok_or_else(|| ScrapeError::WebDriver("page source is not a string".into()))?;
        Ok(parse_articles(html))
    }

    async fn scroll_by(&mut self, pixels: u32) -> Result<()> {
        self.execute("window.scrollBy(0, arguments[0]);", vec![json!(pixels)])
            .await
            .map(|_| ())
    }

    async fn scroll_to_bottom(&mut self) -> Result<()> {
        self.execute("window.scrollTo(0, document.body.scrollHeight);", vec![])
            .await
            .map(|_| ())
    }

    async fn page_height(&mut self) -> Result<u64> {
        let height = self
            .execute("return document.body.scrollHeight;", vec![])
            .await?;
        height
            .as_u64()
            .or_else(|| height.as_f64().map(|h| h as u64))
            .ok_or_else(|| ScrapeError::WebDriver(format!("unexpected scroll height {height}")))
    }

    async fn close(&mut self) -> Result<()> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        send(&self.client, Method::DELETE, &url, None).await?;
        info!(session_id = %self.session_id, "Browser session closed");
        Ok(())
    }
}

/// Issue a WebDriver command and unwrap its `value`.
async fn send(client: &Client, method: Method, url: &str, body: Option<Value>) -> Result<Value> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let resp = request.send().await?;
    let status = resp.status();
    let payload: Value = resp.json().await?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
        return Err(ScrapeError::WebDriver(format!("{error}: {message}")));
    }
    Ok(value)
}
