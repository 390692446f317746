//! Browser fallback: `browser-scrape <handle> <max_tweets>`.
//!
//! Saves the collected timeline under `<pipeline-root>/<handle>/<date>/raw/tweets.json`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use hybrid_scraper::artifacts::{today, DEFAULT_ROOT};
use hybrid_scraper::webdriver::{load_cookies, WebDriverView};
use hybrid_scraper::{scrape_profile, ExtractOptions, PipelineLayout, RenderedView};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Scrape an account timeline through a real browser")]
struct Args {
    /// Account handle, without the leading @
    handle: String,

    /// Max number of tweets to collect
    #[arg(default_value_t = 500)]
    max_tweets: usize,

    /// WebDriver server (chromedriver) URL
    #[arg(long, env = "WEBDRIVER_URL", default_value = "http://localhost:9515")]
    webdriver_url: String,

    /// Exported browser cookies for an authenticated session
    #[arg(long, env = "X_COOKIES", default_value = "x-cookies.json")]
    cookies: PathBuf,

    /// Persistent browser profile directory
    #[arg(long, env = "BROWSER_PROFILE_DIR")]
    profile_dir: Option<PathBuf>,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,

    /// Root directory of the per-run artifacts
    #[arg(long, default_value = DEFAULT_ROOT)]
    pipeline_root: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hybrid_scraper=info,browser_scrape=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args).await {
        Ok(count) => {
            info!(handle = %args.handle, count, "Browser scrape finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(handle = %args.handle, error = %e, "Browser scrape failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> hybrid_scraper::Result<usize> {
    let cookies = match load_cookies(&args.cookies).await {
        Ok(cookies) => cookies,
        Err(e) => {
            warn!(path = %args.cookies.display(), error = %e, "Could not load cookies");
            vec![]
        }
    };

    let mut view = WebDriverView::connect(
        &args.webdriver_url,
        args.profile_dir.as_deref(),
        args.headless,
        cookies,
    )
    .await?;

    let options = ExtractOptions::builder().max_tweets(args.max_tweets).build();
    let scraped = scrape_profile(&mut view, &args.handle, &options).await;

    if let Err(e) = view.close().await {
        warn!(error = %e, "Failed to close browser session");
    }

    let tweets = scraped?;
    let layout = PipelineLayout::new(&args.pipeline_root);
    let artifacts = layout.write_run(&args.handle, today(), &tweets).await?;
    info!(path = %artifacts.raw_path.display(), "Saved tweets");
    Ok(tweets.len())
}
