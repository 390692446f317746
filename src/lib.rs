//! Collect X/Twitter accounts through a lightweight API backend, fall back to browser
//! automation when it is blocked, and merge accounts into ranked persona datasets.

pub mod artifacts;
pub mod classify;
pub mod config;
mod error;
pub mod extract;
pub mod merge;
pub mod nitter;
pub mod orchestrator;
pub mod parse;
pub mod primary;
pub mod rendered;
pub mod report;
pub mod stats;
pub mod supervise;
pub mod tweet;
pub mod view;
pub mod webdriver;

pub use artifacts::PipelineLayout;
pub use classify::{Classification, FailureClassifier, SubstringClassifier};
pub use config::{Config, OrchestratorConfig};
pub use error::{Result, ScrapeError};
pub use extract::{extract_tweets, scrape_profile, ExtractOptions, Pause};
pub use merge::{create_merged_persona, merge_accounts, rank, MergeOptions, MergeStats, SortBy, TweetSource};
pub use nitter::{NitterBackend, NitterConfig};
pub use orchestrator::Orchestrator;
pub use primary::PrimaryBackend;
pub use report::{Breakdown, Method, RunReport, ScrapeResult};
pub use stats::Stats;
pub use supervise::{Completion, ProcessLauncher, RunningTask, Shutdown, TaskLauncher};
pub use tweet::Tweet;
pub use view::{RenderedItem, RenderedView};
