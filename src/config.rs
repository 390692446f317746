use std::path::PathBuf;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::artifacts::DEFAULT_ROOT;
use crate::nitter::NitterConfig;
use crate::supervise::ProcessLauncher;

/// Name of the fallback program, looked up next to the running executable first.
pub const FALLBACK_PROGRAM: &str = "browser-scrape";

/// Timing and limits for the per-account state machine.
#[derive(Debug, Clone, TypedBuilder)]
pub struct OrchestratorConfig {
    /// Wall-clock limit for one fallback task.
    #[builder(default = Duration::from_secs(600))]
    pub fallback_timeout: Duration,

    /// Pause after an account handled by the primary backend.
    #[builder(default = Duration::from_secs(30))]
    pub primary_delay: Duration,

    /// Pause after an account that went through the fallback.
    #[builder(default = Duration::from_secs(60))]
    pub fallback_delay: Duration,

    #[builder(default = 500)]
    pub fallback_max_tweets: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Everything a scrape run needs, resolved once from the command line and environment.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Config {
    #[builder(default = PathBuf::from(DEFAULT_ROOT), setter(into))]
    pub pipeline_root: PathBuf,

    pub nitter: NitterConfig,

    #[builder(default)]
    pub orchestrator: OrchestratorConfig,

    #[builder(default = default_fallback_program(), setter(into))]
    pub fallback_program: PathBuf,
}

impl Config {
    /// Launcher for the fallback program, pointed at the same artifact root the
    /// orchestrator reads from.
    pub fn fallback_launcher(&self) -> ProcessLauncher {
        ProcessLauncher::new(&self.fallback_program).args([
            "--pipeline-root".to_owned(),
            self.pipeline_root.to_string_lossy().into_owned(),
        ])
    }
}

/// `browser-scrape` beside the current executable, or on `PATH` otherwise.
pub fn default_fallback_program() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(FALLBACK_PROGRAM)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(FALLBACK_PROGRAM))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_pacing() {
        let config = Config::builder()
            .nitter(NitterConfig::builder().build())
            .build();
        assert_eq!(config.pipeline_root, PathBuf::from("pipeline"));
        assert_eq!(config.orchestrator.fallback_timeout, Duration::from_secs(600));
        assert_eq!(config.orchestrator.primary_delay, Duration::from_secs(30));
        assert_eq!(config.orchestrator.fallback_delay, Duration::from_secs(60));
        assert!(config
            .fallback_program
            .to_string_lossy()
            .ends_with(FALLBACK_PROGRAM));
    }

    #[test]
    fn fallback_writes_under_the_configured_root() {
        let config = Config::builder()
            .pipeline_root("/data/custom")
            .nitter(NitterConfig::builder().build())
            .fallback_program("/opt/bin/browser-scrape")
            .build();
        assert_eq!(
            config.fallback_launcher().command_args("jack", 42),
            ["--pipeline-root", "/data/custom", "jack", "42"]
        );
    }
}
