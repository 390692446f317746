use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use hybrid_scraper::artifacts::DEFAULT_ROOT;
use hybrid_scraper::config::default_fallback_program;
use hybrid_scraper::{
    create_merged_persona, Config, MergeOptions, NitterBackend, NitterConfig, Orchestrator,
    PipelineLayout, ScrapeError, Shutdown, SortBy, Stats,
};
use tracing_subscriber::EnvFilter;

/// Exit code used when the run was interrupted.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Root directory of the per-run artifacts
    #[arg(long, global = true, default_value = DEFAULT_ROOT)]
    pipeline_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape accounts, falling back to browser automation when blocked
    Scrape {
        /// Account handles, without the leading @
        #[arg(required = true)]
        handles: Vec<String>,

        /// Nitter instance URL
        #[arg(long, env = "NITTER_INSTANCE")]
        nitter_instance: Option<String>,

        /// Max number of tweets per account
        #[arg(short, long, default_value_t = 500)]
        max_tweets: usize,

        /// Fallback program, invoked as `<program> --pipeline-root <root> <handle> <max_tweets>`
        #[arg(long, env = "FALLBACK_PROGRAM")]
        fallback_program: Option<PathBuf>,
    },

    /// Merge the latest runs of several accounts into one persona dataset
    Merge {
        /// Name of the merged persona
        name: String,

        /// Source account handles, in the order their tweets should appear
        #[arg(required = true)]
        accounts: Vec<String>,

        /// Max number of tweets taken from each account
        #[arg(short, long, default_value_t = 50)]
        tweets_per_account: usize,

        /// Keep retweets
        #[arg(long)]
        include_retweets: bool,

        /// Ranking key
        #[arg(long, value_enum, default_value_t = SortBy::Total)]
        sort_by: SortBy,
    },

    /// Print statistics for an account's latest run
    Stats {
        handle: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hybrid_scraper=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let layout = PipelineLayout::new(&args.pipeline_root);

    let result = match args.command {
        Command::Scrape {
            handles,
            nitter_instance,
            max_tweets,
            fallback_program,
        } => {
            let nitter = match nitter_instance {
                Some(instance) => NitterConfig::builder()
                    .instance(instance)
                    .max_tweets(max_tweets)
                    .build(),
                None => NitterConfig::builder().max_tweets(max_tweets).build(),
            };
            let mut config = Config::builder()
                .pipeline_root(args.pipeline_root)
                .nitter(nitter)
                .fallback_program(fallback_program.unwrap_or_else(default_fallback_program))
                .build();
            config.orchestrator.fallback_max_tweets = max_tweets;
            scrape(config, &handles).await
        }
        Command::Merge {
            name,
            accounts,
            tweets_per_account,
            include_retweets,
            sort_by,
        } => {
            let options = MergeOptions {
                tweets_per_account,
                filter_retweets: !include_retweets,
                sort_by,
            };
            merge(&layout, &name, &accounts, &options).await
        }
        Command::Stats { handle } => stats(&layout, &handle).await,
    };

    match result {
        Ok(code) => code,
        Err(ScrapeError::Interrupted) => {
            eprintln!("Interrupted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn scrape(config: Config, handles: &[String]) -> hybrid_scraper::Result<ExitCode> {
    let orchestrator = Orchestrator::builder()
        .primary(NitterBackend::new(config.nitter.clone()))
        .launcher(Box::new(config.fallback_launcher()))
        .layout(PipelineLayout::new(&config.pipeline_root))
        .config(config.orchestrator.clone())
        .shutdown(Shutdown::on_ctrl_c())
        .build();

    let report = orchestrator.scrape_accounts(handles).await?;
    print_line(report.to_string().trim_end());

    Ok(if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn merge(
    layout: &PipelineLayout,
    name: &str,
    accounts: &[String],
    options: &MergeOptions,
) -> hybrid_scraper::Result<ExitCode> {
    let (output, artifacts) = create_merged_persona(layout, layout, name, accounts, options).await?;
    for selection in &output.stats.per_account {
        print_line(&format!(
            "@{}: {} of {} tweets",
            selection.handle, selection.selected, selection.available
        ));
    }
    print_line(&format!(
        "Merged {} tweets into {}",
        output.stats.total_tweets,
        artifacts.base_dir.display()
    ));

    Ok(if output.stats.total_tweets == 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn stats(layout: &PipelineLayout, handle: &str) -> hybrid_scraper::Result<ExitCode> {
    let tweets = layout.latest_tweets(handle).await?;
    let stats = Stats::from_tweets(&tweets);
    print_line(&serde_json::to_string_pretty(&stats)?);
    Ok(ExitCode::SUCCESS)
}

fn print_line(line: &str) {
    if let Err(e) = writeln!(std::io::stdout(), "{line}") {
        if e.kind() != std::io::ErrorKind::BrokenPipe {
            eprintln!("Error: {e}");
        }
    }
}
