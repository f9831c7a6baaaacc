//! podkeep daemon and command line.
//!
//! Loads an optional TOML config, installs a `tracing` subscriber and drives
//! the library's [`PodKeeper`] facade.

use clap::{Parser, Subcommand};
use podkeep::{
    Config, DownloadStatus, EpisodeFilter, FeedSort, JobKind, JobRun, PodKeeper, Result,
    run_with_shutdown,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Keep podcast feeds refreshed and their episodes downloaded.
#[derive(Parser, Debug)]
#[command(name = "podkeep", version)]
#[command(about = "Podcast feed tracker and episode downloader", long_about = None)]
struct Args {
    /// TOML config file; defaults apply to anything it leaves out
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run background jobs until SIGINT/SIGTERM
    Run,

    /// Subscribe to a feed and download its newest episodes
    Add {
        /// Feed URL
        url: String,
    },

    /// Refresh every unpaused feed once and download what is new
    Refresh,

    /// List subscribed feeds
    Feeds {
        /// Sort key: created_at, title or last_episode
        #[arg(long, default_value = "created_at")]
        sort: String,
    },

    /// List episodes as JSON
    List {
        /// Only episodes with this status (not_downloaded, downloading, downloaded, deleted)
        #[arg(long)]
        status: Option<DownloadStatus>,

        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: i64,

        /// Episodes per page
        #[arg(long, default_value_t = 20)]
        page_size: i64,

        /// Text matched against title and summary
        #[arg(long)]
        query: Option<String>,

        /// release_desc, release_asc, duration_desc or duration_asc
        #[arg(long, default_value = "release_desc")]
        sort: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path).await?,
        None => Config::default(),
    };

    let keeper = PodKeeper::new(config).await?;

    // `run` shuts down on its own signal; every other command ends here
    let one_shot = !matches!(args.command, Command::Run);
    let result = run_command(&keeper, args.command).await;
    if one_shot {
        keeper.shutdown().await?;
    }
    result
}

async fn run_command(keeper: &PodKeeper, command: Command) -> Result<()> {
    match command {
        Command::Run => {
            keeper.start_jobs().await?;
            tracing::info!("podkeep running, press Ctrl+C to stop");
            run_with_shutdown(keeper.clone()).await?;
        }
        Command::Add { url } => {
            let feed = keeper.add_feed(&url).await?;
            print_json(&feed)?;
        }
        Command::Refresh => match keeper.run_job(JobKind::RefreshEpisodes).await? {
            JobRun::Completed { affected } => println!("{} new episodes", affected),
            JobRun::Skipped => println!("refresh already running elsewhere"),
        },
        Command::Feeds { sort } => {
            let feeds = keeper.list_feeds(FeedSort::parse_or_default(&sort)).await?;
            print_json(&feeds)?;
        }
        Command::List {
            status,
            page,
            page_size,
            query,
            sort,
        } => {
            let page = keeper
                .list_items(EpisodeFilter {
                    page,
                    page_size,
                    sort,
                    query,
                    status,
                    ..Default::default()
                })
                .await?;
            print_json(&page)?;
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
