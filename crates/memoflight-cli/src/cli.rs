//! Exposes the command line application.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memoflight::config::Config;
use memoflight::metrics;
use url::Url;

use crate::logging;
use crate::{fetch, stresstest, workloads};

/// Memoflight commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Download the given URLs through a memo cache.
    ///
    /// Every distinct URL is downloaded only once, no matter how often it is listed.
    Fetch {
        /// Request the URLs one after another instead of concurrently.
        #[arg(long)]
        sequential: bool,

        /// The URLs to download.
        #[arg(required = true, value_name = "URL")]
        urls: Vec<Url>,
    },

    /// Run concurrent workloads against memo caches.
    Stress {
        /// Path to the workload definition file.
        #[arg(long, short, value_name = "FILE")]
        workloads: PathBuf,

        /// Duration of the stresstest.
        #[arg(long, short, value_parser = humantime::parse_duration)]
        duration: Duration,
    },
}

/// Command line interface parser.
#[derive(Parser, Debug)]
#[command(bin_name = "memoflight", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: No other threads have been spawned yet.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to set up statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("memoflight")
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    match cli.command {
        Command::Fetch { sequential, urls } => {
            let memo = fetch::create_memo(&config, runtime.handle().clone())
                .context("failed to create HTTP client")?;
            let results = runtime.block_on(fetch::fetch_all(&memo, &urls, sequential));
            for line in results.iter().map(fetch::FetchResult::to_string) {
                println!("{line}");
            }
            memo.close();
        }
        Command::Stress {
            workloads,
            duration,
        } => {
            let workloads =
                workloads::read_workloads(&workloads).context("failed to load workloads")?;
            runtime
                .block_on(stresstest::perform_stresstest(&config, workloads, duration))
                .context("failed to run stresstest")?;
        }
    }

    Ok(())
}
