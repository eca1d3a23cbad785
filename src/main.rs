//! # Price Harness CLI (`ph`)
//!
//! The `ph` binary loads a site list, scrapes a price from every site, and
//! reports per-title averages. It can also serve the same operations over
//! HTTP.
//!
//! ## Usage
//!
//! ```bash
//! ph --config ./config/ph.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ph init` | Create the SQLite database and schema |
//! | `ph load <file>` | Replace the site list from a `.xlsx` or `.csv` file |
//! | `ph sites` | List registered sites |
//! | `ph scrape` | Fetch every site and print the report |
//! | `ph command "<text>"` | Route a chat-style command such as `/scrape` |
//! | `ph serve` | Start the HTTP server |
//! | `ph completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Load sites and scrape right away
//! ph load ./sites.xlsx --scrape
//!
//! # Machine-readable report, JSON progress on stderr
//! ph scrape --json --progress json
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use price_harness::progress::ProgressMode;
use price_harness::{commands, config, migrate, pipeline, server, sites};

/// Price Harness: scrape prices from a list of sites and report averages.
///
/// All commands except `completions` accept a `--config` flag pointing to a
/// TOML configuration file.
#[derive(Parser)]
#[command(
    name = "ph",
    about = "Price Harness: selector-driven price scraping and aggregation",
    version,
    long_about = "Price Harness loads a list of (title, url, selector) sites from a spreadsheet, \
    fetches every page, extracts a price with the site's XPath or CSS selector, and reports \
    per-site results, errors, and per-title average prices."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ph.toml`.
    #[arg(long, global = true, default_value = "./config/ph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Replace the site list from a spreadsheet.
    ///
    /// The file must have the columns `title`, `url` and `selector`
    /// (`xpath` is accepted as the selector column). Rows with a URL already
    /// seen earlier in the file are skipped and reported.
    Load {
        /// Path to a `.xlsx` or `.csv` file.
        file: PathBuf,

        /// Run a scrape immediately after loading.
        #[arg(long)]
        scrape: bool,

        /// Progress output for the scrape: off, human, or json (stderr).
        #[arg(long)]
        progress: Option<String>,
    },

    /// List registered sites.
    Sites,

    /// Fetch every registered site and print the report.
    Scrape {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,

        /// Progress output: off, human, or json (stderr). Defaults to human
        /// when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Route a chat-style command (`/start`, `/sites`, `/scrape`, ...).
    Command {
        /// Message text.
        text: String,
    },

    /// Start the HTTP server.
    Serve,

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "ph", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load {
            file,
            scrape,
            progress,
        } => {
            let mode = ProgressMode::from_flag(progress.as_deref())?;
            sites::run_load(&cfg, &file, scrape, mode).await?;
        }
        Commands::Sites => {
            sites::list_sites(&cfg).await?;
        }
        Commands::Scrape { json, progress } => {
            let mode = ProgressMode::from_flag(progress.as_deref())?;
            pipeline::run_scrape(&cfg, mode, json).await?;
        }
        Commands::Command { text } => {
            commands::run_command(&cfg, &text).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
