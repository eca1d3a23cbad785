//! Chat-style command routing.
//!
//! Messages are resolved to a [`Command`] through an explicit dispatch
//! table, then executed against a [`Pipeline`]. The pipeline itself never
//! depends on this module; it is one of several front ends (CLI, HTTP).

use anyhow::{bail, Result};

use crate::config::Config;
use crate::pipeline::{Pipeline, RunOutcome};
use crate::progress::NoProgress;
use crate::sites::format_sites;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Upload,
    Sites,
    Scrape,
    Help,
}

/// Message text (lowercased, trimmed) → command.
const DISPATCH: &[(&str, Command)] = &[
    ("/start", Command::Start),
    ("/upload", Command::Upload),
    ("upload file", Command::Upload),
    ("загрузить файл", Command::Upload),
    ("/sites", Command::Sites),
    ("/scrape", Command::Scrape),
    ("/help", Command::Help),
];

const UPLOAD_HELP: &str = "Send a spreadsheet (.xlsx or .csv) with the columns title, url and selector \
(xpath is accepted as the selector column name). Loading replaces the current site list.";

impl Command {
    /// Resolve message text. Returns `None` for anything not in the table.
    pub fn parse(text: &str) -> Option<Command> {
        let key = text.trim().to_lowercase();
        DISPATCH
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, cmd)| *cmd)
    }

    fn summary(&self) -> &'static str {
        match self {
            Command::Start => "show this menu",
            Command::Upload => "how to load a site list",
            Command::Sites => "list registered sites",
            Command::Scrape => "fetch every site and report prices",
            Command::Help => "show this menu",
        }
    }
}

fn menu() -> String {
    let mut out = String::from("Choose an action:\n");
    for (name, cmd) in DISPATCH.iter().filter(|(name, _)| name.starts_with('/')) {
        out.push_str(&format!("  {:<9} {}\n", name, cmd.summary()));
    }
    out
}

/// Execute `command` and return the reply text.
pub async fn dispatch(command: Command, pipeline: &Pipeline) -> Result<String> {
    match command {
        Command::Start | Command::Help => Ok(menu()),
        Command::Upload => Ok(UPLOAD_HELP.to_string()),
        Command::Sites => {
            let sites = pipeline.sites().await?;
            if sites.is_empty() {
                Ok("No sites registered.".to_string())
            } else {
                Ok(format_sites(&sites))
            }
        }
        Command::Scrape => match pipeline.run(&NoProgress).await? {
            RunOutcome::NothingToScrape => Ok("nothing to scrape".to_string()),
            RunOutcome::Completed(report) => Ok(report.render()),
        },
    }
}

/// `ph command "<text>"`: route a message and print the reply.
pub async fn run_command(config: &Config, text: &str) -> Result<()> {
    let Some(command) = Command::parse(text) else {
        bail!("Unknown command: '{}'. Try /help", text.trim());
    };
    let pipeline = Pipeline::from_config(config).await?;
    let reply = dispatch(command, &pipeline).await?;
    print!("{}", reply);
    if !reply.ends_with('\n') {
        println!();
    }
    Ok(())
}
