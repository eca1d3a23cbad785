//! `ph load` and `ph sites`: managing the site list from the command line.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::models::{LoadSummary, SiteRecord};
use crate::pipeline::{Pipeline, RunOutcome};
use crate::progress::ProgressMode;
use crate::tabular::{parse_sites, TabularFormat};

/// Render sites as a fixed-width table.
pub fn format_sites(sites: &[SiteRecord]) -> String {
    let title_w = column_width("TITLE", sites.iter().map(|s| s.title.as_str()));
    let url_w = column_width("URL", sites.iter().map(|s| s.url.as_str()));

    let mut out = format!(
        "{:<4} {:<title_w$} {:<url_w$} SELECTOR\n",
        "ID",
        "TITLE",
        "URL",
        title_w = title_w,
        url_w = url_w
    );
    for s in sites {
        out.push_str(&format!(
            "{:<4} {:<title_w$} {:<url_w$} {}\n",
            s.id,
            s.title,
            s.url,
            s.selector,
            title_w = title_w,
            url_w = url_w
        ));
    }
    out
}

fn column_width<'a>(header: &str, values: impl Iterator<Item = &'a str>) -> usize {
    values
        .map(|v| v.chars().count())
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0)
}

fn print_summary(summary: &LoadSummary) {
    println!("load");
    println!("  inserted: {}", summary.inserted);
    println!("  rejected: {}", summary.rejected.len());
    for site in &summary.rejected {
        println!("    duplicate url {} ({})", site.url, site.title);
    }
}

/// `ph load <file>`: parse a spreadsheet and replace the registry with it.
pub async fn run_load(
    config: &Config,
    path: &Path,
    scrape: bool,
    progress: ProgressMode,
) -> Result<()> {
    let format = TabularFormat::from_path(path)?;
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read site list: {}", path.display()))?;
    let rows = parse_sites(&bytes, format)
        .with_context(|| format!("Invalid site list: {}", path.display()))?;

    let pipeline = Pipeline::from_config(config).await?;
    let summary = pipeline.replace_sites(&rows).await?;
    print_summary(&summary);

    let sites = pipeline.sites().await?;
    println!();
    print!("{}", format_sites(&sites));

    if scrape {
        println!();
        let sink = progress.sink();
        match pipeline.run(sink.as_ref()).await? {
            RunOutcome::NothingToScrape => println!("nothing to scrape"),
            RunOutcome::Completed(report) => print!("{}", report.render()),
        }
    }
    Ok(())
}

/// `ph sites`: print the registry.
pub async fn list_sites(config: &Config) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let sites = pipeline.sites().await?;
    if sites.is_empty() {
        println!("No sites registered.");
    } else {
        print!("{}", format_sites(&sites));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_aligns_columns() {
        let sites = vec![
            SiteRecord {
                id: 1,
                title: "Kettle".into(),
                url: "https://shop.example/kettle".into(),
                selector: "//span[@class='price']".into(),
            },
            SiteRecord {
                id: 2,
                title: "Toaster".into(),
                url: "https://x.example/t".into(),
                selector: "span.price".into(),
            },
        ];
        let table = format_sites(&sites);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID   TITLE   URL"));
        let sel_col = lines[0].find("SELECTOR").unwrap();
        assert_eq!(lines[1].find("//span").unwrap(), sel_col);
        assert_eq!(lines[2].find("span.price").unwrap(), sel_col);
    }
}
