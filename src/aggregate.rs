//! Aggregation of per-site outcomes into a run report.
//!
//! [`aggregate`] is a pure function of its input: successes and failures are
//! partitioned (keeping input order inside each partition), successes are
//! grouped by exact title, and each group's arithmetic mean is computed.
//! Grouping and averaging do not depend on input order.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{Outcome, PriceResult, SiteError};

/// Summary of one scrape run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub results: Vec<PriceResult>,
    pub errors: Vec<SiteError>,
    /// Mean price per title, only for titles with at least one result.
    pub grouped_averages: BTreeMap<String, f64>,
}

pub fn aggregate(outcomes: &[Outcome]) -> Report {
    let mut results = Vec::new();
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Priced(r) => results.push(r.clone()),
            Outcome::Failed(e) => errors.push(e.clone()),
        }
    }

    let grouped_averages = group_averages(&results);
    Report {
        results,
        errors,
        grouped_averages,
    }
}

fn group_averages(results: &[PriceResult]) -> BTreeMap<String, f64> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for r in results {
        groups.entry(r.title.as_str()).or_default().push(r.price);
    }

    groups
        .into_iter()
        .map(|(title, mut prices)| {
            // Sorted summation keeps the mean identical whatever order the
            // outcomes arrived in.
            prices.sort_by(f64::total_cmp);
            let sum: f64 = prices.iter().sum();
            (title.to_string(), sum / prices.len() as f64)
        })
        .collect()
}

impl Report {
    pub fn success_count(&self) -> usize {
        self.results.len()
    }

    pub fn failure_count(&self) -> usize {
        self.errors.len()
    }

    /// Human-readable rendering used by the CLI and command replies.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!(
            "scrape finished: {} priced, {} failed\n",
            self.success_count(),
            self.failure_count()
        ));

        if !self.results.is_empty() {
            out.push_str("\nprices:\n");
            for r in &self.results {
                out.push_str(&format!("  {}  {:.2}  ({})\n", r.title, r.price, r.url));
            }

            let width = self
                .grouped_averages
                .keys()
                .map(|t| t.chars().count())
                .max()
                .unwrap_or(0);
            out.push_str("\naverage prices:\n");
            for (title, avg) in &self.grouped_averages {
                out.push_str(&format!("  {:<width$}  {:.2}\n", title, avg, width = width));
            }
        }

        if !self.errors.is_empty() {
            out.push_str("\nerrors:\n");
            for e in &self.errors {
                out.push_str(&format!("  {}: {}\n", e.title, e.message));
            }
        }

        out
    }
}
