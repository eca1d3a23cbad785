//! Core data models used throughout the price harness.
//!
//! These types represent the registered sites and the per-site outcomes of
//! a scrape run. The aggregated [`Report`](crate::aggregate::Report) lives next to the
//! aggregation logic that builds it.

use serde::Serialize;

/// A site stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteRecord {
    /// Opaque identifier assigned by the registry (SQLite rowid).
    pub id: i64,
    pub title: String,
    pub url: String,
    pub selector: String,
}

/// A validated row handed to the registry by the tabular input, before an
/// id has been assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewSite {
    pub title: String,
    pub url: String,
    pub selector: String,
}

impl NewSite {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        selector: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            selector: selector.into(),
        }
    }
}

/// Result of a bulk registry reload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadSummary {
    /// Number of rows inserted.
    pub inserted: usize,
    /// Rows skipped because their URL was already present in the batch.
    pub rejected: Vec<NewSite>,
}

/// A successfully extracted price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceResult {
    pub title: String,
    pub price: f64,
    pub url: String,
}

/// Pipeline stage at which a site failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    Extract,
}

/// A per-site failure, carrying the underlying cause text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteError {
    pub title: String,
    pub url: String,
    pub stage: FailureStage,
    pub message: String,
}

/// Terminal state of one site within a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Priced(PriceResult),
    Failed(SiteError),
}
