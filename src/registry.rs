//! Site registry: the authoritative, URL-keyed list of pages to scrape.
//!
//! The pipeline only sees the [`SiteRegistry`] trait. Two implementations
//! ship with the crate:
//!
//! - [`SqliteRegistry`] — persistent, backed by the `sites` table.
//! - [`MemoryRegistry`] — in-process, for tests and embedders.
//!
//! # Reload semantics
//!
//! [`replace_all`](SiteRegistry::replace_all) clears the registry and then
//! inserts the batch in order. A row whose URL was already inserted earlier
//! in the same batch is rejected and reported in
//! [`LoadSummary::rejected`]; the first occurrence wins and the rest of the
//! batch continues.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{LoadSummary, NewSite, SiteRecord};

/// Storage collaborator for the list of sites.
#[async_trait]
pub trait SiteRegistry: Send + Sync {
    /// All records in insertion order.
    async fn load_all(&self) -> Result<Vec<SiteRecord>>;

    /// Replace the whole registry with `sites`.
    async fn replace_all(&self, sites: &[NewSite]) -> Result<LoadSummary>;
}

// ═══════════════════════════════════════════════════════════════════════
// SQLite
// ═══════════════════════════════════════════════════════════════════════

pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    /// Open the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SiteRegistry for SqliteRegistry {
    async fn load_all(&self) -> Result<Vec<SiteRecord>> {
        let rows: Vec<(i64, String, String, String)> =
            sqlx::query_as("SELECT id, title, url, selector FROM sites ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, title, url, selector)| SiteRecord {
                id,
                title,
                url,
                selector,
            })
            .collect())
    }

    async fn replace_all(&self, sites: &[NewSite]) -> Result<LoadSummary> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sites").execute(&mut *tx).await?;

        let mut summary = LoadSummary::default();
        for site in sites {
            let result = sqlx::query(
                "INSERT INTO sites (title, url, selector) VALUES (?, ?, ?) ON CONFLICT(url) DO NOTHING",
            )
            .bind(&site.title)
            .bind(&site.url)
            .bind(&site.selector)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                warn!(url = %site.url, title = %site.title, "duplicate url rejected");
                summary.rejected.push(site.clone());
            } else {
                summary.inserted += 1;
            }
        }

        tx.commit().await?;
        debug!(
            inserted = summary.inserted,
            rejected = summary.rejected.len(),
            "registry replaced"
        );
        Ok(summary)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryRegistry {
    inner: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    sites: Vec<SiteRecord>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `sites`. Duplicates are dropped exactly
    /// as [`replace_all`](SiteRegistry::replace_all) would drop them.
    pub fn with_sites(sites: &[NewSite]) -> Self {
        let mut state = MemoryState::default();
        state.replace(sites);
        Self {
            inner: RwLock::new(state),
        }
    }
}

impl MemoryState {
    fn replace(&mut self, sites: &[NewSite]) -> LoadSummary {
        self.sites.clear();
        let mut summary = LoadSummary::default();
        for site in sites {
            if self.sites.iter().any(|s| s.url == site.url) {
                summary.rejected.push(site.clone());
                continue;
            }
            self.next_id += 1;
            self.sites.push(SiteRecord {
                id: self.next_id,
                title: site.title.clone(),
                url: site.url.clone(),
                selector: site.selector.clone(),
            });
            summary.inserted += 1;
        }
        summary
    }
}

#[async_trait]
impl SiteRegistry for MemoryRegistry {
    async fn load_all(&self) -> Result<Vec<SiteRecord>> {
        Ok(self.inner.read().await.sites.clone())
    }

    async fn replace_all(&self, sites: &[NewSite]) -> Result<LoadSummary> {
        let summary = self.inner.write().await.replace(sites);
        for site in &summary.rejected {
            warn!(url = %site.url, title = %site.title, "duplicate url rejected");
        }
        Ok(summary)
    }
}
