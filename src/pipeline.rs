//! Scrape pipeline orchestration.
//!
//! Coordinates one run: registry → fetch → extract → aggregate, streaming a
//! notification per site to the caller's [`NotificationSink`]. Per-site
//! failures are recorded as [`SiteError`] values and never abort the run.
//!
//! A run-scoped lock makes runs and registry reloads mutually exclusive, so
//! the site list is read-only for the duration of a run.

use anyhow::Result;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::aggregate::{aggregate, Report};
use crate::config::Config;
use crate::extract::{Extractor, HtmlExtractor};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::models::{FailureStage, LoadSummary, NewSite, Outcome, PriceResult, SiteError, SiteRecord};
use crate::progress::{NotificationSink, ProgressMode, ScrapeEvent};
use crate::registry::{SiteRegistry, SqliteRegistry};

/// Lifecycle of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RunState::Running,
            2 => RunState::Completed,
            _ => RunState::Idle,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The registry was empty; no report is produced.
    NothingToScrape,
    Completed(Report),
}

pub struct Pipeline {
    registry: Arc<dyn SiteRegistry>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    concurrency: usize,
    run_lock: Mutex<()>,
    state: AtomicU8,
}

impl Pipeline {
    pub fn new(
        registry: Arc<dyn SiteRegistry>,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            extractor,
            concurrency: 1,
            run_lock: Mutex::new(()),
            state: AtomicU8::new(RunState::Idle as u8),
        }
    }

    /// Number of sites processed at once. `1` (the default) is sequential.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Build the production pipeline: SQLite registry, HTTP fetcher, HTML
    /// extractor.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let registry = SqliteRegistry::open(config).await?;
        let fetcher = HttpFetcher::new(&config.fetch)?;
        Ok(Self::new(Arc::new(registry), Arc::new(fetcher), Arc::new(HtmlExtractor))
            .with_concurrency(config.pipeline.concurrency))
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: RunState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Current registry contents, in registry order.
    pub async fn sites(&self) -> Result<Vec<SiteRecord>> {
        self.registry.load_all().await
    }

    /// Replace the registry. Waits for any run in progress to finish.
    pub async fn replace_sites(&self, sites: &[NewSite]) -> Result<LoadSummary> {
        let _guard = self.run_lock.lock().await;
        let summary = self.registry.replace_all(sites).await?;
        info!(
            inserted = summary.inserted,
            rejected = summary.rejected.len(),
            "registry reloaded"
        );
        Ok(summary)
    }

    /// Execute one run over the current registry.
    pub async fn run(&self, sink: &dyn NotificationSink) -> Result<RunOutcome> {
        let _guard = self.run_lock.lock().await;

        let sites = self.registry.load_all().await?;
        if sites.is_empty() {
            info!("registry is empty, nothing to scrape");
            self.set_state(RunState::Completed);
            sink.notify(&ScrapeEvent::NothingToScrape);
            return Ok(RunOutcome::NothingToScrape);
        }

        self.set_state(RunState::Running);
        info!(sites = sites.len(), concurrency = self.concurrency, "scrape started");
        sink.notify(&ScrapeEvent::Started { total: sites.len() });

        let outcomes = if self.concurrency <= 1 {
            self.run_sequential(&sites, sink).await
        } else {
            self.run_concurrent(sites, sink).await
        };
        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(e) => {
                self.set_state(RunState::Idle);
                return Err(e);
            }
        };

        let report = aggregate(&outcomes);
        self.set_state(RunState::Completed);
        info!(
            priced = report.success_count(),
            failed = report.failure_count(),
            "scrape completed"
        );
        sink.notify(&ScrapeEvent::Completed(report.clone()));
        Ok(RunOutcome::Completed(report))
    }

    async fn run_sequential(
        &self,
        sites: &[SiteRecord],
        sink: &dyn NotificationSink,
    ) -> Result<Vec<Outcome>> {
        let mut outcomes = Vec::with_capacity(sites.len());
        for site in sites {
            let outcome = scrape_site(self.fetcher.as_ref(), self.extractor.as_ref(), site).await;
            notify_outcome(sink, &outcome);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Notifications follow completion order; the returned outcomes follow
    /// registry order.
    async fn run_concurrent(
        &self,
        sites: Vec<SiteRecord>,
        sink: &dyn NotificationSink,
    ) -> Result<Vec<Outcome>> {
        let total = sites.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, site) in sites.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let fetcher = Arc::clone(&self.fetcher);
            let extractor = Arc::clone(&self.extractor);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = scrape_site(fetcher.as_ref(), extractor.as_ref(), &site).await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<Outcome>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined?;
            notify_outcome(sink, &outcome);
            slots[index] = Some(outcome);
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

/// Fetch and extract a single site. Always yields an outcome.
async fn scrape_site(fetcher: &dyn Fetcher, extractor: &dyn Extractor, site: &SiteRecord) -> Outcome {
    let content = match fetcher.fetch(&site.url).await {
        Ok(content) => content,
        Err(e) => return failure(site, FailureStage::Fetch, e.to_string()),
    };

    match extractor.extract(&content, &site.selector) {
        Ok(price) => Outcome::Priced(PriceResult {
            title: site.title.clone(),
            price,
            url: site.url.clone(),
        }),
        Err(e) => failure(site, FailureStage::Extract, e.to_string()),
    }
}

fn failure(site: &SiteRecord, stage: FailureStage, message: String) -> Outcome {
    Outcome::Failed(SiteError {
        title: site.title.clone(),
        url: site.url.clone(),
        stage,
        message,
    })
}

fn notify_outcome(sink: &dyn NotificationSink, outcome: &Outcome) {
    match outcome {
        Outcome::Priced(r) => sink.notify(&ScrapeEvent::Priced(r.clone())),
        Outcome::Failed(e) => {
            warn!(title = %e.title, url = %e.url, stage = ?e.stage, "{}", e.message);
            sink.notify(&ScrapeEvent::Failed(e.clone()));
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// CLI entry point
// ═══════════════════════════════════════════════════════════════════════

/// `ph scrape`: run the pipeline and print the report to stdout.
pub async fn run_scrape(config: &Config, progress: ProgressMode, json: bool) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let sink = progress.sink();

    match pipeline.run(sink.as_ref()).await? {
        RunOutcome::NothingToScrape => {
            if json {
                println!("{}", serde_json::json!({ "status": "nothing_to_scrape" }));
            } else {
                println!("nothing to scrape");
            }
        }
        RunOutcome::Completed(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, FetchOutcome};
    use crate::progress::CollectingSink;
    use crate::registry::MemoryRegistry;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Serves canned responses keyed by URL, with an optional delay.
    #[derive(Default)]
    struct StubFetcher {
        pages: HashMap<String, (FetchOutcome, u64)>,
    }

    impl StubFetcher {
        fn page(mut self, url: &str, body: &str) -> Self {
            self.pages
                .insert(url.to_string(), (Ok(body.as_bytes().to_vec()), 0));
            self
        }

        fn slow_page(mut self, url: &str, body: &str, delay_ms: u64) -> Self {
            self.pages
                .insert(url.to_string(), (Ok(body.as_bytes().to_vec()), delay_ms));
            self
        }

        fn failing(mut self, url: &str, err: FetchError) -> Self {
            self.pages.insert(url.to_string(), (Err(err), 0));
            self
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> FetchOutcome {
            match self.pages.get(url) {
                Some((outcome, delay)) => {
                    if *delay > 0 {
                        tokio::time::sleep(Duration::from_millis(*delay)).await;
                    }
                    outcome.clone()
                }
                None => Err(FetchError::Network(format!("no route to {}", url))),
            }
        }
    }

    fn pipeline(sites: &[NewSite], fetcher: StubFetcher) -> Pipeline {
        Pipeline::new(
            Arc::new(MemoryRegistry::with_sites(sites)),
            Arc::new(fetcher),
            Arc::new(HtmlExtractor),
        )
    }

    fn completed(outcome: RunOutcome) -> Report {
        match outcome {
            RunOutcome::Completed(report) => report,
            RunOutcome::NothingToScrape => panic!("expected a report"),
        }
    }

    const SEL: &str = "//p[@class='p']";

    #[tokio::test]
    async fn same_title_is_averaged() {
        let sites = [NewSite::new("A", "http://x", SEL), NewSite::new("A", "http://y", SEL)];
        let fetcher = StubFetcher::default()
            .page("http://x", "<p class='p'>10.00</p>")
            .page("http://y", "<p class='p'>20.00</p>");
        let p = pipeline(&sites, fetcher);

        let sink = CollectingSink::new();
        let report = completed(p.run(&sink).await.unwrap());
        assert_eq!(report.success_count(), 2);
        assert!(report.errors.is_empty());
        assert_eq!(report.grouped_averages.get("A"), Some(&15.0));

        let events = sink.events();
        assert_eq!(events[0], ScrapeEvent::Started { total: 2 });
        assert!(matches!(events[1], ScrapeEvent::Priced(ref r) if r.price == 10.0));
        assert!(matches!(events[2], ScrapeEvent::Priced(ref r) if r.price == 20.0));
        assert!(matches!(events[3], ScrapeEvent::Completed(_)));
    }

    #[tokio::test]
    async fn fetch_failure_is_recorded_and_run_continues() {
        let sites = [NewSite::new("B", "http://z", SEL), NewSite::new("C", "http://w", SEL)];
        let fetcher = StubFetcher::default()
            .failing("http://z", FetchError::Network("timeout".into()))
            .page("http://w", "<p class='p'>7</p>");
        let report = completed(pipeline(&sites, fetcher).run(&CollectingSink::new()).await.unwrap());

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].title, "B");
        assert_eq!(report.errors[0].message, "timeout");
        assert_eq!(report.errors[0].stage, FailureStage::Fetch);
        assert!(!report.grouped_averages.contains_key("B"));
        assert_eq!(report.grouped_averages.get("C"), Some(&7.0));
    }

    #[tokio::test]
    async fn empty_text_is_an_extraction_failure() {
        let sites = [NewSite::new("D", "http://e", SEL)];
        let fetcher = StubFetcher::default().page("http://e", "<p class='p'></p>");
        let report = completed(pipeline(&sites, fetcher).run(&CollectingSink::new()).await.unwrap());

        assert!(report.results.is_empty());
        assert_eq!(report.errors[0].stage, FailureStage::Extract);
        assert_eq!(report.errors[0].message, "no text content");
    }

    #[tokio::test]
    async fn empty_registry_has_nothing_to_scrape() {
        let p = pipeline(&[], StubFetcher::default());
        assert_eq!(p.state(), RunState::Idle);

        let sink = CollectingSink::new();
        assert_eq!(p.run(&sink).await.unwrap(), RunOutcome::NothingToScrape);
        assert_eq!(sink.events(), vec![ScrapeEvent::NothingToScrape]);
    }

    #[tokio::test]
    async fn state_is_completed_after_run() {
        let sites = [NewSite::new("A", "http://x", SEL)];
        let p = pipeline(&sites, StubFetcher::default().page("http://x", "<p class='p'>1</p>"));
        assert_eq!(p.state(), RunState::Idle);
        p.run(&CollectingSink::new()).await.unwrap();
        assert_eq!(p.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn concurrent_run_reports_in_registry_order() {
        let sites = [
            NewSite::new("A", "http://1", SEL),
            NewSite::new("B", "http://2", SEL),
            NewSite::new("A", "http://3", SEL),
            NewSite::new("C", "http://4", SEL),
        ];
        let stub = || {
            StubFetcher::default()
                .slow_page("http://1", "<p class='p'>10</p>", 120)
                .slow_page("http://2", "<p class='p'>5</p>", 60)
                .page("http://3", "<p class='p'>30</p>")
                .failing("http://4", FetchError::Timeout("deadline".into()))
        };

        let sequential = completed(pipeline(&sites, stub()).run(&CollectingSink::new()).await.unwrap());
        let sink = CollectingSink::new();
        let concurrent = completed(
            pipeline(&sites, stub())
                .with_concurrency(4)
                .run(&sink)
                .await
                .unwrap(),
        );

        assert_eq!(concurrent, sequential);
        let urls: Vec<&str> = concurrent.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["http://1", "http://2", "http://3"]);
        assert_eq!(concurrent.grouped_averages.get("A"), Some(&20.0));

        // Fast sites are announced before slow ones
        let events = sink.events();
        assert_eq!(events.len(), 6);
        assert!(matches!(events[1], ScrapeEvent::Priced(ref r) if r.url == "http://3")
            || matches!(events[1], ScrapeEvent::Failed(ref e) if e.url == "http://4"));
    }

    #[tokio::test]
    async fn reload_waits_for_running_scrape() {
        let sites = [NewSite::new("A", "http://x", SEL)];
        let fetcher = StubFetcher::default().slow_page("http://x", "<p class='p'>3</p>", 200);
        let p = Arc::new(pipeline(&sites, fetcher));

        let runner = {
            let p = Arc::clone(&p);
            tokio::spawn(async move { p.run(&CollectingSink::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(p.state(), RunState::Running);

        p.replace_sites(&[NewSite::new("Z", "http://z", SEL)]).await.unwrap();
        // The reload only happens once the run has finished
        assert_eq!(p.state(), RunState::Completed);

        let report = completed(runner.await.unwrap().unwrap());
        assert_eq!(report.results[0].title, "A");
        assert_eq!(p.sites().await.unwrap()[0].title, "Z");
    }
}
