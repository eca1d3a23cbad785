//! Scrape progress notifications.
//!
//! The pipeline streams a [`ScrapeEvent`] per site as soon as that site
//! reaches a terminal state, plus start and completion events. Sinks for the
//! CLI write to **stderr** so stdout remains parseable for scripts.

use serde::Serialize;
use std::io::Write;

use crate::aggregate::Report;
use crate::models::{PriceResult, SiteError};

/// A single notification emitted during a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScrapeEvent {
    /// The run has started with this many sites.
    Started { total: usize },
    Priced(PriceResult),
    Failed(SiteError),
    Completed(Report),
    /// The registry was empty; no report follows.
    NothingToScrape,
}

/// Receives live notifications from the pipeline.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &ScrapeEvent);
}

/// Human-friendly progress on stderr: "scrape  3 / 10  Phone  1234.56".
pub struct StderrProgress {
    total: std::sync::atomic::AtomicUsize,
    done: std::sync::atomic::AtomicUsize,
}

impl StderrProgress {
    pub fn new() -> Self {
        Self {
            total: 0.into(),
            done: 0.into(),
        }
    }

    fn step(&self) -> (usize, usize) {
        use std::sync::atomic::Ordering;
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        (done, self.total.load(Ordering::SeqCst))
    }
}

impl Default for StderrProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for StderrProgress {
    fn notify(&self, event: &ScrapeEvent) {
        let line = match event {
            ScrapeEvent::Started { total } => {
                self.total
                    .store(*total, std::sync::atomic::Ordering::SeqCst);
                format!("scrape  {} sites\n", total)
            }
            ScrapeEvent::Priced(r) => {
                let (n, total) = self.step();
                format!("scrape  {} / {}  {}  {:.2}\n", n, total, r.title, r.price)
            }
            ScrapeEvent::Failed(e) => {
                let (n, total) = self.step();
                format!("scrape  {} / {}  {}  error: {}\n", n, total, e.title, e.message)
            }
            ScrapeEvent::Completed(report) => format!(
                "scrape  done  {} priced, {} failed\n",
                report.success_count(),
                report.failure_count()
            ),
            ScrapeEvent::NothingToScrape => "scrape  nothing to scrape\n".to_string(),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl NotificationSink for JsonProgress {
    fn notify(&self, event: &ScrapeEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op sink when progress is disabled.
pub struct NoProgress;

impl NotificationSink for NoProgress {
    fn notify(&self, _event: &ScrapeEvent) {}
}

/// Collects every event in memory, for callers that want the whole event
/// log after a run (tests, embedders).
#[derive(Default)]
pub struct CollectingSink {
    events: std::sync::Mutex<Vec<ScrapeEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScrapeEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for CollectingSink {
    fn notify(&self, event: &ScrapeEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse the `--progress` flag value.
    pub fn from_flag(flag: Option<&str>) -> anyhow::Result<Self> {
        match flag {
            None => Ok(Self::default_for_tty()),
            Some("off") => Ok(ProgressMode::Off),
            Some("human") => Ok(ProgressMode::Human),
            Some("json") => Ok(ProgressMode::Json),
            Some(other) => anyhow::bail!(
                "Unknown progress mode '{}'. Use off, human, or json.",
                other
            ),
        }
    }

    pub fn sink(&self) -> Box<dyn NotificationSink> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress::new()),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureStage;

    #[test]
    fn events_serialize_with_tag() {
        let event = ScrapeEvent::Started { total: 3 };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"event": "started", "total": 3})
        );

        let event = ScrapeEvent::Failed(SiteError {
            title: "B".into(),
            url: "http://b".into(),
            stage: FailureStage::Fetch,
            message: "timeout".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "failed");
        assert_eq!(value["stage"], "fetch");
        assert_eq!(value["message"], "timeout");

        let value = serde_json::to_value(ScrapeEvent::NothingToScrape).unwrap();
        assert_eq!(value, serde_json::json!({"event": "nothing_to_scrape"}));
    }

    #[test]
    fn progress_flag_parsing() {
        assert_eq!(ProgressMode::from_flag(Some("off")).unwrap(), ProgressMode::Off);
        assert_eq!(ProgressMode::from_flag(Some("json")).unwrap(), ProgressMode::Json);
        assert!(ProgressMode::from_flag(Some("loud")).is_err());
    }

    #[test]
    fn collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        sink.notify(&ScrapeEvent::Started { total: 0 });
        sink.notify(&ScrapeEvent::NothingToScrape);
        assert_eq!(
            sink.events(),
            vec![ScrapeEvent::Started { total: 0 }, ScrapeEvent::NothingToScrape]
        );
    }
}
