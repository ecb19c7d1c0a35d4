/// Core data model shared between the downloader and its front ends.
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel percent reported alongside a failure.
pub const FAILED_PERCENT: i32 = -1;

pub const STATUS_STARTING: &str = "Starting...";
pub const STATUS_EXTRACTING: &str = "Extracting...";
pub const STATUS_COMPLETED: &str = "Completed!";
pub const STATUS_TRANSFER_FAILED: &str = "Download failed";
pub const STATUS_EXTRACTION_FAILED: &str = "Extraction failed";
pub const STATUS_CANCELLED: &str = "Download cancelled";

/// Percent reported while the archive is being unpacked.
pub const EXTRACTING_PERCENT: u8 = 95;

/// One downloadable item discovered in a remote listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    /// Listing URL the entry was discovered under.
    pub source_url: String,
}

/// Receives `(percent, status)` pairs, `percent` being [`FAILED_PERCENT`] on failure.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, percent: i32, status: &str);
}

impl<F> ProgressObserver for F
where
    F: Fn(i32, &str) + Send + Sync,
{
    fn on_progress(&self, percent: i32, status: &str) {
        self(percent, status)
    }
}

/// A request to fetch one catalog item into a category directory.
#[derive(Clone)]
pub struct DownloadRequest {
    /// Listing URL the item lives under.
    pub url: String,
    pub item: String,
    /// Destination category, e.g. the system id `NES`.
    pub category: String,
    pub observer: Option<Arc<dyn ProgressObserver>>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, item: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            item: item.into(),
            category: category.into(),
            observer: None,
        }
    }

    pub fn from_entry(entry: &CatalogEntry, category: impl Into<String>) -> Self {
        Self::new(entry.source_url.clone(), entry.name.clone(), category)
    }

    pub fn with_observer(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }
}

impl fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("url", &self.url)
            .field("item", &self.item)
            .field("category", &self.category)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Transfer rate scraped from the tool's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRate {
    pub bytes_per_sec: u64,
}

impl fmt::Display for TransferRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KIB: f64 = 1024.0;
        let bytes = self.bytes_per_sec as f64;
        if bytes >= KIB * KIB * KIB {
            write!(f, "{:.1} GiB/s", bytes / (KIB * KIB * KIB))
        } else if bytes >= KIB * KIB {
            write!(f, "{:.1} MiB/s", bytes / (KIB * KIB))
        } else if bytes >= KIB {
            write!(f, "{:.1} KiB/s", bytes / KIB)
        } else {
            write!(f, "{} B/s", self.bytes_per_sec)
        }
    }
}

/// Non-terminal progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<TransferRate>,
}

impl ProgressUpdate {
    pub fn new(percent: u8, status: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            status: status.into(),
            rate: None,
        }
    }

    /// Progress scraped from a download line.
    pub fn downloading(percent: u8, rate: Option<TransferRate>) -> Self {
        let percent = percent.min(100);
        let status = match rate {
            Some(rate) => format!("Downloading... {}% ({})", percent, rate),
            None => format!("Downloading... {}%", percent),
        };
        Self { percent, status, rate }
    }
}

/// Final classification of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// The single event closing a session's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalEvent {
    pub item: String,
    pub outcome: Outcome,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TerminalEvent {
    pub fn succeeded(item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            outcome: Outcome::Succeeded,
            status: STATUS_COMPLETED.to_string(),
            detail: None,
        }
    }

    pub fn failed(item: impl Into<String>, status: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            outcome: Outcome::Failed,
            status: status.into(),
            detail: Some(detail.into()),
        }
    }

    /// 100 on success, [`FAILED_PERCENT`] otherwise.
    pub fn percent(&self) -> i32 {
        match self.outcome {
            Outcome::Succeeded => 100,
            Outcome::Failed => FAILED_PERCENT,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}

/// Event delivered to the caller for one transfer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DownloadEvent {
    Progress(ProgressUpdate),
    Finished(TerminalEvent),
}

impl DownloadEvent {
    pub fn percent(&self) -> i32 {
        match self {
            DownloadEvent::Progress(update) => i32::from(update.percent),
            DownloadEvent::Finished(terminal) => terminal.percent(),
        }
    }

    pub fn status(&self) -> &str {
        match self {
            DownloadEvent::Progress(update) => &update.status,
            DownloadEvent::Finished(terminal) => &terminal.status,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadEvent::Finished(_))
    }

    /// Serialize to a single JSON line.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Terminal record of a finished session. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub session_id: Uuid,
    pub item: String,
    pub category: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
