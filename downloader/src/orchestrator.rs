/// Download orchestrator.
///
/// Front door for the menu layer: lists catalogs, accepts download
/// requests, runs each one on its own background task and keeps the
/// active/completed/failed bookkeeping. Nothing here blocks the caller on
/// network or process I/O.
use std::sync::Arc;

use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use storegame_shared::config::DownloaderConfig;
use storegame_shared::errors::{RequestError, StoregameResult};
use storegame_shared::models::{
    CatalogEntry, DownloadEvent, DownloadRequest, OutcomeRecord, ProgressUpdate, TerminalEvent,
    STATUS_TRANSFER_FAILED,
};
use storegame_shared::session::{RegistryStats, SessionRegistry, TransferSession};

use crate::catalog::CatalogLister;
use crate::probe::{self, TransferStrategy};
use crate::workers::transfer_runner::{TransferJob, TransferRunner};

/// Caller's view of one submitted download.
#[derive(Debug)]
pub struct DownloadHandle {
    pub item: String,
    pub session_id: Uuid,
    events: mpsc::UnboundedReceiver<DownloadEvent>,
    cancel: CancellationToken,
    task: JoinHandle<TerminalEvent>,
}

impl DownloadHandle {
    /// Next event for this session; `None` after the terminal event.
    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        self.events.recv().await
    }

    /// Non-blocking poll for the foreground loop.
    pub fn try_next_event(&mut self) -> Option<DownloadEvent> {
        self.events.try_recv().ok()
    }

    /// Ask the background task to stop. The transfer ends as failed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the background task and return its terminal event.
    pub async fn wait(self) -> TerminalEvent {
        match self.task.await {
            Ok(terminal) => terminal,
            Err(e) => {
                error!("Download task for {} aborted: {}", self.item, e);
                TerminalEvent::failed(&self.item, STATUS_TRANSFER_FAILED, e.to_string())
            }
        }
    }
}

/// State every background task needs, cloned into each one.
#[derive(Debug, Clone)]
struct SessionContext {
    config: Arc<DownloaderConfig>,
    runner: TransferRunner,
    registry: SessionRegistry,
    /// Probed once, on first use.
    turbo: Arc<OnceCell<bool>>,
}

impl SessionContext {
    async fn turbo_mode(&self) -> bool {
        *self
            .turbo
            .get_or_init(|| probe::probe(&self.config.turbo_tool, self.config.probe_timeout()))
            .await
    }

    /// Body of one background download task.
    async fn run(
        self,
        job: TransferJob,
        cancel: CancellationToken,
        request: DownloadRequest,
        events: mpsc::UnboundedSender<DownloadEvent>,
    ) -> TerminalEvent {
        let strategy = TransferStrategy::from_turbo_available(self.turbo_mode().await);
        let item = job.item.clone();
        let observer = request.observer;

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let forward = async {
            while let Some(update) = progress_rx.recv().await {
                self.registry
                    .update_progress(&item, i32::from(update.percent), &update.status)
                    .await;
                if let Some(observer) = &observer {
                    observer.on_progress(i32::from(update.percent), &update.status);
                }
                let _ = events.send(DownloadEvent::Progress(update));
            }
        };

        let (terminal, ()) = tokio::join!(
            self.runner.run(job, strategy, cancel, progress_tx),
            forward
        );

        // Bookkeeping lands before the caller sees the terminal event.
        self.registry
            .finish(&item, terminal.outcome, terminal.detail.clone())
            .await;
        if let Some(observer) = &observer {
            observer.on_progress(terminal.percent(), &terminal.status);
        }
        let _ = events.send(DownloadEvent::Finished(terminal.clone()));

        terminal
    }
}

/// Sequences probe, transfer and extraction for every request.
pub struct DownloadOrchestrator {
    lister: CatalogLister,
    context: SessionContext,
}

impl DownloadOrchestrator {
    pub fn new(config: DownloaderConfig) -> StoregameResult<Self> {
        let config = Arc::new(config);
        let lister = CatalogLister::new(config.listing_timeout(), &config.archive_extension)?;
        let runner = TransferRunner::new(config.clone());

        info!(
            "Download orchestrator ready (root: {:?}, turbo tool: {})",
            config.download_root, config.turbo_tool
        );

        Ok(Self {
            lister,
            context: SessionContext {
                config,
                runner,
                registry: SessionRegistry::new(),
                turbo: Arc::new(OnceCell::new()),
            },
        })
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.context.config
    }

    /// Whether the turbo tool is usable. Probed on first call, then cached.
    pub async fn turbo_mode(&self) -> bool {
        self.context.turbo_mode().await
    }

    /// Item names at `url`, sorted and distinct. Empty on any failure.
    pub async fn list_catalog(&self, url: &str) -> Vec<String> {
        self.list_entries(url).await.into_iter().map(|e| e.name).collect()
    }

    pub async fn list_entries(&self, url: &str) -> Vec<CatalogEntry> {
        self.lister.list(url).await
    }

    /// Start a download in the background and return immediately.
    ///
    /// Rejected if the request is malformed or the item already has an
    /// active session.
    pub async fn submit(&self, request: DownloadRequest) -> Result<DownloadHandle, RequestError> {
        validate_component(&request.category).map_err(RequestError::InvalidCategory)?;
        validate_component(&request.item).map_err(RequestError::InvalidItemName)?;
        let source_url = item_url(&request.url, &request.item)?;

        let session = self.context.registry.begin(&request.item, &request.category).await?;
        let job = TransferJob {
            item: request.item.clone(),
            source_url,
            dest_dir: self.context.config.category_dir(&request.category),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let span = info_span!("download", session = %session.short_id(), item = %job.item);
        let task = tokio::spawn(
            self.context
                .clone()
                .run(job, session.cancel.clone(), request, events_tx)
                .instrument(span),
        );

        Ok(DownloadHandle {
            item: session.item.clone(),
            session_id: session.session_id,
            events: events_rx,
            cancel: session.cancel,
            task,
        })
    }

    /// Cancel the active session for `item`. Returns false if none is active.
    pub async fn cancel(&self, item: &str) -> bool {
        self.context.registry.cancel(item).await
    }

    pub async fn session(&self, item: &str) -> Option<TransferSession> {
        self.context.registry.session(item).await
    }

    pub async fn is_active(&self, item: &str) -> bool {
        self.context.registry.is_active(item).await
    }

    pub async fn active_count(&self) -> usize {
        self.context.registry.active_count().await
    }

    pub async fn completed_count(&self) -> usize {
        self.context.registry.completed_count().await
    }

    pub async fn failed_count(&self) -> usize {
        self.context.registry.failed_count().await
    }

    pub async fn completed(&self) -> Vec<OutcomeRecord> {
        self.context.registry.completed().await
    }

    pub async fn failed(&self) -> Vec<OutcomeRecord> {
        self.context.registry.failed().await
    }

    pub async fn stats(&self) -> RegistryStats {
        self.context.registry.stats().await
    }
}

/// A category or item must be a single plain path component.
fn validate_component(name: &str) -> Result<(), String> {
    let plain = !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c| matches!(c, '/' | '\\' | '\0'));
    if plain {
        Ok(())
    } else {
        Err(name.to_string())
    }
}

/// `<listing_url>/<item>`, with the item percent-encoded as one path segment.
pub fn item_url(listing_url: &str, item: &str) -> Result<String, RequestError> {
    let mut url = reqwest::Url::parse(listing_url)
        .map_err(|e| RequestError::InvalidUrl(format!("{}: {}", listing_url, e)))?;

    if !matches!(url.scheme(), "http" | "https" | "ftp") {
        return Err(RequestError::InvalidUrl(listing_url.to_string()));
    }

    url.path_segments_mut()
        .map_err(|_| RequestError::InvalidUrl(listing_url.to_string()))?
        .pop_if_empty()
        .push(item);

    Ok(url.to_string())
}
