/// Storegame Downloader - headless entry point
///
/// Drives the download orchestrator from environment configuration in place
/// of the handheld menu: lists a catalog, or fetches one item and prints its
/// events as JSON lines.
use anyhow::{bail, Context};
use tracing::{info, warn};

use storegame_downloader::{DownloadEvent, DownloadOrchestrator, DownloadRequest, DownloaderConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storegame_downloader=info,storegame_shared=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("=== Storegame Downloader Starting ===");

    let config = DownloaderConfig::from_env().context("invalid STOREGAME_* configuration")?;
    let list_url = std::env::var("STOREGAME_LIST_URL").context("STOREGAME_LIST_URL must be set")?;
    let category = std::env::var("STOREGAME_CATEGORY").ok();
    let item = std::env::var("STOREGAME_ITEM").ok().filter(|s| !s.is_empty());

    let orchestrator = DownloadOrchestrator::new(config)?;

    let Some(item) = item else {
        for name in orchestrator.list_catalog(&list_url).await {
            println!("{}", name);
        }
        return Ok(());
    };

    let category = category.context("STOREGAME_CATEGORY must be set to download an item")?;
    info!("Turbo mode: {}", orchestrator.turbo_mode().await);

    let mut handle = orchestrator
        .submit(DownloadRequest::new(&list_url, &item, &category))
        .await?;

    let cancel = handle.cancellation();
    let mut terminal = None;
    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => {
                    println!("{}", event.to_json_line()?);
                    if let DownloadEvent::Finished(t) = event {
                        terminal = Some(t);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                warn!("Interrupted, cancelling {}", item);
                cancel.cancel();
            }
        }
    }

    let stats = orchestrator.stats().await;
    info!("Done: {} completed, {} failed", stats.completed, stats.failed);

    match terminal {
        Some(t) if t.is_success() => Ok(()),
        Some(t) => bail!("{}: {}", t.status, t.detail.unwrap_or_default()),
        None => bail!("download task ended without a terminal event"),
    }
}
