//! Storegame download core.
//!
//! Discovers archives in remote directory listings, fetches them with an
//! external transfer tool while reporting live progress, and unpacks them
//! into the category directory, all on background tasks.
pub mod catalog;
pub mod orchestrator;
pub mod probe;
pub mod progress;
pub mod workers;

pub use orchestrator::{DownloadHandle, DownloadOrchestrator};
pub use storegame_shared::config::DownloaderConfig;
pub use storegame_shared::models::{DownloadEvent, DownloadRequest, TerminalEvent};
