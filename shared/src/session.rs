/// Transfer session bookkeeping.
///
/// Tracks the active session per item plus append-only completed/failed
/// lists. All of it sits behind one mutex so readers never see a session
/// that is half-moved between the active map and a result list.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::RequestError;
use crate::models::{Outcome, OutcomeRecord};

/// Run-state of one in-flight transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub session_id: Uuid,
    pub item: String,
    pub category: String,
    /// 0-100, or [`crate::models::FAILED_PERCENT`] once the transfer has failed.
    pub percent: i32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    /// Token held by the background task that owns this session.
    pub cancel: CancellationToken,
}

impl TransferSession {
    pub fn short_id(&self) -> String {
        self.session_id.to_string().chars().take(8).collect()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    active: HashMap<String, TransferSession>,
    completed: Vec<OutcomeRecord>,
    failed: Vec<OutcomeRecord>,
}

/// Shared registry of transfer sessions, cheap to clone into background tasks.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active session. Fails if the item is already active.
    pub async fn begin(&self, item: &str, category: &str) -> Result<TransferSession, RequestError> {
        let mut state = self.state.lock().await;
        if state.active.contains_key(item) {
            warn!("Download for {} already active, rejecting", item);
            return Err(RequestError::AlreadyActive(item.to_string()));
        }

        let session = TransferSession {
            session_id: Uuid::new_v4(),
            item: item.to_string(),
            category: category.to_string(),
            percent: 0,
            status: String::new(),
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        };
        state.active.insert(item.to_string(), session.clone());

        info!("Session {} started for {} ({})", session.short_id(), item, category);
        Ok(session)
    }

    /// Record progress for an active session.
    pub async fn update_progress(&self, item: &str, percent: i32, status: &str) {
        if let Some(session) = self.state.lock().await.active.get_mut(item) {
            session.percent = percent;
            session.status = status.to_string();
        }
    }

    /// Close the active session and append its outcome record.
    ///
    /// Returns `None` if no session was active for `item`.
    pub async fn finish(
        &self,
        item: &str,
        outcome: Outcome,
        detail: Option<String>,
    ) -> Option<OutcomeRecord> {
        let mut state = self.state.lock().await;
        let session = state.active.remove(item)?;
        let record = OutcomeRecord {
            session_id: session.session_id,
            item: session.item,
            category: session.category,
            outcome,
            detail,
            started_at: session.started_at,
            finished_at: Utc::now(),
        };

        match outcome {
            Outcome::Succeeded => {
                info!("Session for {} completed", item);
                state.completed.push(record.clone());
            }
            Outcome::Failed => {
                warn!("Session for {} failed: {:?}", item, record.detail);
                state.failed.push(record.clone());
            }
        }
        Some(record)
    }

    /// Request cancellation of an active session. Returns false if none is active.
    pub async fn cancel(&self, item: &str) -> bool {
        let state = self.state.lock().await;
        match state.active.get(item) {
            Some(session) => {
                session.cancel.cancel();
                info!("Cancellation requested for {}", item);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the active session for `item`.
    pub async fn session(&self, item: &str) -> Option<TransferSession> {
        self.state.lock().await.active.get(item).cloned()
    }

    pub async fn is_active(&self, item: &str) -> bool {
        self.state.lock().await.active.contains_key(item)
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active.len()
    }

    pub async fn completed_count(&self) -> usize {
        self.state.lock().await.completed.len()
    }

    pub async fn failed_count(&self) -> usize {
        self.state.lock().await.failed.len()
    }

    pub async fn completed(&self) -> Vec<OutcomeRecord> {
        self.state.lock().await.completed.clone()
    }

    pub async fn failed(&self) -> Vec<OutcomeRecord> {
        self.state.lock().await.failed.clone()
    }

    /// Get registry statistics.
    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.lock().await;
        RegistryStats {
            active: state.active.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            active_items: state.active.keys().cloned().collect(),
        }
    }
}

/// Registry statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub active_items: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FAILED_PERCENT;

    #[tokio::test]
    async fn test_begin_and_duplicate() {
        let registry = SessionRegistry::new();
        assert!(registry.begin("Game.zip", "NES").await.is_ok());
        assert_eq!(
            registry.begin("Game.zip", "NES").await.unwrap_err(),
            RequestError::AlreadyActive("Game.zip".into())
        );
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_finish_moves_to_completed() {
        let registry = SessionRegistry::new();
        registry.begin("Game.zip", "NES").await.unwrap();
        registry.update_progress("Game.zip", 57, "Downloading... 57%").await;
        assert_eq!(registry.session("Game.zip").await.unwrap().percent, 57);

        let record = registry.finish("Game.zip", Outcome::Succeeded, None).await.unwrap();
        assert_eq!(record.category, "NES");
        assert_eq!(registry.active_count().await, 0);
        assert_eq!(registry.completed_count().await, 1);
        assert_eq!(registry.failed_count().await, 0);

        // Item may be requested again once finished
        assert!(registry.begin("Game.zip", "NES").await.is_ok());
    }

    #[tokio::test]
    async fn test_finish_failed() {
        let registry = SessionRegistry::new();
        registry.begin("Bad.zip", "SNES").await.unwrap();
        registry.update_progress("Bad.zip", FAILED_PERCENT, "Download failed").await;
        assert_eq!(registry.session("Bad.zip").await.unwrap().percent, FAILED_PERCENT);

        registry
            .finish("Bad.zip", Outcome::Failed, Some("exit code 1".into()))
            .await;
        let failed = registry.failed().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].detail.as_deref(), Some("exit code 1"));
        assert!(registry.completed().await.is_empty());
    }

    #[tokio::test]
    async fn test_finish_unknown_item() {
        let registry = SessionRegistry::new();
        assert!(registry.finish("nope.zip", Outcome::Failed, None).await.is_none());
        assert_eq!(registry.failed_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_triggers_token() {
        let registry = SessionRegistry::new();
        let session = registry.begin("Game.zip", "NES").await.unwrap();
        assert!(!session.cancel.is_cancelled());
        assert!(registry.cancel("Game.zip").await);
        assert!(session.cancel.is_cancelled());
        assert!(!registry.cancel("Other.zip").await);
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = SessionRegistry::new();
        registry.begin("a.zip", "NES").await.unwrap();
        registry.begin("b.zip", "NES").await.unwrap();
        registry.finish("b.zip", Outcome::Failed, None).await;

        let stats = registry.stats().await;
        assert_eq!(stats.active, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active_items, vec!["a.zip".to_string()]);
    }
}
