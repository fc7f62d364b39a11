//! Sync progress broadcaster for real-time run status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::RunCounters;

/// Phase of a sync run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Started,
    PageCompleted,
    ChunkCompleted,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Started => write!(f, "Started"),
            SyncPhase::PageCompleted => write!(f, "Page completed"),
            SyncPhase::ChunkCompleted => write!(f, "Chunk completed"),
            SyncPhase::Paused => write!(f, "Paused"),
            SyncPhase::Completed => write!(f, "Completed"),
            SyncPhase::Failed => write!(f, "Failed"),
            SyncPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Progress event for a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgressEvent {
    pub run_id: String,
    pub business_id: String,
    pub phase: SyncPhase,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Counters as of this event.
    pub counters: RunCounters,
    pub timestamp: DateTime<Utc>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncProgressEvent {
    pub fn new(
        run_id: &str,
        business_id: &str,
        phase: SyncPhase,
        message: &str,
        counters: RunCounters,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            business_id: business_id.to_string(),
            phase,
            message: message.to_string(),
            counters,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(run_id: &str, business_id: &str, counters: RunCounters, error: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            business_id: business_id.to_string(),
            phase: SyncPhase::Failed,
            message: "Sync run failed".to_string(),
            counters,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
        }
    }
}

/// Broadcasts sync progress events for streaming.
#[derive(Clone)]
pub struct SyncProgressBroadcaster {
    sender: Arc<broadcast::Sender<SyncProgressEvent>>,
}

impl SyncProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: SyncProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for SyncProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
