//! Mutual exclusion for sync runs.
//!
//! One business may have at most one executing run. The trait is the seam
//! for a shared backend when the engine runs on more than one host; the
//! bundled implementation covers the single-process case.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::warn;
use tokio::sync::Mutex;

use crate::error::LockError;

/// Lease-based lock. Leases expire so a crashed holder cannot block a
/// business forever.
#[async_trait]
pub trait RunLock: Send + Sync {
    /// Attempts to take the lease. Returns `false` when another holder has
    /// a live lease on the key.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError>;

    async fn release(&self, key: &str) -> Result<(), LockError>;
}

/// In-process lock table keyed by lease deadline.
#[derive(Default)]
pub struct LocalLock {
    leases: Mutex<HashMap<String, Instant>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLock for LocalLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();

        if let Some(expires_at) = leases.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
            warn!("Taking over expired lease for {}", key);
        }

        leases.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<(), LockError> {
        self.leases.lock().await.remove(key);
        Ok(())
    }
}
