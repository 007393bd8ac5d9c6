//! In-process window store
//!
//! Consistent within one process only. Used on its own for single-instance
//! deployments and as the degraded-mode fallback behind [`FailoverStore`].
//!
//! [`FailoverStore`]: crate::failover::FailoverStore

use crate::store::{Backend, StoreError, WindowStore};
use crate::window::{RateWindow, WindowHit, WindowPolicy};
use async_trait::async_trait;
use campus_common::Clock;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// DashMap-backed window store
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, RateWindow>,
}

impl MemoryWindowStore {
    /// Empty store
    pub fn new() -> Self {
        Self { windows: DashMap::new() }
    }

    /// Live window count (expired-but-unswept windows included)
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// No live windows
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Current window for a key, if any
    pub fn window(&self, key: &str) -> Option<RateWindow> {
        self.windows.get(key).map(|w| w.clone())
    }

    /// Synchronous core of [`WindowStore::hit`].
    ///
    /// The entry guard holds the shard lock for the whole
    /// expire-check / increment / snapshot sequence, which is what makes the
    /// check-and-increment atomic per key.
    pub fn hit_now(&self, key: &str, policy: &WindowPolicy, now: DateTime<Utc>) -> WindowHit {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow::open(key, now, policy));

        let window = entry.value_mut();
        if window.is_expired(now) {
            *window = RateWindow::open(key, now, policy);
        }

        let admitted = window.try_admit();
        window.hit(admitted)
    }

    /// Remove expired windows
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now));
        before.saturating_sub(self.windows.len())
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn hit(
        &self,
        key: &str,
        policy: &WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<WindowHit, StoreError> {
        Ok(self.hit_now(key, policy, now))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.sweep(now)
    }

    fn kind(&self) -> Backend {
        Backend::Local
    }
}

/// Periodically purge expired windows to bound memory
pub fn spawn_sweeper(
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = store.purge_expired(clock.now()).await;
            if removed > 0 {
                tracing::debug!(removed, "purged expired rate windows");
            }
        }
    })
}
