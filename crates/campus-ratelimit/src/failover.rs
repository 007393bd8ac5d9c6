//! Degraded-mode failover
//!
//! Wraps the distributed store with a bounded timeout. When it fails or
//! times out, decisions come from the local store instead and the request
//! proceeds. The outage is logged once when it starts and once when it
//! ends; while it lasts the primary is only re-probed every `retry_after`.

use crate::store::{Backend, StoreError, WindowStore};
use crate::window::{WindowHit, WindowPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Failover tuning
#[derive(Debug, Clone, Copy)]
pub struct FailoverConfig {
    /// Upper bound on one primary call
    pub backend_timeout: std::time::Duration,
    /// How long to stay on the fallback before probing the primary again
    pub retry_after: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            backend_timeout: std::time::Duration::from_millis(50),
            retry_after: Duration::seconds(5),
        }
    }
}

#[derive(Debug, Default)]
struct OutageState {
    degraded: bool,
    next_probe: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
}

/// Distributed store with transparent local fallback
pub struct FailoverStore {
    primary: Arc<dyn WindowStore>,
    fallback: Arc<dyn WindowStore>,
    config: FailoverConfig,
    state: Mutex<OutageState>,
    episodes: AtomicU64,
}

impl FailoverStore {
    /// Wrap `primary`, falling back to `fallback` on error or timeout
    pub fn new(
        primary: Arc<dyn WindowStore>,
        fallback: Arc<dyn WindowStore>,
        config: FailoverConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            config,
            state: Mutex::new(OutageState::default()),
            episodes: AtomicU64::new(0),
        }
    }

    /// Currently serving from the fallback
    pub fn is_degraded(&self) -> bool {
        self.state.lock().degraded
    }

    /// Number of distinct outages seen since start
    pub fn outage_episodes(&self) -> u64 {
        self.episodes.load(Ordering::Relaxed)
    }

    /// While degraded, the first caller past `next_probe` claims the probe
    /// by pushing `next_probe` forward; everyone else stays on the fallback.
    fn should_try_primary(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if !state.degraded {
            return true;
        }
        if state.next_probe.is_some_and(|next_probe| now < next_probe) {
            return false;
        }
        state.next_probe = Some(now + self.config.retry_after);
        true
    }

    fn mark_outage(&self, err: &StoreError, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.next_probe = Some(now + self.config.retry_after);
        if state.degraded {
            tracing::debug!(error = %err, "rate-limit backend still unavailable");
            return;
        }
        state.degraded = true;
        state.started_at = Some(now);
        self.episodes.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            error = %err,
            fallback = self.fallback.kind().as_str(),
            "rate-limit backend unavailable, serving from local store"
        );
    }

    fn mark_healthy(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        if !state.degraded {
            return;
        }
        let outage_ms = state
            .started_at
            .map(|start| (now - start).num_milliseconds())
            .unwrap_or_default();
        *state = OutageState::default();
        tracing::info!(outage_ms, "rate-limit backend recovered");
    }
}

#[async_trait]
impl WindowStore for FailoverStore {
    async fn hit(
        &self,
        key: &str,
        policy: &WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<WindowHit, StoreError> {
        if self.should_try_primary(now) {
            let timeout_ms = self.config.backend_timeout.as_millis() as u64;
            let outcome =
                tokio::time::timeout(self.config.backend_timeout, self.primary.hit(key, policy, now))
                    .await
                    .unwrap_or(Err(StoreError::Timeout(timeout_ms)));

            match outcome {
                Ok(hit) => {
                    self.mark_healthy(now);
                    return Ok(hit);
                }
                Err(err) => self.mark_outage(&err, now),
            }
        }

        let mut hit = self.fallback.hit(key, policy, now).await?;
        hit.backend = Backend::Local;
        Ok(hit)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        // the primary expires its own keys
        self.fallback.purge_expired(now).await
    }

    fn kind(&self) -> Backend {
        self.primary.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWindowStore;
    use std::sync::atomic::AtomicBool;

    /// Shared store stand-in that can be switched off or made to hang
    struct FlakyStore {
        inner: MemoryWindowStore,
        down: AtomicBool,
        hang: AtomicBool,
        calls: AtomicU64,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryWindowStore::new(),
                down: AtomicBool::new(false),
                hang: AtomicBool::new(false),
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl WindowStore for FlakyStore {
        async fn hit(
            &self,
            key: &str,
            policy: &WindowPolicy,
            now: DateTime<Utc>,
        ) -> Result<WindowHit, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            let mut hit = self.inner.hit_now(key, policy, now);
            hit.backend = Backend::Distributed;
            Ok(hit)
        }

        fn kind(&self) -> Backend {
            Backend::Distributed
        }
    }

    fn failover(primary: Arc<FlakyStore>) -> FailoverStore {
        FailoverStore::new(
            primary,
            Arc::new(MemoryWindowStore::new()),
            FailoverConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_healthy_primary_serves() {
        let primary = Arc::new(FlakyStore::new());
        let store = failover(primary.clone());

        let hit = store.hit("k", &WindowPolicy::default(), Utc::now()).await.unwrap();
        assert_eq!(hit.backend, Backend::Distributed);
        assert!(!store.is_degraded());
    }

    #[tokio::test]
    async fn test_outage_falls_back_and_counts_one_episode() {
        let primary = Arc::new(FlakyStore::new());
        primary.down.store(true, Ordering::SeqCst);
        let store = failover(primary.clone());
        let now = Utc::now();

        for _ in 0..5 {
            let hit = store.hit("k", &WindowPolicy::default(), now).await.unwrap();
            assert!(hit.admitted);
            assert_eq!(hit.backend, Backend::Local);
        }

        assert!(store.is_degraded());
        assert_eq!(store.outage_episodes(), 1);
        // within retry_after the primary is not hammered
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovery_after_retry_window() {
        let primary = Arc::new(FlakyStore::new());
        primary.down.store(true, Ordering::SeqCst);
        let store = failover(primary.clone());
        let start = Utc::now();

        store.hit("k", &WindowPolicy::default(), start).await.unwrap();
        primary.down.store(false, Ordering::SeqCst);

        let hit = store
            .hit("k", &WindowPolicy::default(), start + Duration::seconds(6))
            .await
            .unwrap();
        assert_eq!(hit.backend, Backend::Distributed);
        assert!(!store.is_degraded());

        primary.down.store(true, Ordering::SeqCst);
        store
            .hit("k", &WindowPolicy::default(), start + Duration::seconds(7))
            .await
            .unwrap();
        assert_eq!(store.outage_episodes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_primary_is_bounded_by_timeout() {
        let primary = Arc::new(FlakyStore::new());
        primary.hang.store(true, Ordering::SeqCst);
        let store = failover(primary.clone());

        let hit = store.hit("k", &WindowPolicy::default(), Utc::now()).await.unwrap();
        assert!(hit.admitted);
        assert_eq!(hit.backend, Backend::Local);
        assert!(store.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_caller_probes_while_degraded() {
        let primary = Arc::new(FlakyStore::new());
        primary.down.store(true, Ordering::SeqCst);
        let store = failover(primary.clone());
        let start = Utc::now();
        store.hit("k", &WindowPolicy::default(), start).await.unwrap();

        // due for a probe; the primary now hangs until the timeout
        primary.hang.store(true, Ordering::SeqCst);
        let due = start + Duration::seconds(6);
        let policy = WindowPolicy::default();
        let (a, b, c) = tokio::join!(
            store.hit("k", &policy, due),
            store.hit("k", &policy, due),
            store.hit("k", &policy, due),
        );
        for hit in [a, b, c] {
            assert_eq!(hit.unwrap().backend, Backend::Local);
        }
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.outage_episodes(), 1);
    }
}
