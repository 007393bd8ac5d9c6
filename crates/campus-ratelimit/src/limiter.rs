//! Rate limiter
//!
//! Fixed-window admission control per client identity, optionally scoped
//! per endpoint class. The limiter owns no shared state itself; windows
//! live in the injected [`WindowStore`].

use crate::identity::{client_identity, IdentityKey, DEFAULT_PROXY_HEADERS};
use crate::store::{Backend, WindowStore};
use crate::window::{WindowHit, WindowPolicy};
use campus_common::{Clock, GateError, RequestMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Class used when no endpoint class matches
pub const DEFAULT_CLASS: &str = "default";

/// Named policy for a path prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointClass {
    /// Class label, also part of the window key
    pub name: String,
    /// Segment-aware path prefix
    pub path_prefix: String,
    /// Requests per window
    pub limit: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl EndpointClass {
    /// Window policy of this class
    pub fn policy(&self) -> WindowPolicy {
        WindowPolicy::new(self.limit, self.window_ms)
    }

    fn matches(&self, path: &str) -> bool {
        path_has_prefix(path, &self.path_prefix)
    }
}

/// Segment-aware prefix match: `/api/v1/session` matches
/// `/api/v1/session` and `/api/v1/session/tenant` but not `/api/v1/sessions`.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Policy for paths outside every endpoint class
    pub default_policy: WindowPolicy,
    /// Endpoint classes, longest prefix wins
    pub classes: Vec<EndpointClass>,
    /// Trusted proxy headers, highest precedence first
    pub proxy_headers: Vec<String>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_policy: WindowPolicy::default(),
            classes: Vec::new(),
            proxy_headers: DEFAULT_PROXY_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

/// Outcome of [`RateLimiter::allow`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    /// Request may proceed
    pub allowed: bool,
    /// Window ceiling
    pub limit: u64,
    /// Requests left in the window
    pub remaining: u64,
    /// When the window resets
    pub reset_at: DateTime<Utc>,
    /// Store kind that decided
    pub backend: Backend,
    /// Endpoint class the decision was made under
    pub class: String,
}

impl RateDecision {
    fn from_hit(hit: WindowHit, class: &str) -> Self {
        Self {
            allowed: hit.admitted,
            limit: hit.limit,
            remaining: hit.remaining(),
            reset_at: hit.reset_at,
            backend: hit.backend,
            class: class.to_string(),
        }
    }

    /// `"ok"` or `"blocked"`
    pub fn status(&self) -> &'static str {
        if self.allowed {
            "ok"
        } else {
            "blocked"
        }
    }

    /// Whole seconds until the window resets, at least 1
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let ms = (self.reset_at - now).num_milliseconds().max(0) as u64;
        ms.div_ceil(1000).max(1)
    }

    /// Response headers for gated responses
    pub fn headers(&self, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset_at.timestamp().to_string()),
        ];
        if !self.allowed {
            headers.push(("retry-after", self.retry_after_secs(now).to_string()));
        }
        headers
    }

    /// Error for a blocked decision
    pub fn to_error(&self, now: DateTime<Utc>) -> GateError {
        GateError::RateLimited {
            limit: self.limit,
            retry_after_secs: self.retry_after_secs(now),
            reset_at: self.reset_at,
        }
    }
}

/// Per-identity admission control
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    config: RateLimiterConfig,
    failing_open: AtomicBool,
}

impl RateLimiter {
    /// Limiter over `store`
    pub fn new(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>, config: RateLimiterConfig) -> Self {
        let mut config = config;
        // longest prefix first so the most specific class wins
        config
            .classes
            .sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
        Self {
            store,
            clock,
            config,
            failing_open: AtomicBool::new(false),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Time source used for windows
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Endpoint class and policy for a path
    pub fn class_for(&self, path: &str) -> (&str, WindowPolicy) {
        self.config
            .classes
            .iter()
            .find(|class| class.matches(path))
            .map(|class| (class.name.as_str(), class.policy()))
            .unwrap_or((DEFAULT_CLASS, self.config.default_policy))
    }

    /// Admission check for an identity under the default policy
    pub async fn allow(&self, identity: &IdentityKey) -> RateDecision {
        let policy = self.config.default_policy;
        self.allow_with(identity.as_str(), DEFAULT_CLASS, &policy).await
    }

    /// Admission check for a request: identity from proxy headers, policy
    /// from the endpoint class of its path
    pub async fn allow_for(&self, request: &RequestMeta) -> RateDecision {
        let identity = client_identity(request, &self.config.proxy_headers);
        let (class, policy) = self.class_for(&request.path);
        let key = if class == DEFAULT_CLASS {
            identity.as_str().to_string()
        } else {
            identity.scoped(class)
        };
        let class = class.to_string();
        self.allow_with(&key, &class, &policy).await
    }

    async fn allow_with(&self, key: &str, class: &str, policy: &WindowPolicy) -> RateDecision {
        let now = self.clock.now();
        match self.store.hit(key, policy, now).await {
            Ok(hit) => {
                if self.failing_open.swap(false, Ordering::Relaxed) {
                    tracing::info!("rate-limit store reachable again");
                }
                let decision = RateDecision::from_hit(hit, class);
                if !decision.allowed {
                    tracing::debug!(key, class, limit = decision.limit, "request blocked by rate limit");
                }
                decision
            }
            Err(err) => {
                // a store without local fallback: admit rather than fail the request
                if !self.failing_open.swap(true, Ordering::Relaxed) {
                    tracing::warn!(error = %err, "rate-limit store failed, admitting without limit");
                }
                RateDecision {
                    allowed: true,
                    limit: policy.limit,
                    remaining: policy.limit,
                    reset_at: now + policy.window(),
                    backend: self.store.kind(),
                    class: class.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWindowStore;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use campus_common::ManualClock;
    use chrono::Duration;

    fn limiter(clock: Arc<ManualClock>, config: RateLimiterConfig) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryWindowStore::new()), clock, config)
    }

    #[tokio::test]
    async fn test_105_requests_admit_exactly_100() {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter = limiter(clock.clone(), RateLimiterConfig::default());
        let identity = IdentityKey::from_ip("203.0.113.9".parse().unwrap());

        let mut statuses = Vec::new();
        let mut remaining = Vec::new();
        for _ in 0..105 {
            let decision = limiter.allow(&identity).await;
            statuses.push(decision.status());
            remaining.push(decision.remaining);
        }

        assert_eq!(statuses.iter().filter(|s| **s == "ok").count(), 100);
        assert_eq!(statuses.iter().filter(|s| **s == "blocked").count(), 5);
        assert!(statuses[..100].iter().all(|s| *s == "ok"));

        let expected: Vec<u64> = (0..100).rev().chain(std::iter::repeat(0).take(5)).collect();
        assert_eq!(remaining, expected);
    }

    #[tokio::test]
    async fn test_window_resets_after_duration() {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter = limiter(clock.clone(), RateLimiterConfig::default());
        let identity = IdentityKey::from_ip("203.0.113.9".parse().unwrap());

        for _ in 0..101 {
            limiter.allow(&identity).await;
        }
        let blocked = limiter.allow(&identity).await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.retry_after_secs(clock.now()), 10);

        clock.advance(Duration::seconds(10));
        let decision = limiter.allow(&identity).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 99);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_overshoot() {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter = Arc::new(limiter(clock, RateLimiterConfig::default()));
        let identity = IdentityKey::from_ip("198.51.100.1".parse().unwrap());

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let limiter = limiter.clone();
            let identity = identity.clone();
            tasks.push(tokio::spawn(async move {
                let mut admitted = 0u64;
                for _ in 0..25 {
                    if limiter.allow(&identity).await.allowed {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }

        let mut total = 0;
        for task in tasks {
            total += task.await.unwrap();
        }
        assert_eq!(total, 100);
    }

    #[tokio::test]
    async fn test_endpoint_class_scopes_key() {
        let clock = Arc::new(ManualClock::starting_now());
        let config = RateLimiterConfig {
            classes: vec![EndpointClass {
                name: "session".into(),
                path_prefix: "/api/v1/session".into(),
                limit: 2,
                window_ms: 60_000,
            }],
            ..RateLimiterConfig::default()
        };
        let limiter = limiter(clock, config);
        let login = RequestMeta::new("PUT", "/api/v1/session/tenant")
            .with_header("x-forwarded-for", "203.0.113.9");
        let other = RequestMeta::new("GET", "/api/v1/students")
            .with_header("x-forwarded-for", "203.0.113.9");

        assert!(limiter.allow_for(&login).await.allowed);
        assert!(limiter.allow_for(&login).await.allowed);
        let third = limiter.allow_for(&login).await;
        assert!(!third.allowed);
        assert_eq!(third.class, "session");

        // the default class has its own window
        let decision = limiter.allow_for(&other).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 99);
    }

    #[test]
    fn test_prefix_matching_respects_segments() {
        assert!(path_has_prefix("/api/v1/session", "/api/v1/session"));
        assert!(path_has_prefix("/api/v1/session/tenant", "/api/v1/session/"));
        assert!(!path_has_prefix("/api/v1/sessions", "/api/v1/session"));
    }

    #[test]
    fn test_blocked_headers_carry_retry_after() {
        let now = Utc::now();
        let decision = RateDecision {
            allowed: false,
            limit: 100,
            remaining: 0,
            reset_at: now + Duration::milliseconds(2_500),
            backend: Backend::Local,
            class: DEFAULT_CLASS.into(),
        };
        let headers = decision.headers(now);
        assert!(headers.contains(&("retry-after", "3".to_string())));
        assert!(headers.contains(&("x-ratelimit-remaining", "0".to_string())));
        assert!(matches!(
            decision.to_error(now),
            GateError::RateLimited { retry_after_secs: 3, .. }
        ));
    }

    /// Memory store behind a gate that never opens
    struct StalledStore {
        inner: Arc<MemoryWindowStore>,
    }

    #[async_trait]
    impl WindowStore for StalledStore {
        async fn hit(
            &self,
            key: &str,
            policy: &WindowPolicy,
            now: DateTime<Utc>,
        ) -> Result<WindowHit, StoreError> {
            std::future::pending::<()>().await;
            Ok(self.inner.hit_now(key, policy, now))
        }

        fn kind(&self) -> Backend {
            Backend::Local
        }
    }

    #[tokio::test]
    async fn test_aborted_request_leaves_window_untouched() {
        let inner = Arc::new(MemoryWindowStore::new());
        let limiter = RateLimiter::new(
            Arc::new(StalledStore { inner: inner.clone() }),
            Arc::new(ManualClock::starting_now()),
            RateLimiterConfig::default(),
        );
        let identity = IdentityKey::custom("ip:203.0.113.77");

        let mut pending = tokio_test::task::spawn(limiter.allow(&identity));
        tokio_test::assert_pending!(pending.poll());
        drop(pending);

        assert!(inner.window(identity.as_str()).is_none());
    }

    struct BrokenStore;

    #[async_trait]
    impl WindowStore for BrokenStore {
        async fn hit(
            &self,
            _key: &str,
            _policy: &WindowPolicy,
            _now: DateTime<Utc>,
        ) -> Result<WindowHit, StoreError> {
            Err(StoreError::Timeout(50))
        }

        fn kind(&self) -> Backend {
            Backend::Distributed
        }
    }

    #[tokio::test]
    async fn test_store_failure_never_fails_request() {
        let limiter = RateLimiter::new(
            Arc::new(BrokenStore),
            Arc::new(ManualClock::starting_now()),
            RateLimiterConfig::default(),
        );
        let identity = IdentityKey::unknown();
        for _ in 0..3 {
            tokio_test::assert_ready!(tokio_test::task::spawn(limiter.allow(&identity)).poll());
        }
        assert!(limiter.allow(&identity).await.allowed);
    }
}
