//! Rate windows
//!
//! A [`RateWindow`] is one fixed time bucket for one identity key. It is
//! opened by the first request for the key and replaced once
//! `now - window_start >= window`.

use crate::store::Backend;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Limit and window length applied to a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPolicy {
    /// Max admitted requests per window
    pub limit: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl WindowPolicy {
    /// Build a policy
    pub const fn new(limit: u64, window_ms: u64) -> Self {
        Self { limit, window_ms }
    }

    /// Window length as a chrono duration
    pub fn window(&self) -> Duration {
        Duration::milliseconds(self.window_ms.min(i64::MAX as u64) as i64)
    }
}

impl Default for WindowPolicy {
    /// 100 requests per 10 seconds
    fn default() -> Self {
        Self::new(100, 10_000)
    }
}

/// One fixed window for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    /// Identity and endpoint class the window counts for
    pub identity_key: String,
    /// Start of the current window
    pub window_start: DateTime<Utc>,
    /// Admitted requests so far
    pub count: u64,
    /// Ceiling
    pub limit: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl RateWindow {
    /// Open an empty window starting at `now`
    pub fn open(identity_key: &str, now: DateTime<Utc>, policy: &WindowPolicy) -> Self {
        Self {
            identity_key: identity_key.to_string(),
            window_start: now,
            count: 0,
            limit: policy.limit,
            window_ms: policy.window_ms,
        }
    }

    /// Instant this window stops counting
    pub fn reset_at(&self) -> DateTime<Utc> {
        self.window_start + WindowPolicy::new(self.limit, self.window_ms).window()
    }

    /// `now - window_start >= window`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at()
    }

    /// Conditional increment. The count only moves for admitted requests,
    /// so it stays within `0..=limit`.
    pub fn try_admit(&mut self) -> bool {
        if self.count < self.limit {
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// Snapshot of the outcome of the last admission attempt
    pub fn hit(&self, admitted: bool) -> WindowHit {
        WindowHit {
            admitted,
            backend: Backend::Local,
            count: self.count,
            limit: self.limit,
            window_start: self.window_start,
            reset_at: self.reset_at(),
        }
    }
}

/// Result of one admission attempt against a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Request counted and allowed
    pub admitted: bool,
    /// Store kind that made the decision
    pub backend: Backend,
    /// Admitted requests in the window after this attempt
    pub count: u64,
    /// Window ceiling
    pub limit: u64,
    /// Start of the window that decided
    pub window_start: DateTime<Utc>,
    /// When that window ends
    pub reset_at: DateTime<Utc>,
}

impl WindowHit {
    /// Requests still admissible in this window
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_expiry_boundary() {
        let start = Utc::now();
        let window = RateWindow::open("ip:203.0.113.9", start, &WindowPolicy::new(5, 10_000));

        assert!(!window.is_expired(start + Duration::milliseconds(9_999)));
        assert!(window.is_expired(start + Duration::milliseconds(10_000)));
    }

    #[test]
    fn test_count_never_exceeds_limit() {
        let mut window = RateWindow::open("k", Utc::now(), &WindowPolicy::new(3, 1_000));
        let admitted = (0..10).filter(|_| window.try_admit()).count();

        assert_eq!(admitted, 3);
        assert_eq!(window.count, 3);
        assert_eq!(window.hit(false).remaining(), 0);
    }
}
