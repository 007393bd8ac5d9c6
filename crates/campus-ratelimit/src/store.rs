//! Window store interface
//!
//! The limiter never touches shared state directly. Stores are injected,
//! and each implementation owns the atomicity of its check-and-increment.

use crate::window::{WindowHit, WindowPolicy};
use async_trait::async_trait;
use campus_common::GateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of store produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Shared across service instances
    Distributed,
    /// Local to this process (degraded mode when used as fallback)
    Local,
}

impl Backend {
    /// Label for logs and headers
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Distributed => "distributed",
            Self::Local => "local",
        }
    }
}

/// Store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connection refused or dropped
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// No reply within the bound, in milliseconds
    #[error("store call timed out after {0}ms")]
    Timeout(u64),

    /// Reply did not have the expected shape
    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

impl From<StoreError> for GateError {
    fn from(err: StoreError) -> Self {
        GateError::BackendUnavailable(err.to_string())
    }
}

/// Storage for rate windows
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically open-or-reuse the window for `key` and attempt one admission.
    ///
    /// Concurrent callers sharing a key must never be admitted more than
    /// `policy.limit` times per window.
    async fn hit(
        &self,
        key: &str,
        policy: &WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<WindowHit, StoreError>;

    /// Drop windows that expired before `now`; returns how many were removed.
    /// Stores with native expiry can rely on the default.
    async fn purge_expired(&self, _now: DateTime<Utc>) -> usize {
        0
    }

    /// Kind of store this is
    fn kind(&self) -> Backend;
}
