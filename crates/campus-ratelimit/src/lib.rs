//! Campus Gate rate limiting
//!
//! Fixed-window, per-identity admission control with a shared backend and
//! an in-process fallback.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       RateLimiter                        │
//! │   identity (proxy headers) + endpoint class → policy     │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ hit(key, policy, now)
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                      FailoverStore                       │
//! │         bounded timeout, outage episode tracking         │
//! └───────────────┬──────────────────────────┬───────────────┘
//!                 │ healthy                  │ degraded
//!                 ▼                          ▼
//!        ┌──────────────────┐       ┌───────────────────┐
//!        │ RedisWindowStore │       │ MemoryWindowStore │
//!        │  (Lua, atomic)   │       │ (DashMap, swept)  │
//!        └──────────────────┘       └───────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod failover;
pub mod identity;
pub mod limiter;
pub mod memory;
pub mod redis_store;
pub mod store;
pub mod window;

pub use failover::{FailoverConfig, FailoverStore};
pub use identity::{client_address, client_identity, is_public, IdentityKey, DEFAULT_PROXY_HEADERS};
pub use limiter::{path_has_prefix, EndpointClass, RateDecision, RateLimiter, RateLimiterConfig};
pub use memory::{spawn_sweeper, MemoryWindowStore};
pub use redis_store::RedisWindowStore;
pub use store::{Backend, StoreError, WindowStore};
pub use window::{RateWindow, WindowHit, WindowPolicy};
