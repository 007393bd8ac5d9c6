//! Campus Gate - request gatekeeping for multi-tenant school management
//!
//! Protected operations never see a request directly. They receive an
//! [`AuthorizationContext`] built by the [`Gatekeeper`] after the request
//! was classified, rate limited, authenticated and bound to exactly one
//! tenant, and they reach tenant-owned data only through a
//! [`ScopedTable`] that demands the context's [`TenantScope`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Gatekeeper                          │
//! │  RequestClassifier → RateLimiter → Session → TenantResolver │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │ AuthorizationContext
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    protected operation                      │
//! │   ScopedTable<T>(&TenantScope)    UsageAccountant (quota)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classifier;
pub mod config;
pub mod context;
pub mod gatekeeper;
pub mod scope;

pub use classifier::{Classification, ExemptReason, ProbeVerifier, RequestClassifier, PROBE_HEADER};
pub use config::{ConfigError, Environment, GatekeeperConfig};
pub use context::{AuthorizationContext, TenantScope};
pub use gatekeeper::{Admission, Gatekeeper, Rejection, OVERRIDE_HEADER, OVERRIDE_REASON_HEADER, TENANT_HEADER};
pub use scope::{ScopeError, ScopedTable, TenantFence, TenantOwned};
