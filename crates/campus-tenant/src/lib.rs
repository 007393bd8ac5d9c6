//! Campus Gate tenancy
//!
//! Who a principal is, which schools they may act in, which school a given
//! request acts in, and how much of its monthly plan that school has used.
//!
//! ```text
//! Session ──► PrincipalDirectory ──► TenantResolver ──► ResolvedTenant
//!                                         │
//!                                         ├── TenantRegistry (status, plan)
//!                                         └── BypassAudit (super overrides)
//!
//! UsageAccountant ──► UsageStore (tenant, period, resource)
//!        └── TenantRegistry (plan limits, overrides)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod directory;
pub mod model;
pub mod plan;
pub mod registry;
pub mod resolver;
pub mod usage;

pub use audit::{BypassAudit, BypassEvent, MemoryBypassAudit, TracingBypassAudit, AUDIT_TARGET};
pub use directory::{InMemoryPrincipalDirectory, InMemorySessionStore, PrincipalDirectory, Session, SessionStore};
pub use model::{PlatformRole, Principal, Tenant, TenantMembership, TenantRole, TenantStatus};
pub use plan::{BillingPeriod, PlanTier, Resource};
pub use registry::{DependencyProbe, LifecycleError, NewTenant, NoDependencies, TenantRegistry};
pub use resolver::{ResolutionPath, ResolvedTenant, TenantOverride, TenantResolver, TenantSelection};
pub use usage::{
    InMemoryUsageStore, QuotaPolicy, QuotaReservation, QuotaStatus, Reservation, UsageAccountant, UsageCounter, UsageKey,
    UsageStore,
};
