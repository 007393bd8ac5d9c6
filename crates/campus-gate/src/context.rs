//! Authorization context
//!
//! Built once per admitted request by the [`Gatekeeper`](crate::Gatekeeper)
//! and immutable afterwards. There is no public constructor: a context, and
//! the [`TenantScope`] derived from it, only exist after rate limiting,
//! authentication and tenant resolution have all succeeded.

use campus_common::{PrincipalId, TenantId};
use campus_ratelimit::RateDecision;
use campus_tenant::{ResolutionPath, ResolvedTenant, TenantRole};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Proof that a tenant was resolved for the current request.
///
/// Every tenant-owned data access takes one of these. It cannot be built
/// from a bare id outside this crate:
///
/// ```compile_fail
/// use campus_gate::TenantScope;
/// let scope = TenantScope { tenant_id: campus_common::TenantId::new() };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantScope {
    tenant_id: TenantId,
}

impl TenantScope {
    pub(crate) fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    /// Tenant this scope grants access to
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Record ownership check
    pub fn owns(&self, tenant_id: TenantId) -> bool {
        self.tenant_id == tenant_id
    }
}

/// Resolved identity, tenant and role for one request
#[derive(Debug, Clone)]
pub struct AuthorizationContext {
    request_id: Uuid,
    method: String,
    path: String,
    resolved: ResolvedTenant,
    rate: RateDecision,
    admitted_at: DateTime<Utc>,
}

impl AuthorizationContext {
    pub(crate) fn new(
        request_id: Uuid,
        method: &str,
        path: &str,
        resolved: ResolvedTenant,
        rate: RateDecision,
        admitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            method: method.to_string(),
            path: path.to_string(),
            resolved,
            rate,
            admitted_at,
        }
    }

    /// Resolved tenant
    pub fn tenant_id(&self) -> TenantId {
        self.resolved.tenant_id
    }

    /// Acting principal
    pub fn principal_id(&self) -> PrincipalId {
        self.resolved.principal_id
    }

    /// Role in the resolved tenant
    pub fn role(&self) -> TenantRole {
        self.resolved.role
    }

    /// How the tenant was chosen
    pub fn resolution(&self) -> ResolutionPath {
        self.resolved.path
    }

    /// Id assigned when the request was read
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// HTTP method
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Full request path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rate decision this request was admitted under
    pub fn rate(&self) -> &RateDecision {
        &self.rate
    }

    /// When admission completed
    pub fn admitted_at(&self) -> DateTime<Utc> {
        self.admitted_at
    }

    /// Scope for tenant-owned data access
    pub fn scope(&self) -> TenantScope {
        TenantScope::new(self.resolved.tenant_id)
    }
}
