//! Tenant resolution
//!
//! Order of precedence:
//! 1. platform-super override (audited, reason required)
//! 2. explicit tenant on the request
//! 3. tenant preference stored on the session
//! 4. the single active membership
//!
//! A selected tenant that is not an active membership is an error. Several
//! active memberships with no selection is an error. Nothing falls back to
//! a default tenant.

use crate::audit::{BypassAudit, BypassEvent};
use crate::model::{Principal, TenantRole};
use crate::registry::TenantRegistry;
use campus_common::{Clock, GateError, GateResult, PrincipalId, ResolutionFailure, TenantId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Audited per-request override by a platform-super principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantOverride {
    /// Target tenant
    pub tenant_id: TenantId,
    /// Audit reason; must not be blank
    pub reason: String,
    /// Request the override applies to
    pub request_id: Uuid,
}

/// Tenant hints carried by a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantSelection {
    /// `x-tenant-id` header
    pub explicit: Option<TenantId>,
    /// Tenant stored on the session
    pub session_preference: Option<TenantId>,
    /// Platform-super override
    pub override_: Option<TenantOverride>,
}

/// How the tenant was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    /// Only one active membership
    SingleMembership,
    /// Selected on the request
    Explicit,
    /// Selected earlier on the session
    SessionPreference,
    /// Audited override
    SuperOverride,
}

/// Resolution outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTenant {
    /// Resolved tenant
    pub tenant_id: TenantId,
    /// Acting principal
    pub principal_id: PrincipalId,
    /// Role in the tenant
    pub role: TenantRole,
    /// How it was chosen
    pub path: ResolutionPath,
}

/// Resolves the active tenant for a principal
pub struct TenantResolver {
    registry: Arc<TenantRegistry>,
    audit: Arc<dyn BypassAudit>,
    clock: Arc<dyn Clock>,
}

impl TenantResolver {
    /// Resolver over `registry`, auditing overrides to `audit`
    pub fn new(registry: Arc<TenantRegistry>, audit: Arc<dyn BypassAudit>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, audit, clock }
    }

    /// Registry used for status checks
    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    /// Bind `principal` to exactly one tenant
    pub fn resolve(&self, principal: &Principal, selection: &TenantSelection) -> GateResult<ResolvedTenant> {
        if let Some(bypass) = &selection.override_ {
            return self.resolve_override(principal, bypass);
        }

        let (chosen, path) = match (selection.explicit, selection.session_preference) {
            (Some(tenant), _) => (Some(tenant), ResolutionPath::Explicit),
            (None, Some(tenant)) => (Some(tenant), ResolutionPath::SessionPreference),
            (None, None) => (None, ResolutionPath::SingleMembership),
        };

        let membership = match chosen {
            Some(tenant_id) => principal
                .active_membership_in(tenant_id)
                .ok_or(GateError::TenantNotResolved(ResolutionFailure::NotAMember))?,
            None => {
                let mut active = principal.active_memberships();
                match (active.next(), active.next()) {
                    (Some(only), None) => only,
                    (None, _) => {
                        return Err(GateError::TenantNotResolved(ResolutionFailure::NoActiveMembership))
                    }
                    (Some(_), Some(_)) => {
                        return Err(GateError::TenantNotResolved(ResolutionFailure::Ambiguous))
                    }
                }
            }
        };

        self.ensure_serving(membership.tenant_id)?;
        tracing::debug!(
            principal = %principal.id,
            tenant = %membership.tenant_id,
            role = membership.role.as_str(),
            ?path,
            "tenant resolved"
        );
        Ok(ResolvedTenant {
            tenant_id: membership.tenant_id,
            principal_id: principal.id,
            role: membership.role,
            path,
        })
    }

    fn resolve_override(&self, principal: &Principal, bypass: &TenantOverride) -> GateResult<ResolvedTenant> {
        if !principal.is_platform_super() {
            tracing::warn!(principal = %principal.id, "tenant override refused for non-super principal");
            return Err(GateError::TenantNotResolved(ResolutionFailure::OverrideNotPermitted));
        }
        let reason = bypass.reason.trim();
        if reason.is_empty() {
            return Err(GateError::TenantNotResolved(ResolutionFailure::OverrideReasonMissing));
        }
        self.ensure_serving(bypass.tenant_id)?;

        self.audit.record(&BypassEvent {
            request_id: bypass.request_id,
            principal_id: principal.id,
            tenant_id: bypass.tenant_id,
            reason: reason.to_string(),
            at: self.clock.now(),
        });

        Ok(ResolvedTenant {
            tenant_id: bypass.tenant_id,
            principal_id: principal.id,
            role: TenantRole::Operator,
            path: ResolutionPath::SuperOverride,
        })
    }

    /// Tenant exists and is not suspended
    fn ensure_serving(&self, tenant_id: TenantId) -> GateResult<()> {
        let tenant = self
            .registry
            .get(tenant_id)
            .ok_or(GateError::TenantNotResolved(ResolutionFailure::UnknownTenant))?;
        if tenant.is_suspended() {
            return Err(GateError::TenantSuspended);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryBypassAudit;
    use crate::plan::PlanTier;
    use crate::registry::{NewTenant, NoDependencies};
    use campus_common::ManualClock;

    struct Fixture {
        resolver: TenantResolver,
        audit: Arc<MemoryBypassAudit>,
        a: TenantId,
        b: TenantId,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = Arc::new(TenantRegistry::new(Arc::new(NoDependencies), clock.clone()));
        let onboard = |slug: &str| {
            registry
                .onboard(NewTenant {
                    name: slug.to_uppercase(),
                    slug: slug.into(),
                    plan: PlanTier::Standard,
                })
                .unwrap()
                .id
        };
        let a = onboard("alpha");
        let b = onboard("beta");
        let audit = Arc::new(MemoryBypassAudit::new());
        Fixture {
            resolver: TenantResolver::new(registry, audit.clone(), clock),
            audit,
            a,
            b,
        }
    }

    fn not_resolved(result: GateResult<ResolvedTenant>) -> ResolutionFailure {
        match result {
            Err(GateError::TenantNotResolved(failure)) => failure,
            other => panic!("expected TenantNotResolved, got {:?}", other),
        }
    }

    #[test]
    fn test_single_membership_auto_resolves() {
        let f = fixture();
        let principal = Principal::new("t").member_of(f.a, TenantRole::Teacher);

        let resolved = f.resolver.resolve(&principal, &TenantSelection::default()).unwrap();
        assert_eq!(resolved.tenant_id, f.a);
        assert_eq!(resolved.role, TenantRole::Teacher);
        assert_eq!(resolved.path, ResolutionPath::SingleMembership);
    }

    #[test]
    fn test_multiple_memberships_require_selection() {
        let f = fixture();
        let principal = Principal::new("t")
            .member_of(f.a, TenantRole::Teacher)
            .member_of(f.b, TenantRole::Admin);

        assert_eq!(
            not_resolved(f.resolver.resolve(&principal, &TenantSelection::default())),
            ResolutionFailure::Ambiguous
        );

        let by_session = TenantSelection {
            session_preference: Some(f.b),
            ..Default::default()
        };
        let resolved = f.resolver.resolve(&principal, &by_session).unwrap();
        assert_eq!(resolved.tenant_id, f.b);
        assert_eq!(resolved.path, ResolutionPath::SessionPreference);

        // explicit beats the stored preference
        let explicit = TenantSelection {
            explicit: Some(f.a),
            ..by_session
        };
        assert_eq!(f.resolver.resolve(&principal, &explicit).unwrap().tenant_id, f.a);
    }

    #[test]
    fn test_selection_outside_memberships_is_rejected() {
        let f = fixture();
        let principal = Principal::new("t").member_of(f.a, TenantRole::Teacher);
        let selection = TenantSelection {
            explicit: Some(f.b),
            ..Default::default()
        };
        assert_eq!(
            not_resolved(f.resolver.resolve(&principal, &selection)),
            ResolutionFailure::NotAMember
        );

        let nobody = Principal::new("n");
        assert_eq!(
            not_resolved(f.resolver.resolve(&nobody, &TenantSelection::default())),
            ResolutionFailure::NoActiveMembership
        );
    }

    #[test]
    fn test_suspended_tenant_is_rejected() {
        let f = fixture();
        f.resolver.registry().suspend(f.a).unwrap();
        let principal = Principal::new("t").member_of(f.a, TenantRole::Teacher);
        assert!(matches!(
            f.resolver.resolve(&principal, &TenantSelection::default()),
            Err(GateError::TenantSuspended)
        ));
    }

    #[test]
    fn test_override_is_audited_and_restricted() {
        let f = fixture();
        let bypass = TenantOverride {
            tenant_id: f.b,
            reason: "  support ticket 4411 ".into(),
            request_id: Uuid::new_v4(),
        };
        let selection = TenantSelection {
            override_: Some(bypass.clone()),
            ..Default::default()
        };

        let plain = Principal::new("p").member_of(f.a, TenantRole::Admin);
        assert_eq!(
            not_resolved(f.resolver.resolve(&plain, &selection)),
            ResolutionFailure::OverrideNotPermitted
        );

        let operator = Principal::new("ops").platform_super();
        let resolved = f.resolver.resolve(&operator, &selection).unwrap();
        assert_eq!(resolved.tenant_id, f.b);
        assert_eq!(resolved.role, TenantRole::Operator);

        let events = f.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "support ticket 4411");
        assert_eq!(events[0].request_id, bypass.request_id);

        let no_reason = TenantSelection {
            override_: Some(TenantOverride {
                reason: "   ".into(),
                ..bypass
            }),
            ..Default::default()
        };
        assert_eq!(
            not_resolved(f.resolver.resolve(&operator, &no_reason)),
            ResolutionFailure::OverrideReasonMissing
        );
        assert_eq!(f.audit.events().len(), 1);
    }

    #[test]
    fn test_super_without_override_resolves_normally() {
        let f = fixture();
        let operator = Principal::new("ops").platform_super();
        assert_eq!(
            not_resolved(f.resolver.resolve(&operator, &TenantSelection::default())),
            ResolutionFailure::NoActiveMembership
        );
    }
}
