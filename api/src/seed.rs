//! Development dataset
//!
//! Two schools and three principals with live sessions, for local runs and
//! router tests.

use crate::ApiState;
use campus_common::{Clock, TenantId};
use campus_tenant::{LifecycleError, NewTenant, PlanTier, Principal, Session, TenantRole};
use chrono::Duration;

/// Seeded login
#[derive(Debug, Clone)]
pub struct DemoLogin {
    /// Role label
    pub label: &'static str,
    /// Bearer token
    pub token: String,
}

/// Seeded ids and logins
#[derive(Debug, Clone)]
pub struct DemoSeed {
    /// Standard-plan school
    pub northside: TenantId,
    /// Starter-plan school
    pub southbank: TenantId,
    /// Teacher at Northside only
    pub teacher: DemoLogin,
    /// Admin at both schools
    pub admin: DemoLogin,
    /// Platform operator, no memberships
    pub operator: DemoLogin,
}

/// Onboard the demo schools and log in the demo principals
pub fn seed_demo(state: &ApiState, clock: &dyn Clock) -> Result<DemoSeed, LifecycleError> {
    let northside = state
        .registry
        .onboard(NewTenant {
            name: "Northside Academy".into(),
            slug: "northside".into(),
            plan: PlanTier::Standard,
        })?
        .id;
    let southbank = state
        .registry
        .onboard(NewTenant {
            name: "Southbank School".into(),
            slug: "southbank".into(),
            plan: PlanTier::Starter,
        })?
        .id;

    let login = |label: &'static str, principal: Principal| {
        let token = format!("demo-{}-{}", label, principal.id);
        state.sessions.insert(Session {
            token: token.clone(),
            principal_id: principal.id,
            expires_at: clock.now() + Duration::hours(12),
            tenant_preference: None,
        });
        state.directory.upsert(principal);
        DemoLogin { label, token }
    };

    let teacher = login("teacher", Principal::new("Tess Teacher").member_of(northside, TenantRole::Teacher));
    let admin = login(
        "admin",
        Principal::new("Ada Admin")
            .member_of(northside, TenantRole::Admin)
            .member_of(southbank, TenantRole::Admin),
    );
    let operator = login("operator", Principal::new("Olu Operator").platform_super());

    Ok(DemoSeed {
        northside,
        southbank,
        teacher,
        admin,
        operator,
    })
}
