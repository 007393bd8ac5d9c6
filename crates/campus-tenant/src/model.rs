//! Principals, memberships and tenants
//!
//! Principals are global. A principal reaches a tenant only through a
//! [`TenantMembership`]; there is no tenant column on the principal itself.

use crate::plan::{PlanTier, Resource};
use campus_common::{PrincipalId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Platform-level role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRole {
    /// Regular user
    #[default]
    Standard,
    /// May override tenant selection through the audited bypass path
    PlatformSuper,
}

/// Role inside one tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantRole {
    /// Full control of school data
    Admin,
    /// Reads and writes records
    Teacher,
    /// Office staff with write access
    Staff,
    /// Read-only
    Viewer,
    /// Platform operator acting through an audited override
    Operator,
}

impl TenantRole {
    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Staff => "staff",
            Self::Viewer => "viewer",
            Self::Operator => "operator",
        }
    }

    /// Roles allowed to create or modify school records
    pub fn can_write(&self) -> bool {
        matches!(self, Self::Admin | Self::Teacher | Self::Staff | Self::Operator)
    }
}

impl fmt::Display for TenantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link between a principal and a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    /// Member
    pub principal_id: PrincipalId,
    /// School
    pub tenant_id: TenantId,
    /// Role in that school
    pub role: TenantRole,
    /// Inactive memberships are ignored during resolution
    pub active: bool,
}

impl TenantMembership {
    /// Active membership
    pub fn active(principal_id: PrincipalId, tenant_id: TenantId, role: TenantRole) -> Self {
        Self {
            principal_id,
            tenant_id,
            role,
            active: true,
        }
    }
}

/// Authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Global identity
    pub id: PrincipalId,
    /// Name shown in logs and UIs
    pub display_name: String,
    /// Platform-level role
    pub platform_role: PlatformRole,
    /// Schools this principal may act in
    pub memberships: Vec<TenantMembership>,
}

impl Principal {
    /// Standard principal without memberships
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: PrincipalId::new(),
            display_name: display_name.into(),
            platform_role: PlatformRole::Standard,
            memberships: Vec::new(),
        }
    }

    /// Builder: promote to platform-super
    pub fn platform_super(mut self) -> Self {
        self.platform_role = PlatformRole::PlatformSuper;
        self
    }

    /// Builder: add an active membership
    pub fn member_of(mut self, tenant_id: TenantId, role: TenantRole) -> Self {
        self.memberships
            .push(TenantMembership::active(self.id, tenant_id, role));
        self
    }

    /// Holds the platform-super role
    pub fn is_platform_super(&self) -> bool {
        self.platform_role == PlatformRole::PlatformSuper
    }

    /// Active memberships, in insertion order
    pub fn active_memberships(&self) -> impl Iterator<Item = &TenantMembership> {
        self.memberships.iter().filter(|m| m.active)
    }

    /// Active membership in `tenant_id`, if any
    pub fn active_membership_in(&self, tenant_id: TenantId) -> Option<&TenantMembership> {
        self.active_memberships().find(|m| m.tenant_id == tenant_id)
    }
}

/// Tenant lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Admitted normally
    Active,
    /// All requests refused
    Suspended,
}

impl TenantStatus {
    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }
}

/// Isolated customer account (a school)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant id
    pub id: TenantId,
    /// School name
    pub name: String,
    /// Unique, url-safe handle
    pub slug: String,
    /// Lifecycle status
    pub status: TenantStatus,
    /// Subscription tier
    pub plan: PlanTier,
    /// Per-tenant monthly limits that replace the plan default
    pub quota_overrides: HashMap<Resource, u64>,
    /// Onboarding time
    pub created_at: DateTime<Utc>,
    /// Last plan or status change
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Refuses all requests
    pub fn is_suspended(&self) -> bool {
        self.status == TenantStatus::Suspended
    }

    /// Monthly limit for a resource: override first, then the plan
    pub fn monthly_limit(&self, resource: Resource) -> u64 {
        self.quota_overrides
            .get(&resource)
            .copied()
            .unwrap_or_else(|| self.plan.monthly_limit(resource))
    }
}
