//! Tenant registry
//!
//! Tenants are created at onboarding, mutated by plan changes and status
//! transitions, and only deleted once nothing depends on them.
//!
//! Deletion needs a suspended tenant, which stops new admissions. The
//! dependency probe then retires it: the dependency count and the refusal
//! of further records are one step, so a request admitted before the
//! suspension cannot add a record after the count.

use crate::model::{Tenant, TenantStatus};
use crate::plan::{PlanTier, Resource};
use async_trait::async_trait;
use campus_common::{Clock, GateError, TenantId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Lifecycle failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// No tenant with that id
    #[error("tenant not found")]
    NotFound,

    /// Another tenant uses the slug
    #[error("slug already in use: {0}")]
    SlugTaken(String),

    /// Name or slug rejected
    #[error("invalid tenant field: {0}")]
    Invalid(String),

    /// Transition to the current status
    #[error("tenant is already {}", .0.as_str())]
    AlreadyInStatus(TenantStatus),

    /// Records still reference the tenant
    #[error("tenant still has {0} dependent records")]
    HasDependents(u64),

    /// Delete of a tenant that is not suspended
    #[error("tenant must be suspended before it is deleted")]
    NotSuspended,
}

impl From<LifecycleError> for GateError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound => GateError::NotFound,
            LifecycleError::HasDependents(_) => {
                GateError::Forbidden("tenant still has dependent records".into())
            }
            other => GateError::InvalidRequest(other.to_string()),
        }
    }
}

/// Counts records that still reference a tenant
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Records that reference `tenant_id`
    async fn dependent_records(&self, tenant_id: TenantId) -> u64;

    /// Stop accepting records for `tenant_id` if none exist. Returns the
    /// dependent count otherwise. Stores that can add records concurrently
    /// must make the count and the refusal atomic.
    async fn retire(&self, tenant_id: TenantId) -> Result<(), u64> {
        match self.dependent_records(tenant_id).await {
            0 => Ok(()),
            count => Err(count),
        }
    }

    /// Undo [`retire`](Self::retire) when the delete did not go ahead
    async fn restore(&self, _tenant_id: TenantId) {}
}

/// Probe for deployments with no tenant-owned storage
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependencies;

#[async_trait]
impl DependencyProbe for NoDependencies {
    async fn dependent_records(&self, _tenant_id: TenantId) -> u64 {
        0
    }
}

/// Onboarding request
#[derive(Debug, Clone)]
pub struct NewTenant {
    /// Display name
    pub name: String,
    /// Url-safe handle, lowercased on onboarding
    pub slug: String,
    /// Initial tier
    pub plan: PlanTier,
}

/// In-memory tenant registry
pub struct TenantRegistry {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
    probe: Arc<dyn DependencyProbe>,
    clock: Arc<dyn Clock>,
}

impl TenantRegistry {
    /// Empty registry
    pub fn new(probe: Arc<dyn DependencyProbe>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            probe,
            clock,
        }
    }

    /// Create an active tenant
    pub fn onboard(&self, new: NewTenant) -> Result<Tenant, LifecycleError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(LifecycleError::Invalid("name is empty".into()));
        }
        let slug = new.slug.trim().to_ascii_lowercase();
        if slug.is_empty() || !slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(LifecycleError::Invalid("slug must be alphanumeric with hyphens".into()));
        }

        let mut tenants = self.tenants.write();
        if tenants.values().any(|t| t.slug == slug) {
            return Err(LifecycleError::SlugTaken(slug));
        }

        let now = self.clock.now();
        let tenant = Tenant {
            id: TenantId::new(),
            name: name.to_string(),
            slug,
            status: TenantStatus::Active,
            plan: new.plan,
            quota_overrides: HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        tenants.insert(tenant.id, tenant.clone());
        tracing::info!(tenant = %tenant.id, plan = tenant.plan.as_str(), "tenant onboarded");
        Ok(tenant)
    }

    /// Tenant by id
    pub fn get(&self, id: TenantId) -> Option<Tenant> {
        self.tenants.read().get(&id).cloned()
    }

    /// All tenants, by slug
    pub fn list(&self) -> Vec<Tenant> {
        let mut tenants: Vec<_> = self.tenants.read().values().cloned().collect();
        tenants.sort_by(|a, b| a.slug.cmp(&b.slug));
        tenants
    }

    /// Move to another tier; overrides are kept
    pub fn change_plan(&self, id: TenantId, plan: PlanTier) -> Result<Tenant, LifecycleError> {
        let tenant = self.update(id, |tenant| {
            tenant.plan = plan;
            Ok(())
        })?;
        tracing::info!(tenant = %id, plan = plan.as_str(), "tenant plan changed");
        Ok(tenant)
    }

    /// Replace (or with `None`, clear) the monthly limit override for a resource
    pub fn set_quota_override(
        &self,
        id: TenantId,
        resource: Resource,
        limit: Option<u64>,
    ) -> Result<Tenant, LifecycleError> {
        self.update(id, |tenant| {
            match limit {
                Some(limit) => tenant.quota_overrides.insert(resource, limit),
                None => tenant.quota_overrides.remove(&resource),
            };
            Ok(())
        })
    }

    /// Refuse all further requests for the tenant
    pub fn suspend(&self, id: TenantId) -> Result<Tenant, LifecycleError> {
        self.transition(id, TenantStatus::Suspended)
    }

    /// Admit requests again
    pub fn reactivate(&self, id: TenantId) -> Result<Tenant, LifecycleError> {
        self.transition(id, TenantStatus::Active)
    }

    /// Hard delete of a suspended tenant, refused while dependent records
    /// exist
    pub async fn delete(&self, id: TenantId) -> Result<(), LifecycleError> {
        let tenant = self.get(id).ok_or(LifecycleError::NotFound)?;
        if !tenant.is_suspended() {
            return Err(LifecycleError::NotSuspended);
        }

        // probe outside the lock
        self.probe.retire(id).await.map_err(LifecycleError::HasDependents)?;

        let removed = {
            let mut tenants = self.tenants.write();
            match tenants.get(&id).map(Tenant::is_suspended) {
                Some(true) => {
                    tenants.remove(&id);
                    Ok(())
                }
                // reactivated while the probe ran
                Some(false) => Err(LifecycleError::NotSuspended),
                None => Err(LifecycleError::NotFound),
            }
        };
        if let Err(err) = removed {
            self.probe.restore(id).await;
            return Err(err);
        }

        tracing::info!(tenant = %id, "tenant deleted");
        Ok(())
    }

    fn transition(&self, id: TenantId, to: TenantStatus) -> Result<Tenant, LifecycleError> {
        let tenant = self.update(id, |tenant| {
            if tenant.status == to {
                return Err(LifecycleError::AlreadyInStatus(to));
            }
            tenant.status = to;
            Ok(())
        })?;
        tracing::info!(tenant = %id, status = to.as_str(), "tenant status changed");
        Ok(tenant)
    }

    fn update(
        &self,
        id: TenantId,
        apply: impl FnOnce(&mut Tenant) -> Result<(), LifecycleError>,
    ) -> Result<Tenant, LifecycleError> {
        let mut tenants = self.tenants.write();
        let tenant = tenants.get_mut(&id).ok_or(LifecycleError::NotFound)?;
        apply(tenant)?;
        tenant.updated_at = self.clock.now();
        Ok(tenant.clone())
    }
}
