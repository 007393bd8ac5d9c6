//! Monthly usage accounting
//!
//! Counts consumption per (tenant, billing period, resource) and reports it
//! against the tenant's plan. The accountant never blocks anything itself;
//! callers decide whether an exhausted quota is a hard stop or a warning.

use crate::plan::{BillingPeriod, Resource};
use crate::registry::TenantRegistry;
use async_trait::async_trait;
use campus_common::{Clock, GateError, GateResult, TenantId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Usage for one tenant, period and resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    /// Tenant
    pub tenant_id: TenantId,
    /// Month counted
    pub period: BillingPeriod,
    /// Resource counted
    pub resource: Resource,
    /// Units consumed
    pub used: u64,
    /// Effective monthly limit
    pub limit: u64,
}

/// Answer to [`UsageAccountant::check_quota`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    /// `used < limit`: one more unit may be consumed
    pub within_limit: bool,
    /// Committed units this period
    pub used: u64,
    /// Effective monthly limit
    pub limit: u64,
}

impl QuotaStatus {
    /// Units left before the limit
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}

/// What to do when a quota is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaPolicy {
    /// Refuse the operation
    #[default]
    HardBlock,
    /// Run the operation and log a warning
    SoftWarn,
}

/// Key of one usage row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsageKey {
    /// Tenant
    pub tenant_id: TenantId,
    /// Month
    pub period: BillingPeriod,
    /// Resource
    pub resource: Resource,
}

/// Result of [`UsageStore::try_reserve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Units are held as pending
    Held,
    /// `used + pending + units` would pass the limit
    Exhausted {
        /// Committed usage at the time of the attempt
        used: u64,
    },
}

/// Persistence for usage rows
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Add `amount` and return the new total. With an idempotency key, a
    /// repeated call for the same row returns the total unchanged and
    /// `false`.
    async fn add(&self, key: UsageKey, amount: u64, idempotency_key: Option<&str>) -> GateResult<(u64, bool)>;

    /// Committed usage; pending reservations are not included
    async fn used(&self, key: UsageKey) -> GateResult<u64>;

    /// Hold `units` against `limit`, counting units already held by other
    /// callers. Check and hold are one atomic step.
    async fn try_reserve(&self, key: UsageKey, units: u64, limit: u64) -> GateResult<Reservation>;

    /// Move held units into `used` and return the new total
    async fn commit(&self, key: UsageKey, units: u64) -> GateResult<u64>;

    /// Give held units back. Called from `Drop`, so it cannot wait.
    fn release(&self, key: UsageKey, units: u64);
}

#[derive(Debug, Default)]
struct UsageRow {
    used: u64,
    pending: u64,
    applied: HashSet<String>,
}

/// DashMap-backed usage store
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    rows: DashMap<UsageKey, UsageRow>,
}

impl InMemoryUsageStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn add(&self, key: UsageKey, amount: u64, idempotency_key: Option<&str>) -> GateResult<(u64, bool)> {
        let mut row = self.rows.entry(key).or_default();
        if let Some(idem) = idempotency_key {
            if !row.applied.insert(idem.to_string()) {
                return Ok((row.used, false));
            }
        }
        row.used = row.used.saturating_add(amount);
        Ok((row.used, true))
    }

    async fn used(&self, key: UsageKey) -> GateResult<u64> {
        Ok(self.rows.get(&key).map(|row| row.used).unwrap_or(0))
    }

    async fn try_reserve(&self, key: UsageKey, units: u64, limit: u64) -> GateResult<Reservation> {
        let mut row = self.rows.entry(key).or_default();
        if row.used.saturating_add(row.pending).saturating_add(units) > limit {
            return Ok(Reservation::Exhausted { used: row.used });
        }
        row.pending += units;
        Ok(Reservation::Held)
    }

    async fn commit(&self, key: UsageKey, units: u64) -> GateResult<u64> {
        let mut row = self.rows.entry(key).or_default();
        row.pending = row.pending.saturating_sub(units);
        row.used = row.used.saturating_add(units);
        Ok(row.used)
    }

    fn release(&self, key: UsageKey, units: u64) {
        if let Some(mut row) = self.rows.get_mut(&key) {
            row.pending = row.pending.saturating_sub(units);
        }
    }
}

/// Units held by [`UsageAccountant::reserve`].
///
/// [`commit`](Self::commit) after the operation succeeded; dropping it
/// instead (error, cancellation) releases the units.
#[must_use = "an unsettled reservation is released on drop"]
pub struct QuotaReservation {
    store: Arc<dyn UsageStore>,
    key: UsageKey,
    units: u64,
    limit: u64,
    settled: bool,
}

impl std::fmt::Debug for QuotaReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaReservation")
            .field("key", &self.key)
            .field("units", &self.units)
            .field("settled", &self.settled)
            .finish()
    }
}

impl QuotaReservation {
    /// Record the held units as consumed
    pub async fn commit(mut self) -> GateResult<UsageCounter> {
        let used = self.store.commit(self.key, self.units).await?;
        self.settled = true;
        Ok(UsageCounter {
            tenant_id: self.key.tenant_id,
            period: self.key.period,
            resource: self.key.resource,
            used,
            limit: self.limit,
        })
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        if !self.settled {
            self.store.release(self.key, self.units);
            tracing::debug!(
                tenant = %self.key.tenant_id,
                resource = self.key.resource.as_str(),
                units = self.units,
                "quota reservation released"
            );
        }
    }
}

/// Tracks monthly consumption against plan quotas
pub struct UsageAccountant {
    store: Arc<dyn UsageStore>,
    registry: Arc<TenantRegistry>,
    clock: Arc<dyn Clock>,
}

impl UsageAccountant {
    /// Accountant over `store`, taking limits from `registry`
    pub fn new(store: Arc<dyn UsageStore>, registry: Arc<TenantRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { store, registry, clock }
    }

    /// Record `amount` units of completed consumption
    pub async fn increment(&self, tenant_id: TenantId, resource: Resource, amount: u64) -> GateResult<UsageCounter> {
        self.record(tenant_id, resource, amount, None).await
    }

    /// Like [`increment`](Self::increment), but a replay with the same key is
    /// ignored within the billing period
    pub async fn increment_once(
        &self,
        tenant_id: TenantId,
        resource: Resource,
        amount: u64,
        idempotency_key: &str,
    ) -> GateResult<UsageCounter> {
        if idempotency_key.trim().is_empty() {
            return Err(GateError::InvalidRequest("idempotency key is empty".into()));
        }
        self.record(tenant_id, resource, amount, Some(idempotency_key)).await
    }

    /// Committed usage against the limit for the current period
    pub async fn check_quota(&self, tenant_id: TenantId, resource: Resource) -> GateResult<QuotaStatus> {
        let (key, limit) = self.row(tenant_id, resource)?;
        let used = self.store.used(key).await?;
        Ok(QuotaStatus {
            within_limit: used < limit,
            used,
            limit,
        })
    }

    /// Hold `units` for an operation that must not pass the limit.
    ///
    /// Fails with [`GateError::QuotaExceeded`] when committed usage plus
    /// other callers' reservations leave no room.
    pub async fn reserve(&self, tenant_id: TenantId, resource: Resource, units: u64) -> GateResult<QuotaReservation> {
        let (key, limit) = self.row(tenant_id, resource)?;
        match self.store.try_reserve(key, units, limit).await? {
            Reservation::Held => Ok(QuotaReservation {
                store: self.store.clone(),
                key,
                units,
                limit,
                settled: false,
            }),
            Reservation::Exhausted { used } => Err(GateError::QuotaExceeded {
                resource: resource.as_str().to_string(),
                used,
                limit,
            }),
        }
    }

    async fn record(
        &self,
        tenant_id: TenantId,
        resource: Resource,
        amount: u64,
        idempotency_key: Option<&str>,
    ) -> GateResult<UsageCounter> {
        let (key, limit) = self.row(tenant_id, resource)?;
        let (used, applied) = self.store.add(key, amount, idempotency_key).await?;
        if !applied {
            tracing::debug!(tenant = %tenant_id, resource = resource.as_str(), "usage replay ignored");
        } else if used > limit {
            tracing::warn!(tenant = %tenant_id, resource = resource.as_str(), used, limit, "usage above plan limit");
        }
        Ok(UsageCounter {
            tenant_id,
            period: key.period,
            resource,
            used,
            limit,
        })
    }

    fn row(&self, tenant_id: TenantId, resource: Resource) -> GateResult<(UsageKey, u64)> {
        let tenant = self.registry.get(tenant_id).ok_or(GateError::NotFound)?;
        let key = UsageKey {
            tenant_id,
            period: BillingPeriod::containing(self.clock.now()),
            resource,
        };
        Ok((key, tenant.monthly_limit(resource)))
    }
}
