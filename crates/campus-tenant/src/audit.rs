//! Audit trail for platform-super tenant overrides

use campus_common::{PrincipalId, TenantId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Log target for audited bypasses
pub const AUDIT_TARGET: &str = "campusgate::audit";

/// One audited override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassEvent {
    /// Request that used the override
    pub request_id: Uuid,
    /// Operator behind it
    pub principal_id: PrincipalId,
    /// Tenant acted in
    pub tenant_id: TenantId,
    /// Audit reason as given
    pub reason: String,
    /// When the override was resolved
    pub at: DateTime<Utc>,
}

/// Sink for override events
pub trait BypassAudit: Send + Sync {
    /// Persist one event; must not fail the request
    fn record(&self, event: &BypassEvent);
}

/// Emits events on the audit log target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBypassAudit;

impl BypassAudit for TracingBypassAudit {
    fn record(&self, event: &BypassEvent) {
        tracing::warn!(
            target: AUDIT_TARGET,
            request_id = %event.request_id,
            principal = %event.principal_id,
            tenant = %event.tenant_id,
            reason = %event.reason,
            "platform-super tenant override"
        );
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryBypassAudit {
    events: Mutex<Vec<BypassEvent>>,
}

impl MemoryBypassAudit {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far, oldest first
    pub fn events(&self) -> Vec<BypassEvent> {
        self.events.lock().clone()
    }
}

impl BypassAudit for MemoryBypassAudit {
    fn record(&self, event: &BypassEvent) {
        self.events.lock().push(event.clone());
    }
}
