//! School record storage
//!
//! Tenant-owned tables for the HTTP surface. All access goes through
//! [`ScopedTable`]; the only unscoped operations are the dependency count
//! and retirement used before a tenant is deleted.

use crate::models::{AttendanceRecord, Student};
use async_trait::async_trait;
use campus_common::TenantId;
use campus_gate::{ScopedTable, TenantFence};
use campus_tenant::DependencyProbe;
use std::sync::Arc;

/// Students and their attendance marks
#[derive(Debug)]
pub struct SchoolRecords {
    /// Enrolled students
    pub students: ScopedTable<Student>,
    /// Attendance marks, children of `students`
    pub attendance: ScopedTable<AttendanceRecord>,
    fence: Arc<TenantFence>,
}

impl Default for SchoolRecords {
    fn default() -> Self {
        Self::new()
    }
}

impl SchoolRecords {
    /// Empty tables sharing one fence
    pub fn new() -> Self {
        let fence = Arc::new(TenantFence::new());
        Self {
            students: ScopedTable::with_fence(fence.clone()),
            attendance: ScopedTable::with_fence(fence.clone()),
            fence,
        }
    }

    fn owned_by(&self, tenant_id: TenantId) -> u64 {
        self.students.count_owned_by(tenant_id) + self.attendance.count_owned_by(tenant_id)
    }
}

#[async_trait]
impl DependencyProbe for SchoolRecords {
    async fn dependent_records(&self, tenant_id: TenantId) -> u64 {
        self.owned_by(tenant_id)
    }

    async fn retire(&self, tenant_id: TenantId) -> Result<(), u64> {
        self.fence.close_if_empty(tenant_id, || self.owned_by(tenant_id))
    }

    async fn restore(&self, tenant_id: TenantId) {
        self.fence.reopen(tenant_id);
    }
}
