//! Tenant-scoped data access
//!
//! [`ScopedTable`] is the data-access contract for tenant-owned records:
//! every read and write takes a [`TenantScope`], and the tenant predicate is
//! applied inside the table, not by the caller. A record owned by another
//! tenant is indistinguishable from a missing one.
//!
//! Tables that share a [`TenantFence`] stop accepting new records for a
//! tenant once the fence is closed for it, which is how a tenant is
//! retired before deletion while requests admitted earlier are still
//! running.

use crate::context::TenantScope;
use campus_common::{GateError, TenantId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

/// Scoped access failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// No such record in scope
    #[error("record not found")]
    NotFound,

    /// Record would belong to another tenant
    #[error("record belongs to a different tenant than the scope")]
    TenantMismatch,

    /// Record id already taken
    #[error("record id already exists")]
    Duplicate,

    /// Rejected by the caller's conflict check
    #[error("a conflicting record already exists")]
    Conflict,

    /// Tenant is retired and takes no new records
    #[error("tenant no longer accepts new records")]
    TenantClosed,
}

impl From<ScopeError> for GateError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::NotFound => GateError::NotFound,
            ScopeError::TenantMismatch => GateError::Forbidden("record outside tenant scope".into()),
            ScopeError::Duplicate => GateError::InvalidRequest("record already exists".into()),
            ScopeError::Conflict => GateError::InvalidRequest("conflicting record exists".into()),
            ScopeError::TenantClosed => GateError::TenantSuspended,
        }
    }
}

/// A record owned by exactly one tenant
pub trait TenantOwned: Clone + Send + Sync {
    /// Key type
    type Id: Copy + Eq + Hash + Send + Sync;

    /// Primary key
    fn id(&self) -> Self::Id;

    /// Owning tenant
    fn tenant_id(&self) -> TenantId;
}

/// Tenants closed to new records, shared by the tables of one store
#[derive(Debug, Default)]
pub struct TenantFence {
    closed: RwLock<HashSet<TenantId>>,
}

impl TenantFence {
    /// No tenant closed
    pub fn new() -> Self {
        Self::default()
    }

    /// Close `tenant_id` if `dependents` counts no records.
    ///
    /// Inserts hold the fence for reading, so while the count runs no
    /// insert for any tenant is in flight. Returns the count when it is
    /// non-zero and leaves the tenant open.
    pub fn close_if_empty(&self, tenant_id: TenantId, dependents: impl FnOnce() -> u64) -> Result<(), u64> {
        let mut closed = self.closed.write();
        match dependents() {
            0 => {
                closed.insert(tenant_id);
                Ok(())
            }
            count => Err(count),
        }
    }

    /// Accept records for `tenant_id` again
    pub fn reopen(&self, tenant_id: TenantId) {
        self.closed.write().remove(&tenant_id);
    }

    /// Closed to new records
    pub fn is_closed(&self, tenant_id: TenantId) -> bool {
        self.closed.read().contains(&tenant_id)
    }
}

/// In-memory table of tenant-owned records
pub struct ScopedTable<T: TenantOwned> {
    rows: RwLock<HashMap<T::Id, T>>,
    fence: Arc<TenantFence>,
}

impl<T: TenantOwned> std::fmt::Debug for ScopedTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTable")
            .field("rows", &self.rows.read().len())
            .finish()
    }
}

impl<T: TenantOwned> Default for ScopedTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TenantOwned> ScopedTable<T> {
    /// Table with a fence of its own
    pub fn new() -> Self {
        Self::with_fence(Arc::new(TenantFence::new()))
    }

    /// Table sharing `fence` with other tables of the same store
    pub fn with_fence(fence: Arc<TenantFence>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            fence,
        }
    }

    /// Insert a record owned by the scope's tenant
    pub fn insert(&self, scope: &TenantScope, record: T) -> Result<T, ScopeError> {
        if !scope.owns(record.tenant_id()) {
            return Err(ScopeError::TenantMismatch);
        }
        let closed = self.fence.closed.read();
        if closed.contains(&scope.tenant_id()) {
            return Err(ScopeError::TenantClosed);
        }
        let mut rows = self.rows.write();
        if rows.contains_key(&record.id()) {
            return Err(ScopeError::Duplicate);
        }
        rows.insert(record.id(), record.clone());
        Ok(record)
    }

    /// Insert `record` under the in-scope parent it links to.
    ///
    /// The parent lookup, the `conflicts` check against the parent's other
    /// children and the insert happen under one set of locks, so neither a
    /// removal of the parent nor a conflicting insert can land in between.
    pub fn insert_child<P: TenantOwned>(
        &self,
        scope: &TenantScope,
        parents: &ScopedTable<P>,
        link: impl Fn(&T) -> P::Id,
        record: T,
        conflicts: impl Fn(&T, &T) -> bool,
    ) -> Result<T, ScopeError> {
        if !scope.owns(record.tenant_id()) {
            return Err(ScopeError::TenantMismatch);
        }
        let closed = self.fence.closed.read();
        if closed.contains(&scope.tenant_id()) {
            return Err(ScopeError::TenantClosed);
        }

        let parent_id = link(&record);
        let parent_rows = parents.rows.read();
        let parent_in_scope = parent_rows
            .get(&parent_id)
            .is_some_and(|parent| scope.owns(parent.tenant_id()));
        if !parent_in_scope {
            return Err(ScopeError::NotFound);
        }

        let mut rows = self.rows.write();
        if rows.contains_key(&record.id()) {
            return Err(ScopeError::Duplicate);
        }
        let conflict = rows
            .values()
            .any(|row| scope.owns(row.tenant_id()) && link(row) == parent_id && conflicts(row, &record));
        if conflict {
            return Err(ScopeError::Conflict);
        }
        rows.insert(record.id(), record.clone());
        Ok(record)
    }

    /// Record by id; foreign records read as missing
    pub fn get(&self, scope: &TenantScope, id: T::Id) -> Option<T> {
        self.rows
            .read()
            .get(&id)
            .filter(|row| scope.owns(row.tenant_id()))
            .cloned()
    }

    /// All records in scope
    pub fn list(&self, scope: &TenantScope) -> Vec<T> {
        self.list_where(scope, |_| true)
    }

    /// Records in scope matching `predicate`
    pub fn list_where(&self, scope: &TenantScope, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows
            .read()
            .values()
            .filter(|row| scope.owns(row.tenant_id()) && predicate(row))
            .cloned()
            .collect()
    }

    /// Apply `change` to an in-scope record. The change may not move the
    /// record to another tenant or alter its id.
    pub fn update(&self, scope: &TenantScope, id: T::Id, change: impl FnOnce(&mut T)) -> Result<T, ScopeError> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(&id)
            .filter(|row| scope.owns(row.tenant_id()))
            .ok_or(ScopeError::NotFound)?;

        let mut updated = row.clone();
        change(&mut updated);
        if updated.id() != id || !scope.owns(updated.tenant_id()) {
            return Err(ScopeError::TenantMismatch);
        }
        *row = updated.clone();
        Ok(updated)
    }

    /// Remove an in-scope record
    pub fn remove(&self, scope: &TenantScope, id: T::Id) -> Result<T, ScopeError> {
        let mut rows = self.rows.write();
        let owned = rows.get(&id).is_some_and(|row| scope.owns(row.tenant_id()));
        if !owned {
            return Err(ScopeError::NotFound);
        }
        rows.remove(&id).ok_or(ScopeError::NotFound)
    }

    /// Remove an in-scope record together with its children in one step.
    /// Both tables stay locked throughout, so no child can be added to the
    /// record while it is being removed.
    pub fn remove_with_children<C: TenantOwned>(
        &self,
        scope: &TenantScope,
        id: T::Id,
        children: &ScopedTable<C>,
        link: impl Fn(&C) -> T::Id,
    ) -> Result<(T, Vec<C>), ScopeError> {
        let mut rows = self.rows.write();
        let owned = rows.get(&id).is_some_and(|row| scope.owns(row.tenant_id()));
        if !owned {
            return Err(ScopeError::NotFound);
        }

        let mut child_rows = children.rows.write();
        let child_ids: Vec<C::Id> = child_rows
            .values()
            .filter(|child| scope.owns(child.tenant_id()) && link(child) == id)
            .map(|child| child.id())
            .collect();
        let removed_children = child_ids
            .into_iter()
            .filter_map(|child_id| child_rows.remove(&child_id))
            .collect();

        let parent = rows.remove(&id).ok_or(ScopeError::NotFound)?;
        Ok((parent, removed_children))
    }

    /// Records of `parent` reached through `link`. The parent is looked up
    /// under the same scope first, so a foreign parent id yields `NotFound`
    /// rather than an empty list.
    pub fn children_of<P: TenantOwned>(
        &self,
        scope: &TenantScope,
        parents: &ScopedTable<P>,
        parent_id: P::Id,
        link: impl Fn(&T) -> P::Id,
    ) -> Result<Vec<T>, ScopeError> {
        let parent = parents.get(scope, parent_id).ok_or(ScopeError::NotFound)?;
        Ok(self.list_where(scope, |row| link(row) == parent.id()))
    }

    /// Count of rows owned by `tenant_id`, for lifecycle dependency checks.
    /// Returns no row data.
    pub fn count_owned_by(&self, tenant_id: TenantId) -> u64 {
        self.rows
            .read()
            .values()
            .filter(|row| row.tenant_id() == tenant_id)
            .count() as u64
    }
}
