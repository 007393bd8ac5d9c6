//! Principal directory and session store
//!
//! Credential issuance happens elsewhere; these stores only answer "who is
//! behind this token" and "which tenants may they act in".

use crate::model::{Principal, TenantMembership};
use async_trait::async_trait;
use campus_common::{PrincipalId, TenantId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lookup of principals and their memberships
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Principal by id, if known
    async fn principal(&self, id: PrincipalId) -> Option<Principal>;
}

/// In-memory principal directory
#[derive(Debug, Default)]
pub struct InMemoryPrincipalDirectory {
    principals: RwLock<HashMap<PrincipalId, Principal>>,
}

impl InMemoryPrincipalDirectory {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id
    pub fn upsert(&self, principal: Principal) {
        self.principals.write().insert(principal.id, principal);
    }

    /// Add or replace the membership for (principal, tenant).
    /// Returns false when the principal is unknown.
    pub fn set_membership(&self, membership: TenantMembership) -> bool {
        let mut principals = self.principals.write();
        let Some(principal) = principals.get_mut(&membership.principal_id) else {
            return false;
        };
        principal
            .memberships
            .retain(|m| m.tenant_id != membership.tenant_id);
        principal.memberships.push(membership);
        true
    }

    /// Deactivate a membership without deleting it
    pub fn deactivate_membership(&self, principal_id: PrincipalId, tenant_id: TenantId) -> bool {
        let mut principals = self.principals.write();
        principals
            .get_mut(&principal_id)
            .and_then(|p| p.memberships.iter_mut().find(|m| m.tenant_id == tenant_id))
            .map(|m| m.active = false)
            .is_some()
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryPrincipalDirectory {
    async fn principal(&self, id: PrincipalId) -> Option<Principal> {
        self.principals.read().get(&id).cloned()
    }
}

/// Authenticated session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque bearer token
    pub token: String,
    /// Authenticated principal
    pub principal_id: PrincipalId,
    /// Hard expiry
    pub expires_at: DateTime<Utc>,
    /// Tenant chosen earlier via tenant selection
    pub tenant_preference: Option<TenantId>,
}

impl Session {
    /// Expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Session lookup by opaque token
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Live session for `token`; expired sessions are treated as absent
    async fn session(&self, token: &str, now: DateTime<Utc>) -> Option<Session>;

    /// Store the tenant preference. Returns false when the session is gone.
    async fn set_tenant_preference(&self, token: &str, tenant_id: TenantId) -> bool;
}

/// In-memory session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by token
    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.token.clone(), session);
    }

    /// Drop a session; `false` if it was unknown
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn session(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        let session = self.sessions.get(token)?.clone();
        if session.is_expired(now) {
            self.sessions.remove(token);
            return None;
        }
        Some(session)
    }

    async fn set_tenant_preference(&self, token: &str, tenant_id: TenantId) -> bool {
        match self.sessions.get_mut(token) {
            Some(mut session) => {
                session.tenant_preference = Some(tenant_id);
                true
            }
            None => false,
        }
    }
}
