//! Error types for campusgate
//!
//! `Display` output is for logs. Anything shown to an end user goes through
//! [`GateError::public_message`], which never carries tenant ids, principal
//! ids or backend addresses.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a tenant could not be resolved for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionFailure {
    /// Principal has no active membership at all
    NoActiveMembership,
    /// Several active memberships and no explicit selection
    Ambiguous,
    /// Selected tenant is not one of the principal's active memberships
    NotAMember,
    /// Selected tenant does not exist
    UnknownTenant,
    /// Override requested by a principal without platform-super role
    OverrideNotPermitted,
    /// Override requested without an audit reason
    OverrideReasonMissing,
    /// Request was classified exempt and carries no tenant context
    ExemptRequest,
}

impl ResolutionFailure {
    /// Stable label for logs and audit records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoActiveMembership => "no_active_membership",
            Self::Ambiguous => "ambiguous_membership",
            Self::NotAMember => "not_a_member",
            Self::UnknownTenant => "unknown_tenant",
            Self::OverrideNotPermitted => "override_not_permitted",
            Self::OverrideReasonMissing => "override_reason_missing",
            Self::ExemptRequest => "exempt_request",
        }
    }
}

/// campusgate error type
#[derive(Error, Debug, Clone)]
pub enum GateError {
    /// Per-identity request window exhausted
    #[error("rate limit exceeded (limit {limit}, retry after {retry_after_secs}s)")]
    RateLimited {
        /// Window ceiling
        limit: u64,
        /// Seconds until the window resets
        retry_after_secs: u64,
        /// Instant the window resets
        reset_at: DateTime<Utc>,
    },

    /// No valid session on the request
    #[error("unauthenticated")]
    Unauthenticated,

    /// Tenant could not be determined
    #[error("tenant not resolved: {}", .0.as_str())]
    TenantNotResolved(ResolutionFailure),

    /// Resolved tenant is suspended
    #[error("tenant suspended")]
    TenantSuspended,

    /// Authenticated but not allowed to perform the action
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Shared rate-limit store unreachable
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Monthly usage cap hit
    #[error("quota exceeded for {resource}: {used}/{limit}")]
    QuotaExceeded {
        /// Resource label
        resource: String,
        /// Units consumed this period
        used: u64,
        /// Period cap
        limit: u64,
    },

    /// Record missing (or owned by another tenant, indistinguishably)
    #[error("not found")]
    NotFound,

    /// Invalid caller input
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Unauthenticated => "unauthenticated",
            Self::TenantNotResolved(_) => "tenant_not_resolved",
            Self::TenantSuspended => "tenant_suspended",
            Self::Forbidden(_) => "forbidden",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::NotFound => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show an end user
    pub fn public_message(&self) -> String {
        match self {
            Self::RateLimited { retry_after_secs, .. } => {
                format!("Too many requests. Retry in {} seconds.", retry_after_secs)
            }
            Self::Unauthenticated => "Sign in to continue.".into(),
            Self::TenantNotResolved(ResolutionFailure::Ambiguous) => {
                "Select a school before continuing.".into()
            }
            Self::TenantNotResolved(_) => "No accessible school for this request.".into(),
            Self::TenantSuspended => "This school account is suspended.".into(),
            Self::Forbidden(_) => "You do not have access to this action.".into(),
            // recovered internally; if it ever escapes, do not describe the topology
            Self::BackendUnavailable(_) => "Service temporarily unavailable.".into(),
            Self::QuotaExceeded { resource, .. } => {
                format!("Monthly {} allowance reached for this school.", resource)
            }
            Self::NotFound => "Not found.".into(),
            Self::InvalidRequest(reason) => reason.clone(),
            Self::Internal(_) => "Internal error.".into(),
        }
    }

    /// True for failures that must stop a request before any data access
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated
                | Self::TenantNotResolved(_)
                | Self::TenantSuspended
                | Self::Forbidden(_)
        )
    }
}

/// Result type for campusgate
pub type GateResult<T> = Result<T, GateError>;
