//! Gatekeeper
//!
//! The single choke point between a request and a protected operation:
//!
//! ```text
//! classify ──exempt──► Admission::Exempt (no context, no protected ops)
//!    │
//!    ▼
//! RateLimiter::allow_for ──blocked──► RateLimited
//!    │
//!    ▼
//! session ─► principal ──missing──► Unauthenticated
//!    │
//!    ▼
//! TenantResolver::resolve ──fail──► TenantNotResolved / TenantSuspended
//!    │
//!    ▼
//! op(AuthorizationContext)
//! ```
//!
//! Every failure short-circuits before the operation runs.

use crate::classifier::{ExemptReason, RequestClassifier};
use crate::context::AuthorizationContext;
use campus_common::{Clock, GateError, GateResult, RequestMeta, ResolutionFailure, TenantId};
use campus_ratelimit::{RateDecision, RateLimiter};
use campus_tenant::{
    Principal, PrincipalDirectory, QuotaPolicy, Resource, Session, SessionStore, TenantOverride, TenantResolver,
    TenantSelection, UsageAccountant,
};
use std::future::Future;
use std::sync::Arc;

/// Explicit tenant selection for one request
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Platform-super override target
pub const OVERRIDE_HEADER: &str = "x-tenant-override";
/// Mandatory audit reason for an override
pub const OVERRIDE_REASON_HEADER: &str = "x-override-reason";

/// Outcome of [`Gatekeeper::admit`]
#[derive(Debug, Clone)]
pub enum Admission {
    /// Skips gatekeeping; carries no tenant context
    Exempt(ExemptReason),
    /// Passed every check
    Admitted(AuthorizationContext),
}

impl Admission {
    /// Context for a protected operation. Exempt requests have none.
    pub fn into_context(self) -> GateResult<AuthorizationContext> {
        match self {
            Self::Admitted(context) => Ok(context),
            Self::Exempt(_) => Err(GateError::TenantNotResolved(ResolutionFailure::ExemptRequest)),
        }
    }
}

/// A refused request, with the rate decision when one was made
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct Rejection {
    /// Why the request was refused
    pub error: GateError,
    /// Present once rate limiting ran
    pub rate: Option<RateDecision>,
}

impl Rejection {
    fn with_rate(error: GateError, rate: &RateDecision) -> Self {
        Self {
            error,
            rate: Some(rate.clone()),
        }
    }
}

impl From<GateError> for Rejection {
    fn from(error: GateError) -> Self {
        Self { error, rate: None }
    }
}

/// Authorization wrapper around protected operations
pub struct Gatekeeper {
    classifier: RequestClassifier,
    limiter: Arc<RateLimiter>,
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn PrincipalDirectory>,
    resolver: Arc<TenantResolver>,
    accountant: Arc<UsageAccountant>,
    clock: Arc<dyn Clock>,
}

impl Gatekeeper {
    /// Gatekeeper over the given stages
    pub fn new(
        classifier: RequestClassifier,
        limiter: Arc<RateLimiter>,
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn PrincipalDirectory>,
        resolver: Arc<TenantResolver>,
        accountant: Arc<UsageAccountant>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            classifier,
            limiter,
            sessions,
            directory,
            resolver,
            accountant,
            clock,
        }
    }

    /// Usage accounting used by consuming operations
    pub fn accountant(&self) -> &Arc<UsageAccountant> {
        &self.accountant
    }

    /// Tenant resolver
    pub fn resolver(&self) -> &Arc<TenantResolver> {
        &self.resolver
    }

    /// Time source
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Classify, rate-limit, authenticate and resolve the tenant
    pub async fn admit(&self, request: &RequestMeta) -> Result<Admission, Rejection> {
        let now = self.clock.now();
        let classification = self.classifier.classify(request, now);
        if let (true, Some(reason)) = (classification.exempt, classification.reason) {
            tracing::debug!(path = %request.path, ?reason, "request exempt from gatekeeping");
            return Ok(Admission::Exempt(reason));
        }

        let rate = self.admit_rate(request).await?;
        let (session, principal) = self
            .authenticate(request)
            .await
            .map_err(|e| Rejection::with_rate(e, &rate))?;
        let selection = self
            .selection(request, &session)
            .map_err(|e| Rejection::with_rate(e, &rate))?;
        let resolved = self
            .resolver
            .resolve(&principal, &selection)
            .map_err(|e| Rejection::with_rate(e, &rate))?;

        Ok(Admission::Admitted(AuthorizationContext::new(
            request.request_id,
            &request.method,
            &request.path,
            resolved,
            rate,
            now,
        )))
    }

    /// Run `op` only after admission succeeds; it receives the resolved
    /// context as its leading argument
    pub async fn guard<T, F, Fut>(&self, request: &RequestMeta, op: F) -> Result<T, Rejection>
    where
        F: FnOnce(AuthorizationContext) -> Fut,
        Fut: Future<Output = GateResult<T>>,
    {
        let context = self.admit(request).await?.into_context()?;
        let rate = context.rate().clone();
        op(context).await.map_err(|e| Rejection::with_rate(e, &rate))
    }

    /// [`guard`](Self::guard) for operations that consume a metered resource
    pub async fn guard_consuming<T, F, Fut>(
        &self,
        request: &RequestMeta,
        resource: Resource,
        units: u64,
        policy: QuotaPolicy,
        op: F,
    ) -> Result<T, Rejection>
    where
        F: FnOnce(AuthorizationContext) -> Fut,
        Fut: Future<Output = GateResult<T>>,
    {
        let context = self.admit(request).await?.into_context()?;
        let rate = context.rate().clone();
        self.run_consuming(context, resource, units, policy, op)
            .await
            .map_err(|e| Rejection::with_rate(e, &rate))
    }

    /// Run `op` against a metered resource; usage is recorded only if `op`
    /// succeeded.
    ///
    /// Under [`QuotaPolicy::HardBlock`] the units are reserved before `op`
    /// runs, so concurrent callers cannot pass the limit together. An `op`
    /// that fails or is cancelled releases its reservation.
    pub async fn run_consuming<T, F, Fut>(
        &self,
        context: AuthorizationContext,
        resource: Resource,
        units: u64,
        policy: QuotaPolicy,
        op: F,
    ) -> GateResult<T>
    where
        F: FnOnce(AuthorizationContext) -> Fut,
        Fut: Future<Output = GateResult<T>>,
    {
        let tenant_id = context.tenant_id();
        match policy {
            QuotaPolicy::HardBlock => {
                let reservation = self
                    .accountant
                    .reserve(tenant_id, resource, units)
                    .await
                    .map_err(|e| {
                        if matches!(e, GateError::QuotaExceeded { .. }) {
                            tracing::debug!(tenant = %tenant_id, resource = resource.as_str(), "quota exhausted, blocking");
                        }
                        e
                    })?;

                let value = op(context).await?;

                // op already committed; a failed usage write is only logged
                if let Err(err) = reservation.commit().await {
                    tracing::error!(tenant = %tenant_id, resource = resource.as_str(), error = %err, "usage not recorded");
                }
                Ok(value)
            }
            QuotaPolicy::SoftWarn => {
                let status = self.accountant.check_quota(tenant_id, resource).await?;
                if status.used.saturating_add(units) > status.limit {
                    tracing::warn!(
                        tenant = %tenant_id,
                        resource = resource.as_str(),
                        used = status.used,
                        limit = status.limit,
                        "quota exhausted, proceeding under soft policy"
                    );
                }

                let value = op(context).await?;

                if let Err(err) = self.accountant.increment(tenant_id, resource, units).await {
                    tracing::error!(tenant = %tenant_id, resource = resource.as_str(), error = %err, "usage not recorded");
                }
                Ok(value)
            }
        }
    }

    /// Store the selected tenant as the session's tenant preference. The
    /// membership must be active and the tenant not suspended.
    ///
    /// `selected` is only evaluated after rate limiting and authentication,
    /// so a malformed selection still counts against the caller's window.
    pub async fn select_tenant<F>(&self, request: &RequestMeta, selected: F) -> Result<AuthorizationContext, Rejection>
    where
        F: FnOnce() -> GateResult<TenantId>,
    {
        let now = self.clock.now();
        let rate = self.admit_rate(request).await?;
        let reject = |e| Rejection::with_rate(e, &rate);

        let (session, principal) = self.authenticate(request).await.map_err(reject)?;
        let tenant_id = selected().map_err(reject)?;
        let selection = TenantSelection {
            explicit: Some(tenant_id),
            ..TenantSelection::default()
        };
        let resolved = self.resolver.resolve(&principal, &selection).map_err(reject)?;

        if !self
            .sessions
            .set_tenant_preference(&session.token, resolved.tenant_id)
            .await
        {
            return Err(reject(GateError::Unauthenticated));
        }
        tracing::info!(principal = %principal.id, tenant = %resolved.tenant_id, "session tenant selected");

        Ok(AuthorizationContext::new(
            request.request_id,
            &request.method,
            &request.path,
            resolved,
            rate,
            now,
        ))
    }

    async fn admit_rate(&self, request: &RequestMeta) -> Result<RateDecision, Rejection> {
        let rate = self.limiter.allow_for(request).await;
        if !rate.allowed {
            let error = rate.to_error(self.clock.now());
            return Err(Rejection::with_rate(error, &rate));
        }
        Ok(rate)
    }

    async fn authenticate(&self, request: &RequestMeta) -> GateResult<(Session, Principal)> {
        let token = request.session_token().ok_or(GateError::Unauthenticated)?;
        let session = self
            .sessions
            .session(token, self.clock.now())
            .await
            .ok_or(GateError::Unauthenticated)?;
        let principal = self
            .directory
            .principal(session.principal_id)
            .await
            .ok_or(GateError::Unauthenticated)?;
        Ok((session, principal))
    }

    fn selection(&self, request: &RequestMeta, session: &Session) -> GateResult<TenantSelection> {
        let explicit = request
            .header_trimmed(TENANT_HEADER)
            .map(parse_tenant)
            .transpose()?;

        let override_ = match request.header_trimmed(OVERRIDE_HEADER) {
            Some(raw) => Some(TenantOverride {
                tenant_id: parse_tenant(raw)?,
                reason: request.header_trimmed(OVERRIDE_REASON_HEADER).unwrap_or_default().to_string(),
                request_id: request.request_id,
            }),
            None => None,
        };

        Ok(TenantSelection {
            explicit,
            session_preference: session.tenant_preference,
            override_,
        })
    }
}

fn parse_tenant(raw: &str) -> GateResult<TenantId> {
    raw.parse()
        .map_err(|_| GateError::InvalidRequest("malformed tenant id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use campus_common::ManualClock;
    use campus_ratelimit::{MemoryWindowStore, RateLimiterConfig, WindowPolicy};
    use campus_tenant::{
        InMemoryPrincipalDirectory, InMemorySessionStore, InMemoryUsageStore, MemoryBypassAudit, NewTenant,
        NoDependencies, PlanTier, TenantRegistry, TenantRole,
    };
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        gate: Gatekeeper,
        sessions: Arc<InMemorySessionStore>,
        directory: Arc<InMemoryPrincipalDirectory>,
        registry: Arc<TenantRegistry>,
        clock: Arc<ManualClock>,
        a: TenantId,
        b: TenantId,
    }

    impl Fixture {
        fn new(limit: u64) -> Self {
            let clock = Arc::new(ManualClock::starting_now());
            let registry = Arc::new(TenantRegistry::new(Arc::new(NoDependencies), clock.clone()));
            let onboard = |slug: &str| {
                registry
                    .onboard(NewTenant {
                        name: slug.into(),
                        slug: slug.into(),
                        plan: PlanTier::Starter,
                    })
                    .unwrap()
                    .id
            };
            let a = onboard("ashford");
            let b = onboard("brookside");

            let limiter = Arc::new(RateLimiter::new(
                Arc::new(MemoryWindowStore::new()),
                clock.clone(),
                RateLimiterConfig {
                    default_policy: WindowPolicy::new(limit, 10_000),
                    ..RateLimiterConfig::default()
                },
            ));
            let sessions = Arc::new(InMemorySessionStore::new());
            let directory = Arc::new(InMemoryPrincipalDirectory::new());
            let resolver = Arc::new(TenantResolver::new(
                registry.clone(),
                Arc::new(MemoryBypassAudit::new()),
                clock.clone(),
            ));
            let accountant = Arc::new(UsageAccountant::new(
                Arc::new(InMemoryUsageStore::new()),
                registry.clone(),
                clock.clone(),
            ));
            let classifier = RequestClassifier::new(vec!["/health".into()], None, Environment::Production, false);

            let gate = Gatekeeper::new(
                classifier,
                limiter,
                sessions.clone(),
                directory.clone(),
                resolver,
                accountant,
                clock.clone(),
            );
            Self {
                gate,
                sessions,
                directory,
                registry,
                clock,
                a,
                b,
            }
        }

        /// Principal with a live session; returns the bearer token
        fn login(&self, principal: Principal) -> String {
            let token = format!("tok-{}", principal.id);
            self.sessions.insert(Session {
                token: token.clone(),
                principal_id: principal.id,
                expires_at: self.clock.now() + Duration::hours(1),
                tenant_preference: None,
            });
            self.directory.upsert(principal);
            token
        }
    }

    fn request(token: &str) -> RequestMeta {
        RequestMeta::new("GET", "/api/v1/students")
            .with_header("authorization", format!("Bearer {}", token))
            .with_header("x-forwarded-for", "203.0.113.10")
    }

    #[tokio::test]
    async fn test_guard_passes_resolved_context() {
        let f = Fixture::new(100);
        let token = f.login(Principal::new("t").member_of(f.a, TenantRole::Teacher));

        let (tenant, role) = f
            .gate
            .guard(&request(&token), |ctx| async move { Ok((ctx.tenant_id(), ctx.role())) })
            .await
            .unwrap();
        assert_eq!(tenant, f.a);
        assert_eq!(role, TenantRole::Teacher);
    }

    #[tokio::test]
    async fn test_failures_short_circuit_before_op() {
        let f = Fixture::new(100);
        let ran = AtomicBool::new(false);
        let op = |_ctx: AuthorizationContext| async {
            ran.store(true, Ordering::SeqCst);
            Ok::<(), GateError>(())
        };

        // no session
        let anonymous = RequestMeta::new("GET", "/api/v1/students");
        let rejection = f.gate.guard(&anonymous, op).await.unwrap_err();
        assert!(matches!(rejection.error, GateError::Unauthenticated));
        assert!(rejection.rate.is_some());

        // ambiguous membership
        let token = f.login(
            Principal::new("t")
                .member_of(f.a, TenantRole::Teacher)
                .member_of(f.b, TenantRole::Teacher),
        );
        let rejection = f.gate.guard(&request(&token), op).await.unwrap_err();
        assert!(matches!(
            rejection.error,
            GateError::TenantNotResolved(ResolutionFailure::Ambiguous)
        ));

        // suspended tenant
        let token = f.login(Principal::new("s").member_of(f.a, TenantRole::Admin));
        f.registry.suspend(f.a).unwrap();
        let rejection = f.gate.guard(&request(&token), op).await.unwrap_err();
        assert!(matches!(rejection.error, GateError::TenantSuspended));

        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_before_authentication() {
        let f = Fixture::new(2);
        let token = f.login(Principal::new("t").member_of(f.a, TenantRole::Teacher));

        for _ in 0..2 {
            f.gate.admit(&request(&token)).await.unwrap();
        }
        let rejection = f.gate.admit(&request(&token)).await.unwrap_err();
        match rejection.error {
            GateError::RateLimited { limit, retry_after_secs, .. } => {
                assert_eq!(limit, 2);
                assert_eq!(retry_after_secs, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exempt_requests_get_no_context() {
        let f = Fixture::new(100);
        let health = RequestMeta::new("GET", "/health");
        assert!(matches!(
            f.gate.admit(&health).await.unwrap(),
            Admission::Exempt(ExemptReason::Path(_))
        ));

        let rejection = f
            .gate
            .guard(&health, |_ctx| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(
            rejection.error,
            GateError::TenantNotResolved(ResolutionFailure::ExemptRequest)
        ));
    }

    #[tokio::test]
    async fn test_explicit_header_and_malformed_value() {
        let f = Fixture::new(100);
        let token = f.login(
            Principal::new("t")
                .member_of(f.a, TenantRole::Teacher)
                .member_of(f.b, TenantRole::Admin),
        );

        let ctx = f
            .gate
            .admit(&request(&token).with_header(TENANT_HEADER, f.b.to_string()))
            .await
            .unwrap()
            .into_context()
            .unwrap();
        assert_eq!(ctx.tenant_id(), f.b);
        assert_eq!(ctx.role(), TenantRole::Admin);

        let rejection = f
            .gate
            .admit(&request(&token).with_header(TENANT_HEADER, "school-b"))
            .await
            .unwrap_err();
        assert!(matches!(rejection.error, GateError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_select_tenant_persists_preference() {
        let f = Fixture::new(100);
        let token = f.login(
            Principal::new("t")
                .member_of(f.a, TenantRole::Teacher)
                .member_of(f.b, TenantRole::Admin),
        );

        let stranger = TenantId::new();
        let rejection = f.gate.select_tenant(&request(&token), || Ok(stranger)).await.unwrap_err();
        assert!(matches!(
            rejection.error,
            GateError::TenantNotResolved(ResolutionFailure::NotAMember)
        ));

        let rejection = f
            .gate
            .select_tenant(&request(&token), || Err(GateError::InvalidRequest("bad body".into())))
            .await
            .unwrap_err();
        assert!(matches!(rejection.error, GateError::InvalidRequest(_)));
        assert_eq!(rejection.rate.map(|rate| rate.remaining), Some(98));

        f.gate.select_tenant(&request(&token), || Ok(f.b)).await.unwrap();
        let ctx = f.gate.admit(&request(&token)).await.unwrap().into_context().unwrap();
        assert_eq!(ctx.tenant_id(), f.b);
    }

    #[tokio::test]
    async fn test_override_requires_super_and_reason() {
        let f = Fixture::new(100);
        let token = f.login(Principal::new("ops").platform_super());

        let rejection = f
            .gate
            .admit(&request(&token).with_header(OVERRIDE_HEADER, f.a.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(
            rejection.error,
            GateError::TenantNotResolved(ResolutionFailure::OverrideReasonMissing)
        ));

        let ctx = f
            .gate
            .admit(
                &request(&token)
                    .with_header(OVERRIDE_HEADER, f.a.to_string())
                    .with_header(OVERRIDE_REASON_HEADER, "ticket 77"),
            )
            .await
            .unwrap()
            .into_context()
            .unwrap();
        assert_eq!(ctx.tenant_id(), f.a);
        assert_eq!(ctx.role(), TenantRole::Operator);
    }

    #[tokio::test]
    async fn test_consuming_counts_only_successes() {
        let f = Fixture::new(1_000);
        let token = f.login(Principal::new("t").member_of(f.a, TenantRole::Teacher));
        f.registry
            .set_quota_override(f.a, Resource::SmsMessages, Some(2))
            .unwrap();

        let send = |ok: bool| move |_ctx: AuthorizationContext| async move {
            if ok {
                Ok("sent")
            } else {
                Err(GateError::Internal("gateway down".into()))
            }
        };

        f.gate
            .guard_consuming(&request(&token), Resource::SmsMessages, 1, QuotaPolicy::HardBlock, send(false))
            .await
            .unwrap_err();
        let status = f.gate.accountant().check_quota(f.a, Resource::SmsMessages).await.unwrap();
        assert_eq!(status.used, 0);

        for _ in 0..2 {
            f.gate
                .guard_consuming(&request(&token), Resource::SmsMessages, 1, QuotaPolicy::HardBlock, send(true))
                .await
                .unwrap();
        }
        let rejection = f
            .gate
            .guard_consuming(&request(&token), Resource::SmsMessages, 1, QuotaPolicy::HardBlock, send(true))
            .await
            .unwrap_err();
        assert!(matches!(rejection.error, GateError::QuotaExceeded { used: 2, limit: 2, .. }));

        // soft policy proceeds and keeps counting
        f.gate
            .guard_consuming(&request(&token), Resource::SmsMessages, 1, QuotaPolicy::SoftWarn, send(true))
            .await
            .unwrap();
        let status = f.gate.accountant().check_quota(f.a, Resource::SmsMessages).await.unwrap();
        assert_eq!(status.used, 3);
    }

    #[tokio::test]
    async fn test_concurrent_hard_block_holds_limit() {
        let f = Fixture::new(1_000);
        let token = f.login(Principal::new("t").member_of(f.a, TenantRole::Teacher));
        f.registry.set_quota_override(f.a, Resource::Students, Some(1)).unwrap();
        let req = request(&token);

        let enrol = || {
            f.gate
                .guard_consuming(&req, Resource::Students, 1, QuotaPolicy::HardBlock, |_ctx| async {
                    tokio::task::yield_now().await;
                    Ok("enrolled")
                })
        };
        let (first, second, third) = tokio::join!(enrol(), enrol(), enrol());

        let admitted = [first.is_ok(), second.is_ok(), third.is_ok()]
            .iter()
            .filter(|ok| **ok)
            .count();
        assert_eq!(admitted, 1);
        for rejection in [first, second, third].into_iter().filter_map(Result::err) {
            assert!(matches!(rejection.error, GateError::QuotaExceeded { limit: 1, .. }));
        }
        let status = f.gate.accountant().check_quota(f.a, Resource::Students).await.unwrap();
        assert_eq!(status.used, 1);
    }

    #[tokio::test]
    async fn test_failed_operation_releases_reservation() {
        let f = Fixture::new(1_000);
        let token = f.login(Principal::new("t").member_of(f.a, TenantRole::Teacher));
        f.registry.set_quota_override(f.a, Resource::Students, Some(1)).unwrap();

        f.gate
            .guard_consuming(&request(&token), Resource::Students, 1, QuotaPolicy::HardBlock, |_ctx| async {
                Err::<(), _>(GateError::Internal("write failed".into()))
            })
            .await
            .unwrap_err();
        f.gate
            .guard_consuming(&request(&token), Resource::Students, 1, QuotaPolicy::HardBlock, |_ctx| async {
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_aborted_operation_records_no_usage() {
        let f = Fixture::new(1_000);
        let token = f.login(Principal::new("t").member_of(f.a, TenantRole::Teacher));
        let req = request(&token);

        let attempt = f.gate.guard_consuming(
            &req,
            Resource::ReportExports,
            1,
            QuotaPolicy::HardBlock,
            |_ctx| std::future::pending::<GateResult<()>>(),
        );
        let mut attempt = tokio_test::task::spawn(attempt);
        tokio_test::assert_pending!(attempt.poll());
        drop(attempt);

        let status = f.gate.accountant().check_quota(f.a, Resource::ReportExports).await.unwrap();
        assert_eq!(status.used, 0);

        // the held unit came back: the full allowance is still reservable
        let reservation = f
            .gate
            .accountant()
            .reserve(f.a, Resource::ReportExports, status.limit)
            .await
            .unwrap();
        drop(reservation);
    }

    #[tokio::test]
    async fn test_expired_session_is_unauthenticated() {
        let f = Fixture::new(100);
        let token = f.login(Principal::new("t").member_of(f.a, TenantRole::Teacher));
        f.clock.advance(Duration::hours(2));

        let rejection = f.gate.admit(&request(&token)).await.unwrap_err();
        assert!(matches!(rejection.error, GateError::Unauthenticated));
    }
}
