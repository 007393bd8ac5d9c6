//! Campus Gate HTTP API
//!
//! School record endpoints behind the gatekeeping layer.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  TraceLayer │ CorsLayer                                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │  /health  /ready  /api-docs/openapi.json        (exempt)      │
//! │  PUT /api/v1/session/tenant                     (select)      │
//! ├───────────────────────────────────────────────────────────────┤
//! │  gate middleware: classify → rate limit → session → tenant    │
//! │  ┌─────────────────────────────────────────────────────────┐  │
//! │  │ /api/v1/students[/{id}[/attendance]]  /api/v1/usage/{r} │  │
//! │  │        Authorized(ctx) → ScopedTable(&ctx.scope())       │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod middleware;
pub mod models;
pub mod records;
pub mod routes;
pub mod seed;

use axum::routing::{get, put};
use axum::{Json, Router};
use campus_common::Clock;
use campus_gate::{Gatekeeper, GatekeeperConfig, RequestClassifier};
use campus_ratelimit::{FailoverStore, RateLimiter, WindowStore};
use campus_tenant::{
    InMemoryPrincipalDirectory, InMemorySessionStore, InMemoryUsageStore, TenantRegistry, TenantResolver,
    TracingBypassAudit, UsageAccountant,
};
use records::SchoolRecords;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

pub use models::*;

/// API state
#[derive(Clone)]
pub struct ApiState {
    /// Admission and consuming-operation wrapper
    pub gate: Arc<Gatekeeper>,
    /// Tenant-owned school data
    pub records: Arc<SchoolRecords>,
    /// Tenant lifecycle
    pub registry: Arc<TenantRegistry>,
    /// Principals by id
    pub directory: Arc<InMemoryPrincipalDirectory>,
    /// Live sessions
    pub sessions: Arc<InMemorySessionStore>,
    /// Present when a distributed rate-limit backend is configured
    pub failover: Option<Arc<FailoverStore>>,
}

impl ApiState {
    /// Wire the gatekeeper over in-memory tenancy stores
    pub fn new(
        config: &GatekeeperConfig,
        store: Arc<dyn WindowStore>,
        failover: Option<Arc<FailoverStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let records = Arc::new(SchoolRecords::new());
        let registry = Arc::new(TenantRegistry::new(records.clone(), clock.clone()));
        let sessions = Arc::new(InMemorySessionStore::new());
        let directory = Arc::new(InMemoryPrincipalDirectory::new());

        let resolver = Arc::new(TenantResolver::new(
            registry.clone(),
            Arc::new(TracingBypassAudit),
            clock.clone(),
        ));
        let accountant = Arc::new(UsageAccountant::new(
            Arc::new(InMemoryUsageStore::new()),
            registry.clone(),
            clock.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(store, clock.clone(), config.limiter_config()));

        let gate = Arc::new(Gatekeeper::new(
            RequestClassifier::from_config(config),
            limiter,
            sessions.clone(),
            directory.clone(),
            resolver,
            accountant,
            clock,
        ));

        Self {
            gate,
            records,
            registry,
            directory,
            sessions,
            failover,
        }
    }
}

struct SessionAuth;

impl Modify for SessionAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Campus Gate API",
        description = "Tenant-isolated school records behind rate limiting and tenant resolution",
        license(name = "Apache-2.0")
    ),
    paths(
        routes::health::health_check,
        routes::health::ready,
        routes::students::list_students,
        routes::students::get_student,
        routes::students::create_student,
        routes::students::delete_student,
        routes::attendance::list_attendance,
        routes::attendance::record_attendance,
        routes::usage::get_usage,
        routes::session::select_tenant,
    ),
    components(
        schemas(
            ErrorResponse,
            Student, StudentCreate,
            AttendanceRecord, AttendanceCreate, AttendanceStatus,
            UsageReport, TenantSelect, TenantSelected,
            routes::health::HealthResponse, routes::health::ReadyResponse
        )
    ),
    modifiers(&SessionAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "students", description = "Student records"),
        (name = "attendance", description = "Attendance marks"),
        (name = "usage", description = "Monthly plan usage"),
        (name = "session", description = "Session tenant selection")
    )
)]
/// OpenAPI document for the router
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the API router
pub fn build_router(state: ApiState) -> Router {
    let state = Arc::new(state);

    let protected = Router::new()
        .nest(
            "/students",
            routes::students::router().merge(routes::attendance::router()),
        )
        .route("/usage/:resource", get(routes::usage::get_usage))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::gate::gate,
        ));

    let api = Router::new()
        .route("/session/tenant", put(routes::session::select_tenant))
        .merge(protected);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/ready", get(routes::health::ready))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
