//! Usage endpoint

use crate::error::ApiError;
use crate::middleware::gate::Authorized;
use crate::models::{ApiResponse, UsageReport};
use crate::ApiState;
use axum::extract::{Path, State};
use axum::Json;
use campus_common::{Clock, GateError};
use campus_tenant::{BillingPeriod, Resource};
use std::sync::Arc;

/// Current-month usage of a resource for the resolved school
#[utoipa::path(
    get,
    path = "/api/v1/usage/{resource}",
    params(("resource" = String, Path, description = "students, sms_messages, email_messages, report_exports or storage_mb")),
    responses(
        (status = 200, description = "Usage against plan", body = UsageReport),
        (status = 400, description = "Unknown resource")
    ),
    tag = "usage",
    security(("session" = []))
)]
pub async fn get_usage(
    State(state): State<Arc<ApiState>>,
    Authorized(ctx): Authorized,
    Path(resource): Path<String>,
) -> Result<Json<ApiResponse<UsageReport>>, ApiError> {
    let resource: Resource = resource.parse().map_err(GateError::InvalidRequest)?;
    let status = state
        .gate
        .accountant()
        .check_quota(ctx.tenant_id(), resource)
        .await?;
    let period = BillingPeriod::containing(state.gate.clock().now());

    Ok(Json(ApiResponse::success(UsageReport {
        resource: resource.to_string(),
        period: period.to_string(),
        used: status.used,
        limit: status.limit,
        within_limit: status.within_limit,
    })))
}
