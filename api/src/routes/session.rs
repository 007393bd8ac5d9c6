//! Session tenant selection
//!
//! Not behind the gate middleware: a principal with several memberships
//! cannot be admitted until a tenant has been chosen here.

use crate::error::{append_rate_headers, ApiError};
use crate::middleware::gate::request_meta;
use crate::models::{ApiResponse, TenantSelect, TenantSelected};
use crate::ApiState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Extensions, HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use campus_common::{GateError, GateResult, TenantId};
use std::sync::Arc;

/// Choose the school this session acts in
#[utoipa::path(
    put,
    path = "/api/v1/session/tenant",
    request_body = TenantSelect,
    responses(
        (status = 200, description = "Tenant stored on the session", body = TenantSelected),
        (status = 400, description = "Malformed selection"),
        (status = 401, description = "No valid session"),
        (status = 403, description = "Not an active member of that school")
    ),
    tag = "session",
    security(("session" = []))
)]
pub async fn select_tenant(
    State(state): State<Arc<ApiState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
) -> Result<Response, ApiError> {
    let meta = request_meta(&method, &uri, &headers, &extensions);
    let ctx = state.gate.select_tenant(&meta, || parse_selection(&body)).await?;

    let mut response = Json(ApiResponse::success(TenantSelected {
        tenant_id: *ctx.tenant_id().as_uuid(),
        role: ctx.role().to_string(),
    }))
    .into_response();
    append_rate_headers(&mut response, ctx.rate());
    Ok(response)
}

fn parse_selection(body: &[u8]) -> GateResult<TenantId> {
    let input: TenantSelect = serde_json::from_slice(body)
        .map_err(|_| GateError::InvalidRequest("body must be {\"tenant_id\": \"<uuid>\"}".into()))?;
    Ok(TenantId::from_uuid(input.tenant_id))
}
