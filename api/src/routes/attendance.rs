//! Attendance endpoints
//!
//! Attendance is reached through its student, and the student is looked up
//! under the request's scope first.

use crate::error::ApiError;
use crate::middleware::gate::Authorized;
use crate::models::{ApiResponse, AttendanceCreate, AttendanceRecord};
use crate::routes::students::require_write;
use crate::ApiState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use campus_common::GateError;
use campus_gate::ScopeError;
use std::sync::Arc;
use uuid::Uuid;

/// Attendance routes, nested under `/students`
pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/:id/attendance", get(list_attendance).post(record_attendance))
}

/// Attendance marks for a student
#[utoipa::path(
    get,
    path = "/api/v1/students/{id}/attendance",
    params(("id" = Uuid, Path, description = "Student ID")),
    responses(
        (status = 200, description = "Attendance marks, oldest first", body = [AttendanceRecord]),
        (status = 404, description = "Student not found")
    ),
    tag = "attendance",
    security(("session" = []))
)]
pub async fn list_attendance(
    State(state): State<Arc<ApiState>>,
    Authorized(ctx): Authorized,
    Path(student_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<AttendanceRecord>>>, ApiError> {
    let mut marks = state.records.attendance.children_of(
        &ctx.scope(),
        &state.records.students,
        student_id,
        |mark| mark.student_id,
    )?;
    marks.sort_by_key(|mark| mark.date);
    Ok(Json(ApiResponse::success(marks)))
}

/// Record one attendance mark
#[utoipa::path(
    post,
    path = "/api/v1/students/{id}/attendance",
    params(("id" = Uuid, Path, description = "Student ID")),
    request_body = AttendanceCreate,
    responses(
        (status = 201, description = "Mark recorded", body = AttendanceRecord),
        (status = 404, description = "Student not found")
    ),
    tag = "attendance",
    security(("session" = []))
)]
pub async fn record_attendance(
    State(state): State<Arc<ApiState>>,
    Authorized(ctx): Authorized,
    Path(student_id): Path<Uuid>,
    Json(input): Json<AttendanceCreate>,
) -> Result<(StatusCode, Json<ApiResponse<AttendanceRecord>>), ApiError> {
    require_write(&ctx)?;
    let scope = ctx.scope();
    let mark = AttendanceRecord {
        id: Uuid::new_v4(),
        tenant_id: scope.tenant_id(),
        student_id,
        date: input.date,
        status: input.status,
        recorded_at: ctx.admitted_at(),
    };

    let mark = state
        .records
        .attendance
        .insert_child(
            &scope,
            &state.records.students,
            |mark| mark.student_id,
            mark,
            |existing, new| existing.date == new.date,
        )
        .map_err(|err| match err {
            ScopeError::Conflict => GateError::InvalidRequest("attendance already recorded for that date".into()),
            other => other.into(),
        })?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(mark))))
}
