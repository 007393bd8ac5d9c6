//! Student endpoints

use crate::error::ApiError;
use crate::middleware::gate::Authorized;
use crate::models::{ApiResponse, Student, StudentCreate};
use crate::ApiState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use campus_common::GateError;
use campus_gate::AuthorizationContext;
use campus_tenant::{QuotaPolicy, Resource};
use std::sync::Arc;
use uuid::Uuid;

/// Student routes
pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/", get(list_students).post(create_student))
        .route("/:id", get(get_student).delete(delete_student))
}

pub(crate) fn require_write(ctx: &AuthorizationContext) -> Result<(), ApiError> {
    if ctx.role().can_write() {
        Ok(())
    } else {
        Err(GateError::Forbidden(format!("role {} is read-only", ctx.role())).into())
    }
}

/// List students in the current school
#[utoipa::path(
    get,
    path = "/api/v1/students",
    responses(
        (status = 200, description = "Students of the resolved school", body = [Student])
    ),
    tag = "students",
    security(("session" = []))
)]
pub async fn list_students(
    State(state): State<Arc<ApiState>>,
    Authorized(ctx): Authorized,
) -> Json<ApiResponse<Vec<Student>>> {
    let mut students = state.records.students.list(&ctx.scope());
    students.sort_by(|a, b| (&a.last_name, &a.first_name).cmp(&(&b.last_name, &b.first_name)));
    Json(ApiResponse::success(students))
}

/// Get student by ID
#[utoipa::path(
    get,
    path = "/api/v1/students/{id}",
    params(("id" = Uuid, Path, description = "Student ID")),
    responses(
        (status = 200, description = "Student details", body = Student),
        (status = 404, description = "Student not found")
    ),
    tag = "students",
    security(("session" = []))
)]
pub async fn get_student(
    State(state): State<Arc<ApiState>>,
    Authorized(ctx): Authorized,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Student>>, ApiError> {
    let student = state
        .records
        .students
        .get(&ctx.scope(), id)
        .ok_or(GateError::NotFound)?;
    Ok(Json(ApiResponse::success(student)))
}

/// Enrol a student (counts against the `students` quota)
#[utoipa::path(
    post,
    path = "/api/v1/students",
    request_body = StudentCreate,
    responses(
        (status = 201, description = "Student created", body = Student),
        (status = 403, description = "Read-only role or quota exhausted")
    ),
    tag = "students",
    security(("session" = []))
)]
pub async fn create_student(
    State(state): State<Arc<ApiState>>,
    Authorized(ctx): Authorized,
    Json(input): Json<StudentCreate>,
) -> Result<(StatusCode, Json<ApiResponse<Student>>), ApiError> {
    require_write(&ctx)?;
    let first_name = input.first_name.trim().to_string();
    let last_name = input.last_name.trim().to_string();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(GateError::InvalidRequest("first_name and last_name are required".into()).into());
    }

    let records = state.records.clone();
    let student = state
        .gate
        .run_consuming(ctx, Resource::Students, 1, QuotaPolicy::HardBlock, |ctx| async move {
            let scope = ctx.scope();
            let student = Student {
                id: Uuid::new_v4(),
                tenant_id: scope.tenant_id(),
                first_name,
                last_name,
                grade: input.grade,
                created_at: ctx.admitted_at(),
            };
            records.students.insert(&scope, student).map_err(GateError::from)
        })
        .await?;

    tracing::info!(student = %student.id, "student enrolled");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(student))))
}

/// Remove a student and their attendance
#[utoipa::path(
    delete,
    path = "/api/v1/students/{id}",
    params(("id" = Uuid, Path, description = "Student ID")),
    responses(
        (status = 204, description = "Student removed"),
        (status = 404, description = "Student not found")
    ),
    tag = "students",
    security(("session" = []))
)]
pub async fn delete_student(
    State(state): State<Arc<ApiState>>,
    Authorized(ctx): Authorized,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    require_write(&ctx)?;
    let (student, marks) = state.records.students.remove_with_children(
        &ctx.scope(),
        id,
        &state.records.attendance,
        |mark| mark.student_id,
    )?;
    tracing::info!(student = %student.id, marks = marks.len(), "student removed");
    Ok(StatusCode::NO_CONTENT)
}
