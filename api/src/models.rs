//! API Models

use campus_gate::TenantOwned;
use campus_common::TenantId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Standard API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Request outcome
    pub success: bool,
    /// Payload on success
    pub data: Option<T>,
    /// Error on failure
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    /// Successful response
    pub fn success(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    /// Failed response
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorResponse {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Stable error code
    pub code: String,
    /// Message safe to show to clients
    pub message: String,
}

// ============ Students ============

/// Student record, owned by one school
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Student {
    /// Student id
    pub id: Uuid,
    /// Owning school; never serialized to clients
    #[serde(skip)]
    pub tenant_id: TenantId,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// School grade
    pub grade: u8,
    /// Enrolment time
    pub created_at: DateTime<Utc>,
}

impl TenantOwned for Student {
    type Id = Uuid;

    fn id(&self) -> Uuid {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Student creation request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StudentCreate {
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// School grade
    pub grade: u8,
}

// ============ Attendance ============

/// Attendance mark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Present for the day
    Present,
    /// Absent without excuse
    Absent,
    /// Arrived late
    Late,
    /// Absent with excuse
    Excused,
}

/// One attendance mark for one student on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AttendanceRecord {
    /// Mark id
    pub id: Uuid,
    /// Owning school; never serialized to clients
    #[serde(skip)]
    pub tenant_id: TenantId,
    /// Student the mark belongs to
    pub student_id: Uuid,
    /// School day
    pub date: NaiveDate,
    /// Mark
    pub status: AttendanceStatus,
    /// When the mark was recorded
    pub recorded_at: DateTime<Utc>,
}

impl TenantOwned for AttendanceRecord {
    type Id = Uuid;

    fn id(&self) -> Uuid {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Attendance creation request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttendanceCreate {
    /// School day
    pub date: NaiveDate,
    /// Mark
    pub status: AttendanceStatus,
}

// ============ Usage ============

/// Monthly usage for one resource
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UsageReport {
    /// Resource label
    pub resource: String,
    /// Billing period, `YYYY-MM`
    pub period: String,
    /// Units consumed
    pub used: u64,
    /// Monthly limit
    pub limit: u64,
    /// One more unit may be consumed
    pub within_limit: bool,
}

// ============ Session ============

/// Tenant selection request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TenantSelect {
    /// School to act in
    pub tenant_id: Uuid,
}

/// Tenant selection result
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TenantSelected {
    /// Selected school
    pub tenant_id: Uuid,
    /// Role in that school
    pub role: String,
}
