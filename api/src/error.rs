//! HTTP error mapping

use crate::models::ApiResponse;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use campus_common::GateError;
use campus_gate::{Rejection, ScopeError};
use campus_ratelimit::RateDecision;
use chrono::Utc;

/// Error returned by handlers and the gate middleware
#[derive(Debug)]
pub struct ApiError {
    /// Underlying gate error
    pub error: GateError,
    /// Rate decision to report in headers
    pub rate: Option<RateDecision>,
}

impl ApiError {
    /// HTTP status for the error
    pub fn status(&self) -> StatusCode {
        match &self.error {
            GateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GateError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GateError::TenantNotResolved(_)
            | GateError::TenantSuspended
            | GateError::Forbidden(_)
            | GateError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            GateError::NotFound => StatusCode::NOT_FOUND,
            GateError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GateError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GateError> for ApiError {
    fn from(error: GateError) -> Self {
        Self { error, rate: None }
    }
}

impl From<ScopeError> for ApiError {
    fn from(error: ScopeError) -> Self {
        GateError::from(error).into()
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        Self {
            error: rejection.error,
            rate: rejection.rate,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.error, "request failed");
        } else {
            tracing::debug!(code = self.error.code(), "request rejected");
        }

        let body = ApiResponse::<()>::error(self.error.code(), &self.error.public_message());
        let mut response = (status, Json(body)).into_response();

        if let Some(rate) = &self.rate {
            append_rate_headers(&mut response, rate);
        }
        if let GateError::RateLimited { retry_after_secs, .. } = &self.error {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// `X-RateLimit-*` headers (and `Retry-After` when blocked)
pub fn append_rate_headers(response: &mut Response, rate: &RateDecision) {
    let headers = response.headers_mut();
    for (name, value) in rate.headers(Utc::now()) {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_common::ResolutionFailure;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (GateError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (
                GateError::TenantNotResolved(ResolutionFailure::Ambiguous),
                StatusCode::FORBIDDEN,
            ),
            (GateError::TenantSuspended, StatusCode::FORBIDDEN),
            (
                GateError::QuotaExceeded {
                    resource: "students".into(),
                    used: 10,
                    limit: 10,
                },
                StatusCode::FORBIDDEN,
            ),
            (GateError::NotFound, StatusCode::NOT_FOUND),
            (GateError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let response = ApiError::from(GateError::RateLimited {
            limit: 100,
            retry_after_secs: 7,
            reset_at: Utc::now(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "7");
    }
}
