//! Gate middleware
//!
//! Converts each request to [`RequestMeta`], runs admission, and hands the
//! resulting [`AuthorizationContext`] to handlers through the [`Authorized`]
//! extractor. Handlers behind this layer cannot obtain a context any other
//! way.

use crate::error::{append_rate_headers, ApiError};
use crate::ApiState;
use axum::extract::{ConnectInfo, FromRequestParts, OriginalUri, Request, State};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap, Method, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use campus_common::{GateError, RequestMeta, ResolutionFailure};
use campus_gate::{Admission, AuthorizationContext};
use std::net::SocketAddr;
use std::sync::Arc;

/// Framework-neutral view of an HTTP request.
///
/// Nested routers see a stripped uri; the path is taken from `OriginalUri`
/// when present so prefix rules match the full path.
pub fn request_meta(method: &Method, uri: &Uri, headers: &HeaderMap, extensions: &Extensions) -> RequestMeta {
    let path = extensions
        .get::<OriginalUri>()
        .map(|original| original.0.path())
        .unwrap_or_else(|| uri.path());
    let mut meta = RequestMeta::new(method.as_str(), path);
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            meta.insert_header(name.as_str(), value);
        }
    }
    if let Some(ConnectInfo(addr)) = extensions.get::<ConnectInfo<SocketAddr>>() {
        meta.peer_addr = Some(addr.ip());
    }
    meta
}

/// Admission middleware, installed with `axum::middleware::from_fn_with_state`
pub async fn gate(State(state): State<Arc<ApiState>>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let meta = request_meta(&parts.method, &parts.uri, &parts.headers, &parts.extensions);
    let mut request = Request::from_parts(parts, body);

    match state.gate.admit(&meta).await {
        Ok(Admission::Exempt(_)) => next.run(request).await,
        Ok(Admission::Admitted(context)) => {
            let rate = context.rate().clone();
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            append_rate_headers(&mut response, &rate);
            response
        }
        Err(rejection) => ApiError::from(rejection).into_response(),
    }
}

/// Resolved context for the current request
#[derive(Debug, Clone)]
pub struct Authorized(pub AuthorizationContext);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Authorized {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthorizationContext>()
            .cloned()
            .map(Authorized)
            .ok_or_else(|| GateError::TenantNotResolved(ResolutionFailure::ExemptRequest).into())
    }
}
