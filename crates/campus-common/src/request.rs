//! Framework-neutral request metadata
//!
//! The HTTP layer converts its native request into a [`RequestMeta`] once;
//! classifier, limiter and resolver only ever see this type.

use std::collections::HashMap;
use std::net::IpAddr;
use uuid::Uuid;

/// Request metadata consumed by the gatekeeping layer
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Correlation id
    pub request_id: Uuid,
    /// HTTP method (upper case)
    pub method: String,
    /// Request path without query string
    pub path: String,
    /// Connecting socket address, when known
    pub peer_addr: Option<IpAddr>,
    headers: HashMap<String, String>,
}

impl RequestMeta {
    /// New request with no headers
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            peer_addr: None,
            headers: HashMap::new(),
        }
    }

    /// Builder: add a header (names are case-insensitive)
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    /// Builder: set the connecting address
    pub fn with_peer(mut self, peer: IpAddr) -> Self {
        self.peer_addr = Some(peer);
        self
    }

    /// Insert a header. Repeated names are joined with `,` like HTTP folding.
    pub fn insert_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        self.headers
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Non-empty, trimmed header value
    pub fn header_trimmed(&self, name: &str) -> Option<&str> {
        self.header(name).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Session token from `Authorization: Bearer` or `x-session-token`
    pub fn session_token(&self) -> Option<&str> {
        if let Some(auth) = self.header_trimmed("authorization") {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }
        self.header_trimmed("x-session-token")
    }
}
