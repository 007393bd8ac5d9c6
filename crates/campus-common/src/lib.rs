//! campusgate common - shared types for the request gatekeeping layer
//!
//! This crate holds the pieces every other campusgate crate agrees on:
//! - Strongly typed identifiers ([`TenantId`], [`PrincipalId`])
//! - Framework-neutral request metadata ([`RequestMeta`])
//! - An injectable [`Clock`] so window and period math is testable
//! - The shared [`GateError`] taxonomy surfaced to callers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod ids;
pub mod request;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GateError, GateResult, ResolutionFailure};
pub use ids::{PrincipalId, TenantId};
pub use request::RequestMeta;
