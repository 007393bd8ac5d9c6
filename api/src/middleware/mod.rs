//! API middleware

pub mod gate;
