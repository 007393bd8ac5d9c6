//! API Routes

pub mod attendance;
pub mod health;
pub mod session;
pub mod students;
pub mod usage;
