//! AuthGate Backend Library
//!
//! Token issuance and verification, sliding-window rate limiting, and the
//! gate pipeline that puts them in front of axum routes.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod middleware;
pub mod pipeline;

pub use api::{create_router, AppState};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::Config;
