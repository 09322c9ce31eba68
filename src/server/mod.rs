//! HTTP gateway in front of the inference engine.
//!
//! - [`api`]: Request/response types, app state and route handlers
//! - [`streaming`]: SSE relay for chat fragments
//! - [`health`]: Engine availability report
//! - [`error`]: `ApiError` and its HTTP rendering
//! - [`metrics`]: Prometheus counters

pub mod api;
pub mod error;
pub mod health;
pub mod metrics;
pub mod streaming;

pub use api::{build_router, AppState};
