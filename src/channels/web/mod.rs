//! HTTP API consumed by the documentation site.

pub mod server;
pub mod types;

pub use server::{GatewayState, RateLimiter, build_router, start_server};
