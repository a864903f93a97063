//! Configuration resolved from `.env` and the process environment.

mod assistant;
pub(crate) mod helpers;

pub use assistant::{
    AssistantConfig, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_ROUTES_FILE, DEFAULT_SITE_NAME,
    LogFormat, RateLimitConfig, RouteKnowledgeMode,
};
pub use helpers::{EnvSource, ProcessEnv, parse_bool};
