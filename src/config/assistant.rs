use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::config::helpers::{
    EnvSource, optional_env, parse_csv, parse_num_env, parse_string_env,
};
use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://api.mistral.ai/v1";
pub const DEFAULT_MODEL: &str = "mistral-small-latest";
pub const DEFAULT_SITE_NAME: &str = "Mistral AI";
pub const DEFAULT_ROUTES_FILE: &str = "generated/lechat-routes.json";
pub const DEFAULT_BIND: &str = "127.0.0.1:3001";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// When the generated route knowledge is injected into the chat system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKnowledgeMode {
    /// Only when the latest user turn looks like a navigation or lookup request.
    Auto,
    Always,
    Never,
}

impl RouteKnowledgeMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(ConfigError::InvalidValue {
                key: "LECHAT_ROUTE_KNOWLEDGE".to_string(),
                message: format!("unsupported mode '{other}' (expected auto, always or never)"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Always => "always",
            Self::Never => "never",
        }
    }
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Read `LECHAT_LOG_FORMAT` alone, for commands that need no other settings.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_with(&crate::config::helpers::ProcessEnv)
    }

    pub fn resolve_with(env: &impl EnvSource) -> Result<Self, ConfigError> {
        match parse_string_env(env, "LECHAT_LOG_FORMAT", "pretty")?
            .to_ascii_lowercase()
            .as_str()
        {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidValue {
                key: "LECHAT_LOG_FORMAT".to_string(),
                message: format!("unsupported format '{other}'"),
            }),
        }
    }
}

/// Sliding-window limit applied to the chat endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window_secs: u64,
}

/// Runtime configuration for the assistant server.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Hosted LLM API key. Chat answers 503 while unset.
    pub api_key: Option<SecretString>,
    pub base_url: Url,
    pub model: String,
    /// Product name used in prompts ("the {site_name} documentation").
    pub site_name: String,
    pub chat_timeout: Duration,
    pub suggestion_timeout: Duration,
    /// Number of trailing conversation turns forwarded to the LLM.
    pub history_limit: usize,
    /// Per-message character cap applied before forwarding.
    pub max_message_chars: usize,
    pub route_knowledge: RouteKnowledgeMode,
    pub routes_file: PathBuf,
    pub bind: SocketAddr,
    pub allowed_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub log_format: LogFormat,
}

fn validate_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: "MISTRAL_BASE_URL".to_string(),
        message: format!("'{raw}' is not a valid URL: {e}"),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidValue {
            key: "MISTRAL_BASE_URL".to_string(),
            message: format!("unsupported scheme '{other}'"),
        }),
    }
}

fn positive_secs(key: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "timeout must be at least one second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn validate_origins(origins: Vec<String>) -> Result<Vec<String>, ConfigError> {
    for origin in &origins {
        let parsed = Url::parse(origin).map_err(|e| ConfigError::InvalidValue {
            key: "LECHAT_ALLOWED_ORIGINS".to_string(),
            message: format!("'{origin}': {e}"),
        })?;
        if parsed.path() != "/" || parsed.query().is_some() {
            return Err(ConfigError::InvalidValue {
                key: "LECHAT_ALLOWED_ORIGINS".to_string(),
                message: format!("'{origin}' must be a bare origin without a path"),
            });
        }
    }
    Ok(origins
        .into_iter()
        .map(|o| o.trim_end_matches('/').to_string())
        .collect())
}

impl AssistantConfig {
    /// Resolve from the process environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_with(&crate::config::helpers::ProcessEnv)
    }

    pub fn resolve_with(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let base_url = validate_base_url(&parse_string_env(env, "MISTRAL_BASE_URL", DEFAULT_BASE_URL)?)?;

        let history_limit = parse_num_env::<usize>(env, "LECHAT_HISTORY_LIMIT", 10)?;
        if history_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LECHAT_HISTORY_LIMIT".to_string(),
                message: "must keep at least one message".to_string(),
            });
        }

        let bind_raw = parse_string_env(env, "LECHAT_BIND", DEFAULT_BIND)?;
        let bind = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "LECHAT_BIND".to_string(),
                message: format!("'{bind_raw}': {e}"),
            })?;

        let allowed_origins = match optional_env(env, "LECHAT_ALLOWED_ORIGINS")? {
            Some(raw) => validate_origins(parse_csv(&raw))?,
            None => vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
        };

        let max_requests = parse_num_env::<u64>(env, "LECHAT_RATE_LIMIT", 30)?;
        let window_secs = parse_num_env::<u64>(env, "LECHAT_RATE_WINDOW_SECS", 60)?;
        if max_requests == 0 || window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LECHAT_RATE_LIMIT".to_string(),
                message: "rate limit and window must both be positive".to_string(),
            });
        }

        let log_format = LogFormat::resolve_with(env)?;

        Ok(Self {
            api_key: optional_env(env, "MISTRAL_API_KEY")?.map(SecretString::from),
            base_url,
            model: parse_string_env(env, "LECHAT_MODEL", DEFAULT_MODEL)?,
            site_name: parse_string_env(env, "LECHAT_SITE_NAME", DEFAULT_SITE_NAME)?,
            chat_timeout: positive_secs(
                "LECHAT_CHAT_TIMEOUT_SECS",
                parse_num_env(env, "LECHAT_CHAT_TIMEOUT_SECS", 25)?,
            )?,
            suggestion_timeout: positive_secs(
                "LECHAT_SUGGESTION_TIMEOUT_SECS",
                parse_num_env(env, "LECHAT_SUGGESTION_TIMEOUT_SECS", 5)?,
            )?,
            history_limit,
            max_message_chars: parse_num_env(env, "LECHAT_MAX_MESSAGE_CHARS", 4000)?,
            route_knowledge: RouteKnowledgeMode::parse(&parse_string_env(
                env,
                "LECHAT_ROUTE_KNOWLEDGE",
                "auto",
            )?)?,
            routes_file: PathBuf::from(parse_string_env(
                env,
                "LECHAT_ROUTES_FILE",
                DEFAULT_ROUTES_FILE,
            )?),
            bind,
            allowed_origins,
            rate_limit: RateLimitConfig {
                max_requests,
                window_secs,
            },
            log_format,
        })
    }
}
