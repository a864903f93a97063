//! Axum HTTP server for the LeChat API.
//!
//! Handles chat turns, search suggestions, the route summary and health.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State, rejection::BytesRejection},
    http::{HeaderValue, Method, StatusCode, header},
    routing::{get, post},
};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::channels::web::types::*;
use crate::config::{AssistantConfig, RateLimitConfig};
use crate::error::{ChannelError, ChatError, LlmError};
use crate::knowledge::RouteIndex;
use crate::lechat::{ChatReply, ChatService, ChatSettings, SuggestionService, fallback_suggestions};
use crate::llm::LlmProvider;

/// Maximum accepted request body.
const BODY_LIMIT: usize = 64 * 1024;

/// Simple sliding-window rate limiter.
///
/// Tracks the number of requests in the current window. Resets when the window expires.
/// Global rather than per-client; it caps spend on the upstream LLM.
pub struct RateLimiter {
    /// Requests remaining in the current window.
    remaining: AtomicU64,
    /// Epoch second when the current window started.
    window_start: AtomicU64,
    max_requests: u64,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            remaining: AtomicU64::new(max_requests),
            window_start: AtomicU64::new(epoch_secs()),
            max_requests,
            window_secs,
        }
    }

    pub fn from_config(config: RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window_secs)
    }

    /// Try to consume one request. Returns `true` if allowed, `false` if rate limited.
    pub fn check(&self) -> bool {
        if self.max_requests == 0 {
            return false;
        }
        let now = epoch_secs();

        let window = self.window_start.load(Ordering::Acquire);
        if now.saturating_sub(window) >= self.window_secs
            && self
                .window_start
                .compare_exchange(window, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            // Only the request that moved the window refills it
            self.remaining
                .store(self.max_requests - 1, Ordering::Release);
            return true;
        }

        loop {
            let current = self.remaining.load(Ordering::Acquire);
            if current == 0 {
                return false;
            }
            if self
                .remaining
                .compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Shared state for all handlers.
pub struct GatewayState {
    pub chat: ChatService,
    pub suggestions: SuggestionService,
    pub index: Arc<RouteIndex>,
    /// Rate limiter for `POST /api/lechat`.
    pub chat_rate_limiter: RateLimiter,
    /// Shutdown signal sender.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
    /// Server startup time for uptime calculation.
    pub startup_time: std::time::Instant,
}

impl GatewayState {
    pub fn new(
        chat: ChatService,
        suggestions: SuggestionService,
        index: Arc<RouteIndex>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            chat,
            suggestions,
            index,
            chat_rate_limiter: RateLimiter::from_config(rate_limit),
            shutdown_tx: tokio::sync::RwLock::new(None),
            startup_time: std::time::Instant::now(),
        }
    }

    /// Wire services from configuration. `provider` is `None` when no API key is set.
    pub fn from_config(
        config: &AssistantConfig,
        provider: Option<Arc<dyn LlmProvider>>,
        index: Arc<RouteIndex>,
    ) -> Self {
        let chat = ChatService::new(
            provider.clone(),
            Arc::clone(&index),
            ChatSettings::from_config(config),
        );
        let suggestions = SuggestionService::new(
            provider,
            index.route_knowledge.clone(),
            config.suggestion_timeout,
        );
        Self::new(chat, suggestions, index, config.rate_limit)
    }

    /// Ask a running server to stop accepting connections.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Skipping invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::list([header::CONTENT_TYPE]))
}

/// Build the router with every LeChat route and the shared middleware.
pub fn build_router(state: Arc<GatewayState>, allowed_origins: &[String]) -> Router {
    let security_headers = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/lechat", post(chat_handler))
        .route(
            "/api/lechat/suggestions",
            post(suggestions_handler).get(context_suggestions_handler),
        )
        .route("/api/lechat/routes", get(routes_handler))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors_layer(allowed_origins))
        .layer(security_headers)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<GatewayState>,
    allowed_origins: &[String],
) -> Result<SocketAddr, ChannelError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: "lechat".to_string(),
            reason: format!("Failed to bind to {}: {}", addr, e),
        })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ChannelError::StartupFailed {
            name: "lechat".to_string(),
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let app = build_router(Arc::clone(&state), allowed_origins);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("LeChat server shutting down");
            })
            .await
        {
            tracing::error!("LeChat server error: {}", e);
        }
    });

    tracing::info!(addr = %bound_addr, "LeChat server listening");
    Ok(bound_addr)
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map a failed turn to a status and a message safe to show the reader.
fn chat_error_response(err: &ChatError) -> ApiError {
    match err {
        ChatError::EmptyConversation | ChatError::LastMessageNotUser => {
            api_error(StatusCode::BAD_REQUEST, err.to_string())
        }
        ChatError::NotConfigured(_) => api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "The assistant is not configured.",
        ),
        ChatError::Llm(LlmError::Timeout(_)) => api_error(
            StatusCode::GATEWAY_TIMEOUT,
            "The assistant took too long to respond. Please try again.",
        ),
        ChatError::Llm(_) | ChatError::Transport(_) | ChatError::Backend { .. } => api_error(
            StatusCode::BAD_GATEWAY,
            "The assistant is temporarily unavailable. Please try again.",
        ),
        ChatError::Busy => api_error(StatusCode::CONFLICT, err.to_string()),
        ChatError::Aborted | ChatError::Storage(_) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

// --- Health ---

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        channel: "lechat",
        llm_configured: state.chat.is_configured(),
        route_count: state.index.route_count(),
        uptime_secs: state.startup_time.elapsed().as_secs(),
    })
}

// --- Chat ---

/// Turn axum's plain-text body rejection into the JSON error shape.
fn body_rejection_response(rejection: &BytesRejection) -> ApiError {
    let status = rejection.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        api_error(status, "Request body is too large.")
    } else {
        api_error(status, format!("Invalid request body: {}", rejection.body_text()))
    }
}

async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    if !state.chat_rate_limiter.check() {
        return Err(api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Try again shortly.",
        ));
    }

    let body = body.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Unreadable chat request body");
        body_rejection_response(&rejection)
    })?;
    let request: ChatRequestBody = serde_json::from_slice(&body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid request body: {e}")))?;
    let turn = request.into_turn();

    match state.chat.respond(turn).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            let (status, body) = chat_error_response(&e);
            if status.is_server_error() {
                tracing::error!(error = %e, status = status.as_u16(), "Chat turn failed");
            } else {
                tracing::debug!(error = %e, "Rejected chat request");
            }
            Err((status, body))
        }
    }
}

// --- Suggestions ---

/// Always answers 200; anything unusable yields no suggestions.
async fn suggestions_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Bytes, BytesRejection>,
) -> Json<SuggestionResponse> {
    let request: SuggestionRequest = match body {
        Ok(body) => serde_json::from_slice(&body).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Unreadable suggestion request");
            SuggestionRequest::default()
        }),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Unreadable suggestion request body");
            SuggestionRequest::default()
        }
    };
    let suggestions = match request.query {
        Some(query) => state.suggestions.suggest(&query).await,
        None => Vec::new(),
    };
    Json(SuggestionResponse { suggestions })
}

async fn context_suggestions_handler(
    Query(query): Query<SuggestionQuery>,
) -> Json<SuggestionResponse> {
    Json(SuggestionResponse {
        suggestions: fallback_suggestions(query.path.as_deref()),
    })
}

// --- Routes ---

async fn routes_handler(State(state): State<Arc<GatewayState>>) -> Json<RoutesResponse> {
    let index = &state.index;
    Json(RoutesResponse {
        generated_at: index.generated_at,
        init_message: index.init_message.clone(),
        route_count: index.route_count(),
        categories: index.categories.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::lechat::chat::tests::{ScriptedProvider, sample_index};

    fn test_state(provider: Option<Arc<ScriptedProvider>>, rate_limit: u64) -> Arc<GatewayState> {
        let provider = provider.map(|p| p as Arc<dyn LlmProvider>);
        let index = sample_index();
        Arc::new(GatewayState::new(
            ChatService::new(provider.clone(), Arc::clone(&index), ChatSettings::default()),
            SuggestionService::new(provider, "", Duration::from_secs(5)),
            index,
            RateLimitConfig {
                max_requests: rate_limit,
                window_secs: 60,
            },
        ))
    }

    fn body(json: serde_json::Value) -> Result<Bytes, BytesRejection> {
        Ok(Bytes::from(json.to_string()))
    }

    #[test]
    fn rate_limiter_allows_up_to_max() {
        let limiter = RateLimiter::new(3, 60);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn expired_window_is_refilled_once_under_contention() {
        let limiter = Arc::new(RateLimiter::new(5, 60));
        // Push the window into the past so every thread sees it as expired.
        limiter.window_start.store(0, Ordering::SeqCst);
        limiter.remaining.store(0, Ordering::SeqCst);

        let barrier = Arc::new(std::sync::Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    (0..4).filter(|_| limiter.check()).count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(allowed <= 5, "allowed {allowed} requests in one window");
        assert!(allowed >= 1);
    }

    #[test]
    fn rate_limiter_with_zero_budget_rejects() {
        assert!(!RateLimiter::new(0, 60).check());
    }

    #[test]
    fn error_statuses() {
        let cases = [
            (ChatError::EmptyConversation, StatusCode::BAD_REQUEST),
            (ChatError::LastMessageNotUser, StatusCode::BAD_REQUEST),
            (
                ChatError::NotConfigured("no key".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ChatError::Llm(LlmError::Timeout(Duration::from_secs(25))),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (ChatError::Llm(LlmError::EmptyResponse), StatusCode::BAD_GATEWAY),
            (ChatError::Busy, StatusCode::CONFLICT),
        ];
        for (err, expected) in cases {
            assert_eq!(chat_error_response(&err).0, expected, "{err}");
        }
    }

    #[tokio::test]
    async fn chat_handler_returns_resolved_reply() {
        let provider = Arc::new(ScriptedProvider::reply(
            "Sure.\n**NAVIGATE:** `/vision`",
        ));
        let state = test_state(Some(provider), 30);

        let Json(reply) = chat_handler(
            State(state),
            body(serde_json::json!({
                "messages": [{"role": "user", "content": "open the vision page"}]
            })),
        )
        .await
        .expect("chat reply");

        assert_eq!(reply.content, "Sure.");
        assert_eq!(reply.navigate_to.as_deref(), Some("/capabilities/vision"));
    }

    #[tokio::test]
    async fn chat_handler_rejects_malformed_and_empty_bodies() {
        let state = test_state(Some(Arc::new(ScriptedProvider::reply("x"))), 30);

        let err = chat_handler(State(Arc::clone(&state)), Ok(Bytes::from_static(b"{nope")))
            .await
            .expect_err("malformed body");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(err.1.error.starts_with("Invalid request body"));

        let err = chat_handler(State(state), body(serde_json::json!({"messages": []})))
            .await
            .expect_err("empty conversation");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_handler_without_key_is_unavailable() {
        let state = test_state(None, 30);
        let err = chat_handler(State(state), body(serde_json::json!({"message": "hi"})))
            .await
            .expect_err("not configured");
        assert_eq!(err.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn chat_handler_rate_limits() {
        let state = test_state(Some(Arc::new(ScriptedProvider::reply("one"))), 1);
        let request = serde_json::json!({"message": "hi"});
        chat_handler(State(Arc::clone(&state)), body(request.clone()))
            .await
            .expect("first request");
        let err = chat_handler(State(state), body(request))
            .await
            .expect_err("second request");
        assert_eq!(err.0, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn suggestions_handler_is_lenient() {
        let provider = Arc::new(ScriptedProvider::reply(r#"{"suggestions":["How do I use vision?"]}"#));
        let state = test_state(Some(provider), 30);

        let Json(res) = suggestions_handler(
            State(Arc::clone(&state)),
            body(serde_json::json!({"query": "vision"})),
        )
        .await;
        assert_eq!(res.suggestions, vec!["How do I use vision?"]);

        let Json(res) = suggestions_handler(State(Arc::clone(&state)), Ok(Bytes::from_static(b"garbage"))).await;
        assert!(res.suggestions.is_empty());

        let Json(res) =
            suggestions_handler(State(state), body(serde_json::json!({"query": 42}))).await;
        assert!(res.suggestions.is_empty());
    }

    #[tokio::test]
    async fn context_suggestions_follow_path() {
        let Json(res) = context_suggestions_handler(Query(SuggestionQuery {
            path: Some("/capabilities/function_calling".to_string()),
        }))
        .await;
        assert_eq!(res.suggestions[0], "How do I define tools?");
    }

    #[tokio::test]
    async fn routes_and_health_describe_index() {
        let state = test_state(None, 30);
        let Json(routes) = routes_handler(State(Arc::clone(&state))).await;
        assert_eq!(routes.route_count, 4);
        assert!(!routes.categories.is_empty());

        let Json(health) = health_handler(State(state)).await;
        assert_eq!(health.status, "healthy");
        assert!(!health.llm_configured);
        assert_eq!(health.route_count, 4);
    }
}
