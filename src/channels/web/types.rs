//! Request and response DTOs for the LeChat HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::knowledge::RouteCategory;
use crate::lechat::{ChatTurnRequest, PageContext, Preferences};
use crate::llm::ChatMessage;

// --- Chat ---

/// Body of `POST /api/lechat`.
///
/// Accepts the current `{ messages, pageContext, contextPath, preferences }`
/// shape and the older `{ message, conversationHistory, pageContext }` one.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_history: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub page_context: Option<PageContext>,
    #[serde(default)]
    pub context_path: Option<String>,
    #[serde(default)]
    pub preferences: Option<Preferences>,
}

impl ChatRequestBody {
    pub fn into_turn(self) -> ChatTurnRequest {
        let mut messages = self
            .messages
            .or(self.conversation_history)
            .unwrap_or_default();
        if let Some(message) = self.message.filter(|m| !m.trim().is_empty()) {
            messages.push(ChatMessage::user(message));
        }
        ChatTurnRequest {
            messages,
            page_context: self.page_context,
            context_path: self.context_path.filter(|p| !p.trim().is_empty()),
            preferences: self.preferences.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// --- Suggestions ---

#[derive(Debug, Default, Deserialize)]
pub struct SuggestionRequest {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub suggestions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuggestionQuery {
    pub path: Option<String>,
}

// --- Routes ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutesResponse {
    pub generated_at: DateTime<Utc>,
    pub init_message: String,
    pub route_count: usize,
    pub categories: Vec<RouteCategory>,
}

// --- Health ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub channel: &'static str,
    pub llm_configured: bool,
    pub route_count: usize,
    pub uptime_secs: u64,
}
