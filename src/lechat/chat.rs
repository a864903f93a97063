//! One chat turn: prompt assembly, the LLM call, and directive handling.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{AssistantConfig, RouteKnowledgeMode};
use crate::error::{ChatError, LlmError};
use crate::knowledge::RouteIndex;
use crate::lechat::directive::parse_directives;
use crate::lechat::preferences::{PreferencePatch, Preferences};
use crate::lechat::prompt::{PromptContext, build_system_prompt, wants_route_knowledge};
use crate::lechat::resolve::RouteResolver;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, Role};
use crate::text::clip_chars;

const CHAT_TEMPERATURE: f32 = 0.7;
const CHAT_MAX_TOKENS: u32 = 1000;

/// The page the reader has open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub title: String,
    pub url: String,
}

/// What the client sends for a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_context: Option<PageContext>,
    /// Page pinned with a previous `SET_CONTEXT:`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_path: Option<String>,
    #[serde(default)]
    pub preferences: Preferences,
}

/// What the client receives. Routes here are always known routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub content: String,
    #[serde(default)]
    pub navigate_to: Option<String>,
    #[serde(default)]
    pub set_context: Option<String>,
    #[serde(default)]
    pub set_preference: Option<PreferencePatch>,
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub site_name: String,
    pub timeout: Duration,
    pub history_limit: usize,
    pub max_message_chars: usize,
    pub route_knowledge: RouteKnowledgeMode,
}

impl ChatSettings {
    pub fn from_config(config: &AssistantConfig) -> Self {
        Self {
            site_name: config.site_name.clone(),
            timeout: config.chat_timeout,
            history_limit: config.history_limit,
            max_message_chars: config.max_message_chars,
            route_knowledge: config.route_knowledge,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            site_name: crate::config::DEFAULT_SITE_NAME.to_string(),
            timeout: Duration::from_secs(25),
            history_limit: 10,
            max_message_chars: 4000,
            route_knowledge: RouteKnowledgeMode::Auto,
        }
    }
}

/// Keep the tail of a client-supplied conversation that is safe to forward.
///
/// Client `system` turns and blank turns are dropped, the last `limit` turns
/// are kept, and each is cut to `max_chars` characters. The window never
/// starts with an assistant turn and must end with a user turn.
pub fn trim_history(
    messages: &[ChatMessage],
    limit: usize,
    max_chars: usize,
) -> Result<Vec<ChatMessage>, ChatError> {
    let usable: Vec<&ChatMessage> = messages
        .iter()
        .filter(|m| m.role != Role::System && !m.content.trim().is_empty())
        .collect();

    let last = usable.last().ok_or(ChatError::EmptyConversation)?;
    if last.role != Role::User {
        return Err(ChatError::LastMessageNotUser);
    }

    let start = usable.len().saturating_sub(limit.max(1));
    let window = usable[start..]
        .iter()
        .skip_while(|m| m.role == Role::Assistant)
        .map(|m| ChatMessage {
            role: m.role,
            content: clip_chars(m.content.trim(), max_chars).to_string(),
        })
        .collect();
    Ok(window)
}

/// Stateless chat handler shared by the HTTP endpoint and in-process clients.
pub struct ChatService {
    provider: Option<Arc<dyn LlmProvider>>,
    index: Arc<RouteIndex>,
    resolver: RouteResolver,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        index: Arc<RouteIndex>,
        settings: ChatSettings,
    ) -> Self {
        let resolver = RouteResolver::from_index(&index);
        Self {
            provider,
            index,
            resolver,
            settings,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// Build the exact message list sent to the model for `request`.
    pub fn prepare(&self, request: &ChatTurnRequest) -> Result<Vec<ChatMessage>, ChatError> {
        let history = trim_history(
            &request.messages,
            self.settings.history_limit,
            self.settings.max_message_chars,
        )?;

        let context_path = request
            .context_path
            .as_deref()
            .and_then(|raw| self.resolver.resolve(raw))
            .map(|r| r.path);
        let context_page = context_path
            .as_deref()
            .map(|path| (path, self.index.title_for(path)));

        let latest = history
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let include_routes = !self.resolver.is_empty()
            && wants_route_knowledge(
                self.settings.route_knowledge,
                latest,
                context_page.is_some(),
            );

        let system = build_system_prompt(&PromptContext {
            site_name: &self.settings.site_name,
            page: request.page_context.as_ref(),
            context_page,
            preferences: request.preferences,
            route_knowledge: include_routes.then_some(self.index.route_knowledge.as_str()),
        });

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend(history);
        Ok(messages)
    }

    pub async fn respond(&self, request: ChatTurnRequest) -> Result<ChatReply, ChatError> {
        let messages = self.prepare(&request)?;
        let provider = self.provider.as_ref().ok_or_else(|| {
            ChatError::NotConfigured("no LLM API key is set".to_string())
        })?;

        let completion = CompletionRequest::new(messages)
            .with_temperature(CHAT_TEMPERATURE)
            .with_max_tokens(CHAT_MAX_TOKENS);
        let raw = tokio::time::timeout(self.settings.timeout, provider.complete(completion))
            .await
            .map_err(|_| LlmError::Timeout(self.settings.timeout))??;

        Ok(self.interpret(&raw))
    }

    /// Turn raw model text into a reply with validated routes.
    pub fn interpret(&self, raw: &str) -> ChatReply {
        let parsed = parse_directives(raw);
        let navigate_to = parsed
            .navigate
            .as_deref()
            .and_then(|route| self.resolver.resolve(route))
            .map(|r| r.path);
        let set_context = parsed
            .set_context
            .as_deref()
            .and_then(|route| self.resolver.resolve(route))
            .map(|r| r.path);

        if navigate_to.is_some() || set_context.is_some() || parsed.set_preference.is_some() {
            tracing::info!(
                navigate_to = ?navigate_to,
                set_context = ?set_context,
                set_preference = ?parsed.set_preference,
                "Model reply carried directives"
            );
        }

        ChatReply {
            content: parsed.content,
            navigate_to,
            set_context,
            set_preference: parsed.set_preference,
        }
    }
}
