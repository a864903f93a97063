//! Query completions for the docs search box.
//!
//! Live suggestions come from the LLM in strict JSON mode. Models still
//! return fenced blocks, bare arrays or odd keys, so parsing is lenient and
//! every failure degrades to an empty list.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::text::collapse_whitespace;

pub const MAX_SUGGESTIONS: usize = 3;
const MAX_QUERY_CHARS: usize = 280;
const SUGGESTION_TEMPERATURE: f32 = 0.2;
const SUGGESTION_MAX_TOKENS: u32 = 150;
const CACHE_CAPACITY: usize = 256;

/// Trim, collapse whitespace and cap a raw search query.
pub fn sanitize_query(query: &str) -> String {
    collapse_whitespace(query.trim())
        .chars()
        .take(MAX_QUERY_CHARS)
        .collect()
}

pub fn build_suggestion_messages(query: &str, route_knowledge: &str) -> Vec<ChatMessage> {
    let system = format!(
        "You are an expert search assistant for the documentation.\n\
         Your goal is to predict the most likely \"how-to\" or \"concept\" question a user is \
         trying to ask based on their partial input.\n\n\
         Documentation map:\n{route_knowledge}\n\n\
         Rules:\n\
         - Generate 3-5 high-quality, precise questions that are likely to be \"Frequently Asked Questions\".\n\
         - Questions MUST be relevant to the documentation map above.\n\
         - Phrasing should be natural and professional (e.g., \"How do I...\", \"What is...\", \"Best practices for...\").\n\
         - Cover different angles (implementation, concept, troubleshooting) if the query is ambiguous.\n\
         - Ignore queries about general trivia, sports, or other vendors.\n\
         - STRICT JSON OUTPUT: {{\"suggestions\":[\"Question 1\", \"Question 2\", ...], \"verdict\":\"on_topic\"|\"off_topic\"}}.\n\
         - If the query is completely unrelated to the documentation, set verdict to \"off_topic\" and suggestions to []."
    );
    let user = format!(
        "User query: \"{}\". Generate up to {MAX_SUGGESTIONS} suggestions.",
        sanitize_query(query)
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

fn non_empty_strings(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_SUGGESTIONS)
        .map(str::to_string)
        .collect()
}

/// Strip a surrounding Markdown code fence, if any.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_suggestion_payload(payload: &Value) -> Vec<String> {
    match payload {
        Value::Array(items) => non_empty_strings(items),
        Value::String(text) => match serde_json::from_str::<Value>(strip_fence(text)) {
            Ok(inner) => parse_suggestion_payload(&inner),
            Err(e) => {
                tracing::debug!(error = %e, "Suggestion payload is not JSON");
                Vec::new()
            }
        },
        Value::Object(map) => {
            if map.get("verdict").and_then(Value::as_str) == Some("off_topic") {
                return Vec::new();
            }
            if let Some(Value::Array(items)) = map.get("suggestions") {
                return non_empty_strings(items);
            }
            map.values()
                .find_map(Value::as_array)
                .map(|items| non_empty_strings(items))
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// Parse raw completion text.
pub fn parse_suggestion_text(raw: &str) -> Vec<String> {
    parse_suggestion_payload(&Value::String(raw.to_string()))
}

/// Live suggestions backed by the LLM, cached per normalized query.
pub struct SuggestionService {
    provider: Option<Arc<dyn LlmProvider>>,
    route_knowledge: String,
    timeout: Duration,
    cache: Mutex<LruCache<String, Vec<String>>>,
}

impl SuggestionService {
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        route_knowledge: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            route_knowledge: route_knowledge.into(),
            timeout,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Never fails; errors are logged and yield no suggestions.
    pub async fn suggest(&self, query: &str) -> Vec<String> {
        let sanitized = sanitize_query(query);
        if sanitized.is_empty() {
            return Vec::new();
        }
        let Some(provider) = &self.provider else {
            tracing::debug!("Suggestions requested without an LLM provider");
            return Vec::new();
        };

        let key = sanitized.to_lowercase();
        if let Ok(mut cache) = self.cache.lock()
            && let Some(hit) = cache.get(&key)
        {
            return hit.clone();
        }

        match self.fetch(provider.as_ref(), &sanitized).await {
            Ok(suggestions) if suggestions.is_empty() => {
                tracing::debug!(query = %sanitized, "LLM returned no usable suggestions");
                suggestions
            }
            Ok(suggestions) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.put(key, suggestions.clone());
                }
                suggestions
            }
            Err(e) => {
                tracing::warn!(error = %e, "Suggestion request failed");
                Vec::new()
            }
        }
    }

    async fn fetch(&self, provider: &dyn LlmProvider, query: &str) -> Result<Vec<String>, LlmError> {
        let request = CompletionRequest::new(build_suggestion_messages(query, &self.route_knowledge))
            .with_temperature(SUGGESTION_TEMPERATURE)
            .with_max_tokens(SUGGESTION_MAX_TOKENS)
            .json();
        let raw = tokio::time::timeout(self.timeout, provider.complete(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;
        Ok(parse_suggestion_text(&raw))
    }
}

const GENERAL_SUGGESTIONS: &[&str] = &[
    "What is the Mistral Platform?",
    "How do I generate an API key?",
    "Can fine-tuning improve my model performance?",
];

const API_SUGGESTIONS: &[&str] = &[
    "How do I use the Chat Completions API?",
    "What are the rate limits?",
    "Show me an example of Function Calling",
];

const COOKBOOK_SUGGESTIONS: &[&str] = &[
    "How do I use RAG with Mistral?",
    "Example of tool calling with LangChain",
    "How to do fine-tuning on a custom dataset?",
];

const PAGE_SUGGESTIONS: &[(&str, &[&str])] = &[
    (
        "/capabilities/vision",
        &[
            "How do I pass an image URL?",
            "What image formats are supported?",
            "Show me a code example for Vision",
        ],
    ),
    (
        "/capabilities/function_calling",
        &[
            "How do I define tools?",
            "What is the JSON mode?",
            "Can I use function calling with streaming?",
        ],
    ),
    (
        "/deployment/cloud/azure",
        &[
            "How do I deploy on Azure?",
            "What models are available on Azure?",
            "Pricing for Azure deployment",
        ],
    ),
];

/// Static suggestions shown before the reader types anything.
#[derive(Debug, Clone, Copy)]
pub struct SuggestionConfig {
    pub default: &'static [&'static str],
    /// `(path prefix, suggestions)`; first match wins.
    pub sections: &'static [(&'static str, &'static [&'static str])],
    pub page_overrides: &'static [(&'static str, &'static [&'static str])],
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            default: GENERAL_SUGGESTIONS,
            sections: &[("/api", API_SUGGESTIONS), ("/cookbooks", COOKBOOK_SUGGESTIONS)],
            page_overrides: PAGE_SUGGESTIONS,
        }
    }
}

impl SuggestionConfig {
    pub fn for_path(&self, pathname: Option<&str>) -> &'static [&'static str] {
        let Some(path) = pathname else {
            return self.default;
        };
        if let Some((_, overrides)) = self.page_overrides.iter().find(|(p, _)| *p == path) {
            return overrides;
        }
        self.sections
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map_or(self.default, |(_, suggestions)| suggestions)
    }
}

pub fn fallback_suggestions(pathname: Option<&str>) -> Vec<String> {
    SuggestionConfig::default()
        .for_path(pathname)
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::lechat::chat::tests::ScriptedProvider;
    use crate::llm::Role;

    #[test]
    fn messages_sanitize_query() {
        let long = format!("  how   do\n\tI {}", "a".repeat(400));
        let messages = build_suggestion_messages(&long, "Api: /api");
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Documentation map:\nApi: /api"));
        let user = &messages[1].content;
        assert!(user.starts_with("User query: \"how do I aaa"));
        assert!(user.ends_with("\". Generate up to 3 suggestions."));
        let quoted = user
            .strip_prefix("User query: \"")
            .and_then(|s| s.split_once('"'))
            .map(|(q, _)| q)
            .unwrap();
        assert_eq!(quoted.chars().count(), 280);
    }

    #[test]
    fn payload_shapes() {
        assert_eq!(
            parse_suggestion_payload(&json!(["a", "", "  ", 3, "b", "c", "d"])),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            parse_suggestion_payload(&json!({"suggestions": ["x"], "verdict": "on_topic"})),
            vec!["x"]
        );
        assert_eq!(
            parse_suggestion_payload(&json!({"questions": ["q1", "q2"]})),
            vec!["q1", "q2"]
        );
        assert!(parse_suggestion_payload(&json!({"suggestions": ["x"], "verdict": "off_topic"})).is_empty());
        assert!(parse_suggestion_payload(&json!(null)).is_empty());
        assert!(parse_suggestion_payload(&json!(42)).is_empty());
    }

    #[test]
    fn text_payloads_tolerate_fences_and_garbage() {
        assert_eq!(
            parse_suggestion_text("```json\n{\"suggestions\": [\"How do I stream?\"]}\n```"),
            vec!["How do I stream?"]
        );
        assert_eq!(parse_suggestion_text("[\"one\"]"), vec!["one"]);
        assert_eq!(
            parse_suggestion_text("\"[\\\"nested\\\"]\""),
            vec!["nested"]
        );
        assert!(parse_suggestion_text("Sure! Here are some ideas").is_empty());
        assert!(parse_suggestion_text("\"just a string\"").is_empty());
    }

    #[test]
    fn static_suggestions_by_path() {
        assert_eq!(
            fallback_suggestions(Some("/capabilities/vision"))[0],
            "How do I pass an image URL?"
        );
        assert_eq!(
            fallback_suggestions(Some("/api/endpoint/chat"))[0],
            "How do I use the Chat Completions API?"
        );
        assert_eq!(
            fallback_suggestions(Some("/cookbooks/rag"))[0],
            "How do I use RAG with Mistral?"
        );
        assert_eq!(fallback_suggestions(Some("/guides")), fallback_suggestions(None));
        assert_eq!(fallback_suggestions(None).len(), 3);
    }

    #[tokio::test]
    async fn suggest_calls_llm_in_json_mode_and_caches() {
        let provider = Arc::new(ScriptedProvider::reply(
            r#"{"suggestions":["How do I use embeddings?","What is RAG?"],"verdict":"on_topic"}"#,
        ));
        let service = SuggestionService::new(Some(provider.clone()), "Api: /api", Duration::from_secs(5));

        let first = service.suggest("  Embeddings ").await;
        assert_eq!(first, vec!["How do I use embeddings?", "What is RAG?"]);
        let second = service.suggest("embeddings").await;
        assert_eq!(second, first);

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].json_mode);
        assert_eq!(seen[0].max_tokens, 150);
        assert!((seen[0].temperature - 0.2).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn suggest_degrades_to_empty() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(LlmError::Upstream {
            status: 500,
            body: "boom".to_string(),
        })]));
        let service = SuggestionService::new(Some(provider.clone()), "", Duration::from_secs(5));
        assert!(service.suggest("vision").await.is_empty());
        assert!(service.suggest("   ").await.is_empty());
        assert_eq!(provider.seen.lock().unwrap().len(), 1);

        let unconfigured = SuggestionService::new(None, "", Duration::from_secs(5));
        assert!(unconfigured.suggest("vision").await.is_empty());
    }

    #[tokio::test]
    async fn unusable_replies_are_not_cached() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("not json at all".to_string()),
            Ok(r#"{"suggestions":["How do I call the vision API?"]}"#.to_string()),
        ]));
        let service = SuggestionService::new(Some(provider.clone()), "", Duration::from_secs(5));

        assert!(service.suggest("vision").await.is_empty());
        assert_eq!(
            service.suggest("vision").await,
            vec!["How do I call the vision API?"]
        );
        assert_eq!(provider.seen.lock().unwrap().len(), 2);
    }
}
