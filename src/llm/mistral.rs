//! Client for Mistral's OpenAI-compatible chat completions endpoint.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::text::truncate_chars;

/// Upstream error bodies are cut to this many characters before logging.
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: Option<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

pub struct MistralClient {
    client: Client,
    endpoint: Url,
    api_key: SecretString,
    model: String,
}

impl std::fmt::Debug for MistralClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MistralClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl MistralClient {
    /// `base_url` is the API root, e.g. `https://api.mistral.ai/v1`.
    pub fn new(base_url: &Url, api_key: SecretString, model: impl Into<String>) -> Result<Self, LlmError> {
        let mut root = base_url.clone();
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        let endpoint = root
            .join("chat/completions")
            .map_err(|e| LlmError::InvalidEndpoint(e.to_string()))?;

        let client = Client::builder()
            .user_agent(concat!("lechat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: model.into(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl LlmProvider for MistralClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let body = ApiRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request
                .json_mode
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            json_mode = request.json_mode,
            "Sending completion request"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = truncate_chars(&text, MAX_ERROR_BODY_CHARS);
            tracing::error!(status = status.as_u16(), body = %body, "LLM API error");
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ApiResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::{Json, Router, extract::State, http::HeaderMap, http::StatusCode, routing::post};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured {
        bodies: Arc<Mutex<Vec<serde_json::Value>>>,
        auth: Arc<Mutex<Vec<String>>>,
    }

    async fn spawn_stub(status: StatusCode, reply: serde_json::Value) -> (SocketAddr, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(
                    move |State(captured): State<Captured>,
                          headers: HeaderMap,
                          Json(body): Json<serde_json::Value>| {
                        let reply = reply.clone();
                        async move {
                            captured.bodies.lock().unwrap().push(body);
                            if let Some(auth) = headers.get("authorization") {
                                captured
                                    .auth
                                    .lock()
                                    .unwrap()
                                    .push(auth.to_str().unwrap().to_string());
                            }
                            (status, Json(reply))
                        }
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, captured)
    }

    fn client_for(addr: SocketAddr) -> MistralClient {
        let base = Url::parse(&format!("http://{addr}/v1")).unwrap();
        MistralClient::new(&base, SecretString::from("sk-test".to_string()), "mistral-small-latest")
            .unwrap()
    }

    #[test]
    fn endpoint_joins_onto_base_path() {
        let base = Url::parse("https://api.mistral.ai/v1").unwrap();
        let client =
            MistralClient::new(&base, SecretString::from("k".to_string()), "m").unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "https://api.mistral.ai/v1/chat/completions"
        );
    }

    #[test]
    fn debug_output_hides_api_key() {
        let base = Url::parse("https://api.mistral.ai/v1/").unwrap();
        let client =
            MistralClient::new(&base, SecretString::from("sk-secret".to_string()), "m").unwrap();
        assert!(!format!("{client:?}").contains("sk-secret"));
    }

    #[tokio::test]
    async fn complete_returns_first_choice_and_sends_json_mode() {
        let (addr, captured) = spawn_stub(
            StatusCode::OK,
            serde_json::json!({"choices": [{"message": {"content": "Hello!"}}]}),
        )
        .await;
        let client = client_for(addr);

        let text = client
            .complete(
                CompletionRequest::new(vec![ChatMessage::user("hi")])
                    .with_temperature(0.2)
                    .with_max_tokens(150)
                    .json(),
            )
            .await
            .expect("completion");
        assert_eq!(text, "Hello!");

        let bodies = captured.bodies.lock().unwrap();
        assert_eq!(bodies[0]["model"], "mistral-small-latest");
        assert_eq!(bodies[0]["max_tokens"], 150);
        assert_eq!(bodies[0]["response_format"]["type"], "json_object");
        assert_eq!(bodies[0]["messages"][0]["role"], "user");
        assert_eq!(captured.auth.lock().unwrap()[0], "Bearer sk-test");
    }

    #[tokio::test]
    async fn complete_omits_response_format_for_plain_chat() {
        let (addr, captured) = spawn_stub(
            StatusCode::OK,
            serde_json::json!({"choices": [{"message": {"content": "ok"}}]}),
        )
        .await;
        client_for(addr)
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert!(captured.bodies.lock().unwrap()[0].get("response_format").is_none());
    }

    #[tokio::test]
    async fn complete_maps_http_errors() {
        let (addr, _) = spawn_stub(
            StatusCode::UNAUTHORIZED,
            serde_json::json!({"message": "Unauthorized"}),
        )
        .await;
        let err = client_for(addr)
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .expect_err("401 must fail");
        match err {
            LlmError::Upstream { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("Unauthorized"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_rejects_empty_choices() {
        let (addr, _) = spawn_stub(StatusCode::OK, serde_json::json!({"choices": []})).await;
        let err = client_for(addr)
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .expect_err("no choices must fail");
        assert!(matches!(err, LlmError::EmptyResponse));
    }
}
