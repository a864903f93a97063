//! Where the controller sends chat turns.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::ChatError;
use crate::lechat::chat::{ChatReply, ChatService, ChatTurnRequest};

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(&self, request: ChatTurnRequest) -> Result<ChatReply, ChatError>;
}

#[async_trait]
impl ChatBackend for ChatService {
    async fn send(&self, request: ChatTurnRequest) -> Result<ChatReply, ChatError> {
        self.respond(request).await
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Talks to a running server's `/api/lechat` endpoint.
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpChatBackend {
    pub fn new(base_url: &Url) -> Result<Self, url::ParseError> {
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: base_url.join("/api/lechat")?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn send(&self, request: ChatTurnRequest) -> Result<ChatReply, ChatError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(ChatError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or_else(|_| crate::text::truncate_chars(&text, 200));
            return Err(ChatError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        response.json::<ChatReply>().await.map_err(ChatError::Transport)
    }
}
