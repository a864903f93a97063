//! Error types for the assistant backend.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Environment variable {key} is not valid unicode")]
    NotUnicode { key: String },
}

/// Errors talking to the hosted LLM.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("LLM returned no content")]
    EmptyResponse,

    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid LLM endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Route index build and load errors.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Failed to read route index {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write route index {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Route index {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize route index: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Key-value persistence errors for the chat controller.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error for key '{key}': {source}")]
    Io {
        key: String,
        source: std::io::Error,
    },

    #[error("Stored value for '{key}' could not be decoded: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },

    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),
}

/// HTTP channel lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },
}

/// Failures of a single chat turn.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Conversation is empty")]
    EmptyConversation,

    #[error("Last message must come from the user")]
    LastMessageNotUser,

    #[error("Assistant is not configured: {0}")]
    NotConfigured(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Chat backend unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Chat backend returned HTTP {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("A reply is already in progress")]
    Busy,

    #[error("Request was stopped")]
    Aborted,

    #[error(transparent)]
    Storage(#[from] StorageError),
}
