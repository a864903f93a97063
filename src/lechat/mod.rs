//! The LeChat assistant: chat turns, directives, suggestions and the client
//! controller.

pub mod backend;
pub mod chat;
pub mod controller;
pub mod directive;
mod preferences;
pub mod prompt;
pub mod resolve;
pub mod storage;
pub mod suggestions;

pub use backend::{ChatBackend, HttpChatBackend};
pub use chat::{ChatReply, ChatService, ChatSettings, ChatTurnRequest, PageContext, trim_history};
pub use controller::{ChatController, ControllerStatus, PendingTurn, Session, TurnOutcome, TurnResult};
pub use directive::{ParsedReply, parse_directives};
pub use preferences::{PreferencePatch, Preferences};
pub use resolve::{Resolution, ResolutionKind, RouteResolver};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use suggestions::{SuggestionConfig, SuggestionService, fallback_suggestions};
