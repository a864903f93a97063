//! Client-side chat state: sessions, the in-flight turn, navigation and
//! persisted preferences.
//!
//! The controller is synchronous. A turn is split into [`ChatController::begin_turn`],
//! [`PendingTurn::run`] and [`ChatController::finish_turn`] so a UI can keep
//! the controller available (for [`ChatController::stop`]) while the request
//! is in flight. [`ChatController::send_message`] chains the three when that
//! is not needed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, StorageError};
use crate::knowledge::RouteIndex;
use crate::lechat::backend::ChatBackend;
use crate::lechat::chat::{ChatReply, ChatTurnRequest, PageContext};
use crate::lechat::preferences::{PreferencePatch, Preferences};
use crate::lechat::storage::{KeyValueStore, load_json, save_json};
use crate::llm::{ChatMessage, Role};
use crate::text::{collapse_whitespace, truncate_chars};

pub const SESSIONS_KEY: &str = "lechat_sessions";
pub const ACTIVE_SESSION_KEY: &str = "lechat_active_session";
pub const PREFERENCES_KEY: &str = "lechat_preferences";

pub const MAX_SESSIONS: usize = 20;
const TITLE_MAX_CHARS: usize = 40;
pub const DEFAULT_SESSION_TITLE: &str = "New chat";

/// Title for a conversation: its first user message, shortened.
pub fn session_title(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| collapse_whitespace(&m.content))
        .filter(|t| !t.is_empty())
        .map(|t| truncate_chars(&t, TITLE_MAX_CHARS))
        .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_SESSION_TITLE.to_string(),
            messages: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.title = session_title(&self.messages);
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerStatus {
    Ready,
    Loading { turn_id: u64 },
    /// A reply asked to move to `target`; cleared by
    /// [`ChatController::complete_navigation`].
    Navigating { target: String, title: Option<String> },
}

/// A turn that has been started but not sent.
#[derive(Debug)]
pub struct PendingTurn {
    pub turn_id: u64,
    pub request: ChatTurnRequest,
    registration: AbortRegistration,
}

impl PendingTurn {
    /// Send the turn. Resolves early with [`ChatError::Aborted`] after
    /// [`ChatController::stop`].
    pub async fn run(self, backend: &dyn ChatBackend) -> TurnResult {
        let result = Abortable::new(backend.send(self.request), self.registration)
            .await
            .unwrap_or(Err(ChatError::Aborted));
        TurnResult {
            turn_id: self.turn_id,
            result,
        }
    }
}

#[derive(Debug)]
pub struct TurnResult {
    pub turn_id: u64,
    pub result: Result<ChatReply, ChatError>,
}

/// What [`ChatController::finish_turn`] did with a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Superseded by a newer turn or a session change; ignored.
    Stale,
    /// The reader pressed stop; ignored.
    Stopped,
    Answered { navigate_to: Option<String> },
    Failed { message: String },
}

struct InFlight {
    turn_id: u64,
    session_id: String,
    abort: AbortHandle,
}

pub struct ChatController {
    store: Arc<dyn KeyValueStore>,
    sessions: Vec<Session>,
    active_id: String,
    preferences: Preferences,
    page_context: Option<PageContext>,
    context_path: Option<String>,
    route_titles: HashMap<String, String>,
    status: ControllerStatus,
    error: Option<String>,
    open: bool,
    next_turn_id: u64,
    in_flight: Option<InFlight>,
    stopped_turn: Option<u64>,
}

impl ChatController {
    /// Restore state from `store`. Undecodable entries are logged and
    /// replaced with defaults; I/O failures are returned.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, ChatError> {
        let mut sessions: Vec<Session> =
            decode_or_default(load_json(store.as_ref(), SESSIONS_KEY), SESSIONS_KEY)?;
        let preferences: Preferences =
            decode_or_default(load_json(store.as_ref(), PREFERENCES_KEY), PREFERENCES_KEY)?;
        let active: Option<String> =
            decode_or_default(load_json(store.as_ref(), ACTIVE_SESSION_KEY), ACTIVE_SESSION_KEY)?;

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(MAX_SESSIONS);

        let active_id = match active.filter(|id| sessions.iter().any(|s| &s.id == id)) {
            Some(id) => id,
            None => match sessions.first() {
                Some(session) => session.id.clone(),
                None => {
                    let session = Session::new();
                    let id = session.id.clone();
                    sessions.push(session);
                    id
                }
            },
        };

        tracing::debug!(sessions = sessions.len(), "Restored chat state");
        Ok(Self {
            store,
            sessions,
            active_id,
            preferences,
            page_context: None,
            context_path: None,
            route_titles: HashMap::new(),
            status: ControllerStatus::Ready,
            error: None,
            open: false,
            next_turn_id: 1,
            in_flight: None,
            stopped_turn: None,
        })
    }

    /// Use page titles from `index` when announcing navigation.
    pub fn with_route_titles(mut self, index: &RouteIndex) -> Self {
        self.route_titles = index
            .categories
            .iter()
            .flat_map(|c| c.routes.iter())
            .filter_map(|r| Some((r.path.clone(), r.title.clone()?)))
            .collect();
        self
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == self.active_id)
    }

    pub fn active_session_id(&self) -> &str {
        &self.active_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.active_session()
            .map(|s| s.messages.as_slice())
            .unwrap_or_default()
    }

    pub fn preferences(&self) -> Preferences {
        self.preferences
    }

    pub fn page_context(&self) -> Option<&PageContext> {
        self.page_context.as_ref()
    }

    pub fn context_path(&self) -> Option<&str> {
        self.context_path.as_deref()
    }

    pub fn status(&self) -> &ControllerStatus {
        &self.status
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, ControllerStatus::Loading { .. })
    }

    /// Message of the last failed turn, cleared by the next turn.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn open_panel(&mut self) {
        self.open = true;
    }

    pub fn close_panel(&mut self) {
        self.open = false;
    }

    /// Start a fresh conversation, reusing the active one when it is empty.
    pub fn new_session(&mut self) -> &str {
        self.stop();
        self.context_path = None;
        self.error = None;
        if self.active_session().is_some_and(Session::is_empty) {
            return &self.active_id;
        }

        let session = Session::new();
        self.active_id = session.id.clone();
        self.sessions.insert(0, session);
        self.sessions.truncate(MAX_SESSIONS);
        self.persist();
        &self.active_id
    }

    pub fn switch_session(&mut self, id: &str) -> bool {
        if !self.sessions.iter().any(|s| s.id == id) {
            return false;
        }
        if id != self.active_id {
            self.stop();
            self.active_id = id.to_string();
            self.context_path = None;
            self.error = None;
            self.persist();
        }
        true
    }

    pub fn delete_session(&mut self, id: &str) -> bool {
        let Some(pos) = self.sessions.iter().position(|s| s.id == id) else {
            return false;
        };
        if self.in_flight.as_ref().is_some_and(|f| f.session_id == id) {
            self.stop();
        }
        self.sessions.remove(pos);

        if id == self.active_id {
            self.context_path = None;
            self.error = None;
            match self.sessions.first() {
                Some(next) => self.active_id = next.id.clone(),
                None => {
                    let session = Session::new();
                    self.active_id = session.id.clone();
                    self.sessions.push(session);
                }
            }
        }
        self.persist();
        true
    }

    pub fn clear_messages(&mut self) {
        self.stop();
        self.error = None;
        self.context_path = None;
        if let Some(session) = self.active_session_mut() {
            session.messages.clear();
            session.title = DEFAULT_SESSION_TITLE.to_string();
            session.updated_at = Utc::now();
        }
        self.persist();
    }

    pub fn set_page_context(&mut self, context: Option<PageContext>) {
        self.page_context = context;
    }

    /// Apply a preference change and persist it. Returns whether anything changed.
    pub fn set_preferences(&mut self, patch: &PreferencePatch) -> bool {
        let changed = self.preferences.apply(patch);
        if changed {
            self.persist_preferences();
        }
        changed
    }

    /// Record the reader's message and produce the request to send.
    pub fn begin_turn(&mut self, text: &str) -> Result<PendingTurn, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyConversation);
        }
        if self.is_loading() {
            return Err(ChatError::Busy);
        }

        let session_id = self.active_id.clone();
        let messages = {
            let session = self.active_session_mut().ok_or(ChatError::EmptyConversation)?;
            session.push(ChatMessage::user(text));
            session.messages.clone()
        };
        self.sort_sessions();
        self.persist();

        let turn_id = self.next_turn_id;
        self.next_turn_id += 1;
        let (abort, registration) = AbortHandle::new_pair();
        self.in_flight = Some(InFlight {
            turn_id,
            session_id,
            abort,
        });
        self.status = ControllerStatus::Loading { turn_id };
        self.error = None;

        Ok(PendingTurn {
            turn_id,
            request: ChatTurnRequest {
                messages,
                page_context: self.page_context.clone(),
                context_path: self.context_path.clone(),
                preferences: self.preferences,
            },
            registration,
        })
    }

    pub fn finish_turn(&mut self, result: TurnResult) -> TurnOutcome {
        let current = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.turn_id == result.turn_id);
        if !current {
            return if self.stopped_turn == Some(result.turn_id) {
                TurnOutcome::Stopped
            } else {
                tracing::debug!(turn_id = result.turn_id, "Ignoring stale chat turn");
                TurnOutcome::Stale
            };
        }
        let Some(in_flight) = self.in_flight.take() else {
            return TurnOutcome::Stale;
        };
        self.status = ControllerStatus::Ready;

        let reply = match result.result {
            Ok(reply) => reply,
            Err(ChatError::Aborted) => return TurnOutcome::Stopped,
            Err(e) => {
                tracing::warn!(error = %e, "Chat turn failed");
                let message = e.to_string();
                self.error = Some(message.clone());
                return TurnOutcome::Failed { message };
            }
        };

        if let Some(session) = self.sessions.iter_mut().find(|s| s.id == in_flight.session_id) {
            session.push(ChatMessage::assistant(reply.content));
            self.sort_sessions();
            self.persist();
        }

        if let Some(path) = reply.set_context {
            self.context_path = Some(path);
        }
        if let Some(patch) = reply.set_preference {
            self.set_preferences(&patch);
        }
        if let Some(target) = &reply.navigate_to {
            self.status = ControllerStatus::Navigating {
                target: target.clone(),
                title: self.route_titles.get(target).cloned(),
            };
        }

        TurnOutcome::Answered {
            navigate_to: reply.navigate_to,
        }
    }

    /// Abort the in-flight turn, if any. No assistant message is added.
    pub fn stop(&mut self) -> bool {
        let Some(in_flight) = self.in_flight.take() else {
            return false;
        };
        in_flight.abort.abort();
        self.stopped_turn = Some(in_flight.turn_id);
        self.status = ControllerStatus::Ready;
        tracing::debug!(turn_id = in_flight.turn_id, "Stopped chat turn");
        true
    }

    pub async fn send_message(
        &mut self,
        backend: &dyn ChatBackend,
        text: &str,
    ) -> Result<TurnOutcome, ChatError> {
        let pending = self.begin_turn(text)?;
        let result = pending.run(backend).await;
        Ok(self.finish_turn(result))
    }

    /// Acknowledge that navigation happened. Returns the target.
    pub fn complete_navigation(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.status, ControllerStatus::Ready) {
            ControllerStatus::Navigating { target, .. } => Some(target),
            other => {
                self.status = other;
                None
            }
        }
    }

    /// Write sessions, active session and preferences to the store.
    pub fn save(&self) -> Result<(), StorageError> {
        save_json(self.store.as_ref(), SESSIONS_KEY, &self.sessions)?;
        save_json(self.store.as_ref(), ACTIVE_SESSION_KEY, &self.active_id)?;
        save_json(self.store.as_ref(), PREFERENCES_KEY, &self.preferences)
    }

    fn active_session_mut(&mut self) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == self.active_id)
    }

    fn sort_sessions(&mut self) {
        self.sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        self.sessions.truncate(MAX_SESSIONS);
    }

    fn persist(&self) {
        let result = save_json(self.store.as_ref(), SESSIONS_KEY, &self.sessions)
            .and_then(|()| save_json(self.store.as_ref(), ACTIVE_SESSION_KEY, &self.active_id));
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist chat sessions");
        }
    }

    fn persist_preferences(&self) {
        if let Err(e) = save_json(self.store.as_ref(), PREFERENCES_KEY, &self.preferences) {
            tracing::warn!(error = %e, "Failed to persist chat preferences");
        }
    }
}

fn decode_or_default<T: Default>(
    loaded: Result<Option<T>, StorageError>,
    key: &str,
) -> Result<T, StorageError> {
    match loaded {
        Ok(value) => Ok(value.unwrap_or_default()),
        Err(StorageError::Decode { source, .. }) => {
            tracing::warn!(key, error = %source, "Discarding unreadable chat state");
            Ok(T::default())
        }
        Err(e) => Err(e),
    }
}
