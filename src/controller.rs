//! Session state and the per-submission streaming cycle.

use serde::Serialize;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::{ERROR_MESSAGE, TERMINATION_NOTICE, TURN_LIMIT};
use crate::error::ChatError;
use crate::providers::Backend;
use crate::selector::{BackendChanged, BackendSelector};
use crate::transport::StreamOpener;

// ---------------------------------------------------------------------------
// Conversation model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Streaming,
}

/// Handle to a rendered turn, issued by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TurnHandle(pub usize);

/// Handle to a rendered "awaiting response" indicator, issued by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct IndicatorHandle(pub usize);

/// What the controller needs from whatever renders the conversation.
pub trait ChatUi {
    fn append_turn(&mut self, role: Role, initial_text: &str) -> TurnHandle;
    fn update_turn_text(&mut self, handle: TurnHandle, full_text: &str);
    fn append_token(&mut self, handle: TurnHandle, token: &str);
    fn show_pending_indicator(&mut self) -> IndicatorHandle;
    fn hide_pending_indicator(&mut self, handle: IndicatorHandle);
    fn set_input_enabled(&mut self, enabled: bool);
    fn clear_all_turns(&mut self);
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// All mutable conversation state: active backend, turn counter, lock state
/// and the turns themselves.
#[derive(Debug)]
pub struct Session {
    selector: BackendSelector,
    user_turns: u32,
    state: SessionState,
    phase: Phase,
    turns: Vec<Turn>,
}

/// Serializable view of a [`Session`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub backend: Backend,
    pub user_turns: u32,
    pub turn_limit: u32,
    pub state: SessionState,
    pub phase: Phase,
    pub turns: Vec<Turn>,
}

impl Session {
    pub fn new(backend: Backend) -> Self {
        Session {
            selector: BackendSelector::new(backend),
            user_turns: 0,
            state: SessionState::Open,
            phase: Phase::Idle,
            turns: Vec::new(),
        }
    }

    pub fn backend(&self) -> Backend {
        self.selector.current()
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    pub fn user_turns(&self) -> u32 {
        self.user_turns
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_locked(&self) -> bool {
        self.state == SessionState::Locked
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            backend: self.backend(),
            user_turns: self.user_turns,
            turn_limit: TURN_LIMIT,
            state: self.state,
            phase: self.phase,
            turns: self.turns.clone(),
        }
    }

    fn reset(&mut self) {
        self.user_turns = 0;
        self.state = SessionState::Open;
        self.phase = Phase::Idle;
        self.turns.clear();
    }

    fn push(&mut self, role: Role, text: &str) -> usize {
        self.turns.push(Turn { role, text: text.to_string() });
        self.turns.len() - 1
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// How a submission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Stream ended normally. `tokens == 0` means no content was received.
    Completed { tokens: usize },
    /// The pending turn was replaced by the error message.
    Failed { reason: String },
    /// This submission hit the turn limit; the termination notice was shown.
    Locked,
}

/// Drives one request/response cycle per submission against a [`ChatUi`].
pub struct ChatController<U, O> {
    session: Session,
    ui: U,
    opener: O,
}

impl<U: ChatUi, O: StreamOpener> ChatController<U, O> {
    pub fn new(ui: U, opener: O, backend: Backend) -> Self {
        ChatController {
            session: Session::new(backend),
            ui,
            opener,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Make `backend` active and reset the conversation.
    pub fn select_backend(&mut self, backend: Backend) -> BackendChanged {
        let event = self.session.selector.select(backend);
        self.on_backend_changed(event);
        event
    }

    pub fn on_backend_changed(&mut self, event: BackendChanged) {
        info!(backend = %event.0, "backend changed, resetting session");
        self.reset_session();
    }

    /// Clear all turns, zero the counter and reopen input.
    pub fn reset_session(&mut self) {
        self.session.reset();
        self.ui.clear_all_turns();
        self.ui.set_input_enabled(true);
    }

    /// Run one cycle for `text`.
    ///
    /// Blank input and submissions on a locked session are rejected without
    /// touching the conversation. Transport failures never escape: they turn
    /// the pending assistant turn into the error message.
    pub async fn submit(&mut self, text: &str) -> Result<CycleOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyInput);
        }
        if self.session.is_locked() {
            return Err(ChatError::SessionLocked);
        }

        self.session.push(Role::User, text);
        self.ui.append_turn(Role::User, text);
        self.session.user_turns += 1;
        debug!(user_turns = self.session.user_turns, "user turn appended");

        if self.session.user_turns == TURN_LIMIT {
            self.session.push(Role::Assistant, TERMINATION_NOTICE);
            self.ui.append_turn(Role::Assistant, TERMINATION_NOTICE);
            self.session.state = SessionState::Locked;
            self.ui.set_input_enabled(false);
            info!(limit = TURN_LIMIT, "turn limit reached, session locked");
            return Ok(CycleOutcome::Locked);
        }

        self.ui.set_input_enabled(false);
        let mut indicator = Some(self.ui.show_pending_indicator());
        let handle = self.ui.append_turn(Role::Assistant, "");
        let pending = self.session.push(Role::Assistant, "");
        self.session.phase = Phase::Streaming;

        let backend = self.session.backend();
        let mut stream = self.opener.open_stream(text, backend);
        let mut tokens = 0usize;

        let result = loop {
            match stream.next().await {
                Some(Ok(token)) => {
                    if let Some(h) = indicator.take() {
                        debug!(%backend, "content started");
                        self.ui.hide_pending_indicator(h);
                    }
                    tokens += 1;
                    self.session.turns[pending].text.push_str(&token);
                    self.ui.append_token(handle, &token);
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            }
        };
        drop(stream);

        if let Some(h) = indicator.take() {
            debug!(%backend, "no content received");
            self.ui.hide_pending_indicator(h);
        }

        let outcome = match result {
            Ok(()) => {
                debug!(%backend, tokens, "stream complete");
                CycleOutcome::Completed { tokens }
            }
            Err(e) => {
                warn!(%backend, error = %e, "cycle failed");
                self.session.turns[pending].text = ERROR_MESSAGE.to_string();
                self.ui.update_turn_text(handle, ERROR_MESSAGE);
                CycleOutcome::Failed { reason: e.to_string() }
            }
        };

        self.session.phase = Phase::Idle;
        self.ui.set_input_enabled(true);
        Ok(outcome)
    }
}
