use serde::{Deserialize, Serialize};

use super::types::{ChatMessage, SessionSnapshot, User, UserPatch};

/// Every action a peer can broadcast on the session bus.
///
/// Serialized as `{"type": "JOIN", "payload": {...}}`. An unknown `type` fails to decode and the
/// bus adapter drops the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum SessionAction {
    Join(User),
    Leave {
        user_id: String,
    },
    UserUpdate(UserPatch),
    MessageSend(ChatMessage),
    MessageDelete {
        message_id: String,
        user_id: String,
    },
    CounterUpdate {
        value: i64,
        user_id: String,
        username: String,
    },
    TypingStart {
        user_id: String,
    },
    TypingStop {
        user_id: String,
    },
    RequestState {
        requester_id: String,
    },
    StateSync(SessionSnapshot),
}

impl SessionAction {
    pub fn name(&self) -> &'static str {
        match self {
            SessionAction::Join(_) => "JOIN",
            SessionAction::Leave { .. } => "LEAVE",
            SessionAction::UserUpdate(_) => "USER_UPDATE",
            SessionAction::MessageSend(_) => "MESSAGE_SEND",
            SessionAction::MessageDelete { .. } => "MESSAGE_DELETE",
            SessionAction::CounterUpdate { .. } => "COUNTER_UPDATE",
            SessionAction::TypingStart { .. } => "TYPING_START",
            SessionAction::TypingStop { .. } => "TYPING_STOP",
            SessionAction::RequestState { .. } => "REQUEST_STATE",
            SessionAction::StateSync(_) => "STATE_SYNC",
        }
    }

    /// Actions whose effect the sender already applied locally when it broadcast them.
    pub fn is_applied_optimistically(&self) -> bool {
        matches!(
            self,
            SessionAction::MessageSend(_) | SessionAction::CounterUpdate { .. }
        )
    }
}

/// An action as handed over by the bus, tagged with the sender's tab handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub source: String,
    pub action: SessionAction,
}

impl Delivery {
    pub fn new(source: impl Into<String>, action: SessionAction) -> Self {
        Self {
            source: source.into(),
            action,
        }
    }
}
