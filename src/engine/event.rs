//! Inbound event shapes the engine accepts from the platform adapter.

use chrono::{DateTime, Utc};

/// Role of a message sender, resolved by the adapter before the event
/// enters the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderRole {
    Owner,
    Admin,
    Member,
}

impl SenderRole {
    /// Owners and admins are exempt from link blocking and anti-flood.
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

/// Callback data prefix for verification buttons: `verify_<user_id>`.
pub const VERIFY_CALLBACK_PREFIX: &str = "verify_";

/// One inbound chat event.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    NewChatMember {
        chat_id: i64,
        user_id: u64,
        display_name: String,
        /// The platform's join-notice message, if one was produced.
        service_message: Option<i32>,
    },
    TextMessage {
        chat_id: i64,
        user_id: u64,
        message_id: i32,
        text: String,
        is_forwarded: bool,
        sender_role: SenderRole,
        sent_at: DateTime<Utc>,
    },
    CallbackQuery {
        callback_id: String,
        chat_id: i64,
        from_user_id: u64,
        /// The message carrying the clicked button.
        message_id: Option<i32>,
        data: String,
    },
    MemberLeft {
        chat_id: i64,
        user_id: u64,
    },
    /// Periodic scheduling tick, roughly once per minute.
    Tick { now: DateTime<Utc> },
}

impl ChatEvent {
    /// The chat this event is serialized under. `Tick` is global and
    /// fans out to every managed chat instead.
    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Self::NewChatMember { chat_id, .. }
            | Self::TextMessage { chat_id, .. }
            | Self::CallbackQuery { chat_id, .. }
            | Self::MemberLeft { chat_id, .. } => Some(*chat_id),
            Self::Tick { .. } => None,
        }
    }
}

/// Parse `verify_<user_id>` callback data into the target user id.
pub fn parse_verify_callback(data: &str) -> Option<u64> {
    data.strip_prefix(VERIFY_CALLBACK_PREFIX)?.parse().ok()
}
