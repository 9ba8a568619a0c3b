//! Telegram implementation of the engine's [`ChatActions`] port.
//!
//! Every method is one Bot API call (kick is the ban+unban pair) and
//! maps [`teloxide::RequestError`] into the engine's error taxonomy so
//! retry decisions stay in the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, ChatPermissions, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode,
    ReplyParameters, UserId,
};
use teloxide::{ApiError, RequestError};
use tracing::warn;
use url::Url;

use crate::engine::actions::{ActionError, ActionResult, Button, ButtonKind, ChatActions};

use super::dispatcher::ThrottledBot;

/// [`ChatActions`] backed by the throttled Telegram bot.
pub struct TelegramActions {
    bot: ThrottledBot,
}

impl TelegramActions {
    pub fn new(bot: ThrottledBot) -> Self {
        Self { bot }
    }
}

/// Everything a regular member may do in an open chat.
fn member_permissions() -> ChatPermissions {
    ChatPermissions::empty()
        | ChatPermissions::SEND_MESSAGES
        | ChatPermissions::SEND_AUDIOS
        | ChatPermissions::SEND_DOCUMENTS
        | ChatPermissions::SEND_PHOTOS
        | ChatPermissions::SEND_VIDEOS
        | ChatPermissions::SEND_VIDEO_NOTES
        | ChatPermissions::SEND_VOICE_NOTES
        | ChatPermissions::SEND_POLLS
        | ChatPermissions::SEND_OTHER_MESSAGES
        | ChatPermissions::ADD_WEB_PAGE_PREVIEWS
        | ChatPermissions::CHANGE_INFO
        | ChatPermissions::INVITE_USERS
        | ChatPermissions::PIN_MESSAGES
        | ChatPermissions::MANAGE_TOPICS
}

fn keyboard(buttons: &[Button]) -> InlineKeyboardMarkup {
    let rows = buttons.iter().filter_map(|button| {
        let key = match &button.kind {
            ButtonKind::Url(url) => match Url::parse(url) {
                Ok(url) => InlineKeyboardButton::url(button.label.clone(), url),
                Err(e) => {
                    // Validation at policy load should have caught this.
                    warn!("dropping button {:?} with bad url: {e}", button.label);
                    return None;
                }
            },
            ButtonKind::Callback(data) => {
                InlineKeyboardButton::callback(button.label.clone(), data.clone())
            }
        };
        Some(vec![key])
    });

    InlineKeyboardMarkup::new(rows)
}

fn map_error(err: RequestError) -> ActionError {
    match err {
        RequestError::Api(api) => map_api_error(api),
        RequestError::RetryAfter(secs) => {
            ActionError::Transient(format!("rate limited for {}s", secs.seconds()))
        }
        RequestError::Network(e) => ActionError::Transient(e.to_string()),
        RequestError::Io(e) => ActionError::Transient(e.to_string()),
        other => ActionError::Platform(other.to_string()),
    }
}

fn map_api_error(err: ApiError) -> ActionError {
    match err {
        ApiError::NotEnoughRightsToRestrict
        | ApiError::NotEnoughRightsToPostMessages
        | ApiError::NotEnoughRightsToManagePins
        | ApiError::CantRestrictSelf
        | ApiError::MessageCantBeDeleted => ActionError::PermissionDenied,
        ApiError::Unknown(ref text)
            if text.contains("not enough rights") || text.contains("CHAT_ADMIN_REQUIRED") =>
        {
            ActionError::PermissionDenied
        }
        other => ActionError::Platform(other.to_string()),
    }
}

#[async_trait]
impl ChatActions for TelegramActions {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[Button],
        reply_to: Option<i32>,
    ) -> ActionResult<i32> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);

        if !buttons.is_empty() {
            request = request.reply_markup(keyboard(buttons));
        }
        if let Some(reply_to) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(reply_to)));
        }

        let sent = request.await.map_err(map_error)?;
        Ok(sent.id.0)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> ActionResult {
        match self
            .bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
        {
            Ok(_) => Ok(()),
            // Already gone is the outcome we wanted.
            Err(RequestError::Api(ApiError::MessageToDeleteNotFound))
            | Err(RequestError::Api(ApiError::MessageIdInvalid)) => Ok(()),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn restrict_send(
        &self,
        chat_id: i64,
        user_id: u64,
        allowed: bool,
        until: Option<DateTime<Utc>>,
    ) -> ActionResult {
        let permissions = if allowed {
            member_permissions()
        } else {
            ChatPermissions::empty()
        };

        let request = self
            .bot
            .restrict_chat_member(ChatId(chat_id), UserId(user_id), permissions);
        let request = if let Some(until) = until {
            request.until_date(until)
        } else {
            request
        };

        request.await.map_err(map_error)?;
        Ok(())
    }

    async fn set_chat_permissions(&self, chat_id: i64, allowed: bool) -> ActionResult {
        let permissions = if allowed {
            member_permissions()
        } else {
            ChatPermissions::empty()
        };

        self.bot
            .set_chat_permissions(ChatId(chat_id), permissions)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> ActionResult {
        let mut request = self.bot.answer_callback_query(callback_id.to_string());
        if let Some(text) = text {
            request = request.text(text);
        }
        if alert {
            request = request.show_alert(true);
        }

        request.await.map_err(map_error)?;
        Ok(())
    }

    async fn kick_user(&self, chat_id: i64, user_id: u64) -> ActionResult {
        // Ban then unban: removes the member but lets them rejoin.
        self.bot
            .ban_chat_member(ChatId(chat_id), UserId(user_id))
            .await
            .map_err(map_error)?;
        self.bot
            .unban_chat_member(ChatId(chat_id), UserId(user_id))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn ban_user(&self, chat_id: i64, user_id: u64) -> ActionResult {
        self.bot
            .ban_chat_member(ChatId(chat_id), UserId(user_id))
            .await
            .map_err(map_error)?;
        Ok(())
    }
}
