//! Recording [`ChatActions`] fake for engine tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::actions::{ActionResult, Button, ChatActions};

/// One recorded outbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Send {
        chat_id: i64,
        text: String,
        buttons: Vec<Button>,
        reply_to: Option<i32>,
        message_id: i32,
    },
    Delete { chat_id: i64, message_id: i32 },
    Restrict {
        chat_id: i64,
        user_id: u64,
        allowed: bool,
        until: Option<DateTime<Utc>>,
    },
    SetChatPermissions { chat_id: i64, allowed: bool },
    AnswerCallback {
        callback_id: String,
        text: Option<String>,
        alert: bool,
    },
    Kick { chat_id: i64, user_id: u64 },
    Ban { chat_id: i64, user_id: u64 },
}

/// Fake platform port that records every call and always succeeds.
/// Sent messages get ids 100, 101, ...
#[derive(Default)]
pub struct RecordingActions {
    log: Mutex<Vec<Recorded>>,
    next_message_id: AtomicI32,
}

impl RecordingActions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            next_message_id: AtomicI32::new(100),
        })
    }

    /// Snapshot of everything recorded so far.
    pub fn log(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut self.log.lock())
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Send { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatActions for RecordingActions {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[Button],
        reply_to: Option<i32>,
    ) -> ActionResult<i32> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(Recorded::Send {
            chat_id,
            text: text.to_string(),
            buttons: buttons.to_vec(),
            reply_to,
            message_id,
        });
        Ok(message_id)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> ActionResult {
        self.log.lock().push(Recorded::Delete { chat_id, message_id });
        Ok(())
    }

    async fn restrict_send(
        &self,
        chat_id: i64,
        user_id: u64,
        allowed: bool,
        until: Option<DateTime<Utc>>,
    ) -> ActionResult {
        self.log.lock().push(Recorded::Restrict { chat_id, user_id, allowed, until });
        Ok(())
    }

    async fn set_chat_permissions(&self, chat_id: i64, allowed: bool) -> ActionResult {
        self.log.lock().push(Recorded::SetChatPermissions { chat_id, allowed });
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> ActionResult {
        self.log.lock().push(Recorded::AnswerCallback {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
            alert,
        });
        Ok(())
    }

    async fn kick_user(&self, chat_id: i64, user_id: u64) -> ActionResult {
        self.log.lock().push(Recorded::Kick { chat_id, user_id });
        Ok(())
    }

    async fn ban_user(&self, chat_id: i64, user_id: u64) -> ActionResult {
        self.log.lock().push(Recorded::Ban { chat_id, user_id });
        Ok(())
    }
}
