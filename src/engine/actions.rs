//! Outbound action port.
//!
//! The engine only ever talks to the platform through [`ChatActions`];
//! the Telegram implementation lives in the `bot` module and the tests
//! use a recording fake.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

/// Outcome taxonomy for outbound platform calls.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// The bot lacks admin rights for this action. Never retried; the
    /// moderation action is simply not applied.
    #[error("bot lacks the rights for this action")]
    PermissionDenied,

    /// Network-level failure or rate limiting. Idempotent actions may be
    /// retried with bounded backoff.
    #[error("transient platform failure: {0}")]
    Transient(String),

    /// Any other platform rejection. Not retried.
    #[error("platform rejected the call: {0}")]
    Platform(String),
}

pub type ActionResult<T = ()> = Result<T, ActionError>;

/// One button attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub kind: ButtonKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonKind {
    Url(String),
    Callback(String),
}

impl Button {
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self { label: label.into(), kind: ButtonKind::Url(url.into()) }
    }

    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self { label: label.into(), kind: ButtonKind::Callback(data.into()) }
    }
}

/// Abstract send/delete/restrict interface to the messaging platform.
///
/// Every method is a single API call; callers decide about retries and
/// error containment.
#[async_trait]
pub trait ChatActions: Send + Sync {
    /// Send an HTML message, one button row per entry. Returns the new
    /// message's id.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[Button],
        reply_to: Option<i32>,
    ) -> ActionResult<i32>;

    /// Delete a message. Deleting an already-gone message succeeds.
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> ActionResult;

    /// Grant or revoke a single user's send permission.
    async fn restrict_send(
        &self,
        chat_id: i64,
        user_id: u64,
        allowed: bool,
        until: Option<DateTime<Utc>>,
    ) -> ActionResult;

    /// Chat-wide send permission toggle (night mode).
    async fn set_chat_permissions(&self, chat_id: i64, allowed: bool) -> ActionResult;

    /// Answer a callback query, optionally as an alert popup.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> ActionResult;

    /// Remove a user but let them rejoin.
    async fn kick_user(&self, chat_id: i64, user_id: u64) -> ActionResult;

    /// Remove a user permanently.
    async fn ban_user(&self, chat_id: i64, user_id: u64) -> ActionResult;
}

/// Shared handle to the platform port.
pub type Actions = Arc<dyn ChatActions>;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Apply an idempotent action, retrying transient failures with bounded
/// backoff on a detached task.
///
/// The first attempt is awaited so same-event actions keep their order;
/// the backoff retries run detached so a flaky platform never blocks
/// the per-chat event worker. Failures are contained here: logged,
/// never propagated. `send_message` must NOT go through this - a
/// retried send can duplicate the message.
pub async fn apply_idempotent<F, Fut>(what: &'static str, op: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ActionResult> + Send,
{
    match op().await {
        Ok(()) => {}
        Err(ActionError::Transient(e)) => {
            warn!("{what}: transient failure, retrying in background: {e}");
            tokio::spawn(async move {
                let mut delay = RETRY_BASE_DELAY;
                for attempt in 2..=RETRY_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    match op().await {
                        Ok(()) => return,
                        Err(ActionError::Transient(e)) if attempt < RETRY_ATTEMPTS => {
                            warn!("{what}: transient failure (attempt {attempt}): {e}");
                        }
                        Err(e) => {
                            warn!("{what}: giving up after {attempt} attempts: {e}");
                            return;
                        }
                    }
                }
            });
        }
        Err(ActionError::PermissionDenied) => {
            // Degraded mode: the bot is not an admin here.
            warn!("{what}: skipped, bot lacks rights");
        }
        Err(e) => {
            warn!("{what}: {e}");
        }
    }
}
