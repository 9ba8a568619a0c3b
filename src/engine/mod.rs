//! Moderation engine.
//!
//! Routes inbound chat events to the verification gatekeeper, content
//! filter, flood detector, night-mode and broadcast schedulers, and
//! emits outbound actions through the abstract [`ChatActions`] port.
//!
//! ## Concurrency model
//!
//! One worker task per chat processes that chat's events in arrival
//! order, so per-chat state (verification records, flood windows, night
//! phase) is never raced within a chat; different chats run in
//! parallel. Timer firings (verification timeout, welcome auto-delete)
//! and the minute tick re-enter through the same per-chat queue, which
//! is what makes the verify-vs-timeout race safe: both paths are
//! ordered before they check state.

pub mod actions;
pub mod broadcast;
pub mod event;
pub mod filter;
pub mod flood;
pub mod night;
#[cfg(test)]
pub mod test_utils;
pub mod timers;
pub mod verify;
pub mod welcome;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::policy::{NightModeKind, PenaltyAction, PolicyConfiguration, PolicyStore};

use actions::{Actions, Button, apply_idempotent};
use broadcast::BroadcastBoard;
use event::{ChatEvent, SenderRole, parse_verify_callback};
use filter::{BlockReason, Verdict};
use flood::{FloodDetector, FloodVerdict};
use night::{NightWatch, Transition};
use timers::{TimerKey, TimerRegistry};
use verify::{Gatekeeper, VerifyOutcome};

const NIGHT_ON_ANNOUNCEMENT: &str = "🌙 夜间模式已开启，全员禁言，明早见！";
const NIGHT_OFF_ANNOUNCEMENT: &str = "☀️ 早上好！夜间模式已结束，可以自由发言了。";
const UNAUTHORIZED_VERIFY_ALERT: &str = "这不是你的验证按钮！";
const VERIFIED_ACK: &str = "验证通过！";

/// Unit of work for a per-chat worker.
#[derive(Debug)]
enum WorkItem {
    Event(ChatEvent),
    /// Verification deadline elapsed for a gated member.
    VerifyTimeout { user_id: u64 },
    /// Welcome auto-delete timer fired.
    WelcomeDelete { message_id: i32 },
    /// Minute tick, fanned out per managed chat.
    SchedulerTick { local_now: NaiveDateTime },
}

/// The moderation engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ModerationEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    actions: Actions,
    policy: PolicyStore,
    timers: TimerRegistry,
    gate: Gatekeeper,
    flood: FloodDetector,
    night: NightWatch,
    broadcasts: BroadcastBoard,
    /// Live per-chat worker queues.
    workers: DashMap<i64, mpsc::UnboundedSender<WorkItem>>,
    /// Chats that receive night-mode transitions and broadcasts.
    managed_chats: Vec<i64>,
}

impl ModerationEngine {
    pub fn new(actions: Actions, policy: PolicyStore, managed_chats: Vec<i64>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                actions,
                policy,
                timers: TimerRegistry::new(),
                gate: Gatekeeper::new(),
                flood: FloodDetector::new(),
                night: NightWatch::new(),
                broadcasts: BroadcastBoard::new(),
                workers: DashMap::new(),
                managed_chats,
            }),
        }
    }

    /// Feed one inbound event into the engine.
    ///
    /// Chat-scoped events are queued on that chat's worker; the tick
    /// fans out to every managed chat. Events are refused while no
    /// policy snapshot has ever been published.
    pub fn submit(&self, event: ChatEvent) {
        let Some(policy) = self.inner.policy.snapshot() else {
            error!("no policy snapshot published yet, refusing event {event:?}");
            return;
        };

        match event {
            ChatEvent::Tick { now } => {
                self.inner.flood.decay(now, &policy.protection.anti_flood);

                let local_now = local_naive(now);
                for &chat_id in &self.inner.managed_chats {
                    let _ = self
                        .sender_for(chat_id)
                        .send(WorkItem::SchedulerTick { local_now });
                }
            }
            other => {
                // chat_id() is Some for every non-tick event.
                if let Some(chat_id) = other.chat_id() {
                    let _ = self.sender_for(chat_id).send(WorkItem::Event(other));
                }
            }
        }
    }

    /// Queue sender for a chat, spawning its worker on first use.
    fn sender_for(&self, chat_id: i64) -> mpsc::UnboundedSender<WorkItem> {
        self.inner
            .workers
            .entry(chat_id)
            .or_insert_with(|| {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let inner = Arc::clone(&self.inner);
                let worker_tx = tx.clone();
                tokio::spawn(async move {
                    debug!("worker started for chat {chat_id}");
                    while let Some(item) = rx.recv().await {
                        inner.process(chat_id, item, &worker_tx).await;
                    }
                });
                tx
            })
            .clone()
    }
}

fn local_naive(now: DateTime<Utc>) -> NaiveDateTime {
    now.with_timezone(&Local).naive_local()
}

impl EngineInner {
    /// Handle one queued item for a chat. Failures are contained here;
    /// nothing propagates to other events or chats.
    async fn process(&self, chat_id: i64, item: WorkItem, tx: &mpsc::UnboundedSender<WorkItem>) {
        // Each item sees one consistent snapshot for its whole handling.
        let Some(policy) = self.policy.snapshot() else {
            error!("no policy snapshot, dropping work for chat {chat_id}");
            return;
        };

        match item {
            WorkItem::Event(ChatEvent::NewChatMember {
                user_id,
                display_name,
                service_message,
                ..
            }) => {
                self.on_new_member(chat_id, user_id, &display_name, service_message, &policy, tx)
                    .await;
            }
            WorkItem::Event(ChatEvent::TextMessage {
                user_id,
                message_id,
                text,
                is_forwarded,
                sender_role,
                sent_at,
                ..
            }) => {
                self.on_text(
                    chat_id, user_id, message_id, &text, is_forwarded, sender_role, sent_at,
                    &policy,
                )
                .await;
            }
            WorkItem::Event(ChatEvent::CallbackQuery {
                callback_id,
                from_user_id,
                message_id,
                data,
                ..
            }) => {
                self.on_callback(chat_id, &callback_id, from_user_id, message_id, &data, &policy, tx)
                    .await;
            }
            WorkItem::Event(ChatEvent::MemberLeft { user_id, .. }) => {
                self.on_member_left(chat_id, user_id).await;
            }
            // Ticks are fanned out as SchedulerTick before queueing.
            WorkItem::Event(ChatEvent::Tick { .. }) => {}
            WorkItem::VerifyTimeout { user_id } => {
                self.on_verify_timeout(chat_id, user_id, &policy).await;
            }
            WorkItem::WelcomeDelete { message_id } => {
                self.delete(chat_id, message_id).await;
            }
            WorkItem::SchedulerTick { local_now } => {
                self.on_scheduler_tick(chat_id, local_now, &policy).await;
            }
        }
    }

    async fn on_new_member(
        &self,
        chat_id: i64,
        user_id: u64,
        display_name: &str,
        service_message: Option<i32>,
        policy: &PolicyConfiguration,
        tx: &mpsc::UnboundedSender<WorkItem>,
    ) {
        debug!("new member {user_id} joined chat {chat_id}");

        // Best-effort: the join notice goes first so the prompt or
        // welcome is the newest message in the chat.
        if policy.welcome.delete_service_message
            && let Some(message_id) = service_message
        {
            self.delete(chat_id, message_id).await;
        }

        if !policy.verification.enabled {
            if policy.welcome.enabled {
                self.send_welcome(chat_id, user_id, display_name, policy, tx).await;
            }
            return;
        }

        let timeout = Duration::from_secs(u64::from(policy.verification.timeout_secs));
        let deadline = Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_default();
        self.gate.begin(chat_id, user_id, display_name, deadline);

        self.restrict(chat_id, user_id, false).await;

        let prompt = welcome::render_prompt(&policy.verification, display_name);
        let buttons = [welcome::prompt_button(user_id)];
        if let Some(message_id) = self.send(chat_id, &prompt, &buttons).await {
            self.gate.attach_prompt(chat_id, user_id, message_id);
        }

        let timer_tx = tx.clone();
        self.timers.schedule(
            TimerKey::VerifyTimeout { chat_id, user_id },
            timeout,
            async move {
                let _ = timer_tx.send(WorkItem::VerifyTimeout { user_id });
            },
        );

        info!(
            "verification gate opened for user {user_id} in chat {chat_id}, deadline in {}s",
            policy.verification.timeout_secs
        );
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_text(
        &self,
        chat_id: i64,
        user_id: u64,
        message_id: i32,
        text: &str,
        is_forwarded: bool,
        sender_role: SenderRole,
        sent_at: DateTime<Utc>,
        policy: &PolicyConfiguration,
    ) {
        // Night mode "close": every message goes, admins included.
        if self.night.is_night(chat_id) && policy.night_mode.mode == NightModeKind::Close {
            self.delete(chat_id, message_id).await;
            return;
        }

        // Commands are left to the platform's own command handling.
        if text.starts_with('/') {
            return;
        }

        if let Verdict::Block(reason) = filter::classify(text, is_forwarded, &policy.protection) {
            // Admins and owners may post links; everything else applies
            // to them too.
            let exempt = reason == BlockReason::Link && sender_role.is_privileged();
            if !exempt {
                info!("deleting message {message_id} from user {user_id} in chat {chat_id}: {reason:?}");
                self.delete(chat_id, message_id).await;
                return;
            }
        }

        if sender_role.is_privileged() {
            return;
        }

        let flood = &policy.protection.anti_flood;
        if self.flood.record_and_check(chat_id, user_id, sent_at, flood) == FloodVerdict::Exceeded {
            info!(
                "user {user_id} exceeded flood threshold in chat {chat_id}, applying {:?}",
                flood.action
            );
            self.apply_penalty(chat_id, user_id, flood.action).await;
            // Cleared so the penalty fires once per crossing, not on
            // every following message inside the window.
            self.flood.clear(chat_id, user_id);
        }
    }

    async fn on_callback(
        &self,
        chat_id: i64,
        callback_id: &str,
        from_user_id: u64,
        message_id: Option<i32>,
        data: &str,
        policy: &PolicyConfiguration,
        tx: &mpsc::UnboundedSender<WorkItem>,
    ) {
        let Some(target_user) = parse_verify_callback(data) else {
            // Not ours; ack so the client stops the spinner.
            self.answer(callback_id, None, false).await;
            return;
        };

        match self.gate.resolve_click(chat_id, from_user_id, target_user) {
            VerifyOutcome::Unauthorized => {
                self.answer(callback_id, Some(UNAUTHORIZED_VERIFY_ALERT), true).await;
            }
            VerifyOutcome::AlreadyResolved => {
                debug!("stale verify click for user {target_user} in chat {chat_id}");
                self.answer(callback_id, None, false).await;
            }
            VerifyOutcome::Verified(record) => {
                info!("user {target_user} verified in chat {chat_id}");
                self.timers.cancel(&TimerKey::VerifyTimeout { chat_id, user_id: target_user });

                self.restrict(chat_id, target_user, true).await;
                self.answer(callback_id, Some(VERIFIED_ACK), false).await;

                if let Some(prompt_id) = record.prompt_message.or(message_id) {
                    self.delete(chat_id, prompt_id).await;
                }

                // The gate is open; only now may the welcome go out,
                // greeting by the name captured at join time.
                if policy.welcome.enabled {
                    self.send_welcome(chat_id, target_user, &record.display_name, policy, tx)
                        .await;
                }
            }
        }
    }

    async fn on_verify_timeout(&self, chat_id: i64, user_id: u64, policy: &PolicyConfiguration) {
        // Fires only while the member is still gated; a click that won
        // the race already removed the record.
        let Some(record) = self.gate.resolve_timeout(chat_id, user_id) else {
            debug!("verify timeout for user {user_id} in chat {chat_id} already resolved");
            return;
        };

        info!(
            "user {user_id} failed verification in chat {chat_id}, applying {:?}",
            policy.verification.action
        );
        self.apply_penalty(chat_id, user_id, policy.verification.action).await;

        if let Some(prompt_id) = record.prompt_message {
            self.delete(chat_id, prompt_id).await;
        }
    }

    async fn on_member_left(&self, chat_id: i64, user_id: u64) {
        if let Some(record) = self.gate.discard(chat_id, user_id) {
            debug!("member {user_id} left chat {chat_id} while gated, discarding record");
            self.timers.cancel(&TimerKey::VerifyTimeout { chat_id, user_id });
            if let Some(prompt_id) = record.prompt_message {
                self.delete(chat_id, prompt_id).await;
            }
        }
    }

    async fn on_scheduler_tick(
        &self,
        chat_id: i64,
        local_now: NaiveDateTime,
        policy: &PolicyConfiguration,
    ) {
        if let Some(transition) = self.night.observe(chat_id, local_now.time(), &policy.night_mode) {
            match transition {
                Transition::Entered(NightModeKind::Mute) => {
                    info!("chat {chat_id} entering night mode (mute)");
                    self.toggle_chat(chat_id, false).await;
                    self.send(chat_id, NIGHT_ON_ANNOUNCEMENT, &[]).await;
                }
                Transition::Entered(NightModeKind::Close) => {
                    // No global restriction; inbound messages are
                    // deleted one by one while the phase holds.
                    info!("chat {chat_id} entering night mode (close)");
                    self.send(chat_id, NIGHT_ON_ANNOUNCEMENT, &[]).await;
                }
                Transition::Left { restore } => {
                    info!("chat {chat_id} leaving night mode");
                    if restore {
                        self.toggle_chat(chat_id, true).await;
                    }
                    self.send(chat_id, NIGHT_OFF_ANNOUNCEMENT, &[]).await;
                }
            }
        }

        for due in self
            .broadcasts
            .collect_due(chat_id, local_now, &policy.scheduled_tasks)
        {
            info!("broadcasting task {} to chat {chat_id}", due.task_id);
            self.send(chat_id, &due.content, &[]).await;
        }
    }

    async fn send_welcome(
        &self,
        chat_id: i64,
        user_id: u64,
        display_name: &str,
        policy: &PolicyConfiguration,
        tx: &mpsc::UnboundedSender<WorkItem>,
    ) {
        let text = welcome::render_welcome(&policy.welcome, user_id, display_name);
        let buttons = welcome::welcome_buttons(&policy.welcome);

        let Some(message_id) = self.send(chat_id, &text, &buttons).await else {
            return;
        };
        info!("welcomed user {user_id} in chat {chat_id}");

        if policy.welcome.delete_after_secs > 0 {
            let timer_tx = tx.clone();
            self.timers.schedule(
                TimerKey::WelcomeDelete { chat_id, message_id },
                Duration::from_secs(u64::from(policy.welcome.delete_after_secs)),
                async move {
                    let _ = timer_tx.send(WorkItem::WelcomeDelete { message_id });
                },
            );
        }
    }

    async fn apply_penalty(&self, chat_id: i64, user_id: u64, action: PenaltyAction) {
        let actions = Arc::clone(&self.actions);
        match action {
            PenaltyAction::Mute => {
                apply_idempotent("mute", move || {
                    let actions = Arc::clone(&actions);
                    async move { actions.restrict_send(chat_id, user_id, false, None).await }
                })
                .await;
            }
            PenaltyAction::Kick => {
                apply_idempotent("kick", move || {
                    let actions = Arc::clone(&actions);
                    async move { actions.kick_user(chat_id, user_id).await }
                })
                .await;
            }
            PenaltyAction::Ban => {
                apply_idempotent("ban", move || {
                    let actions = Arc::clone(&actions);
                    async move { actions.ban_user(chat_id, user_id).await }
                })
                .await;
            }
        }
    }

    /// Send a message; never retried, a failure just means the message
    /// is missing.
    async fn send(&self, chat_id: i64, text: &str, buttons: &[Button]) -> Option<i32> {
        match self.actions.send_message(chat_id, text, buttons, None).await {
            Ok(message_id) => Some(message_id),
            Err(e) => {
                warn!("send to chat {chat_id} failed (not retried): {e}");
                None
            }
        }
    }

    async fn delete(&self, chat_id: i64, message_id: i32) {
        let actions = Arc::clone(&self.actions);
        apply_idempotent("delete message", move || {
            let actions = Arc::clone(&actions);
            async move { actions.delete_message(chat_id, message_id).await }
        })
        .await;
    }

    async fn restrict(&self, chat_id: i64, user_id: u64, allowed: bool) {
        let actions = Arc::clone(&self.actions);
        apply_idempotent("restrict member", move || {
            let actions = Arc::clone(&actions);
            async move { actions.restrict_send(chat_id, user_id, allowed, None).await }
        })
        .await;
    }

    async fn toggle_chat(&self, chat_id: i64, allowed: bool) {
        let actions = Arc::clone(&self.actions);
        apply_idempotent("set chat permissions", move || {
            let actions = Arc::clone(&actions);
            async move { actions.set_chat_permissions(chat_id, allowed).await }
        })
        .await;
    }

    async fn answer(&self, callback_id: &str, text: Option<&str>, alert: bool) {
        if let Err(e) = self.actions.answer_callback(callback_id, text, alert).await {
            warn!("answering callback {callback_id} failed: {e}");
        }
    }
}
