//! Update dispatcher setup.
//!
//! Translates raw Telegram updates into [`ChatEvent`]s and feeds them to
//! the moderation engine. The dispatcher does no moderation itself;
//! everything stateful happens behind the engine's per-chat queues.

use teloxide::adaptors::Throttle;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::ChatMemberUpdated;

use crate::engine::ModerationEngine;
use crate::engine::event::ChatEvent;
use crate::permissions::RoleResolver;
use crate::utils::display_name;

/// Bot type with Throttle adaptor for automatic rate limiting.
pub type ThrottledBot = Throttle<Bot>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The moderation engine all events funnel into.
    pub engine: ModerationEngine,

    /// Sender role lookups with caching.
    pub roles: RoleResolver,
}

/// Build the dispatcher with all handlers.
pub fn build_dispatcher(
    bot: ThrottledBot,
    engine: ModerationEngine,
    roles: RoleResolver,
) -> Dispatcher<ThrottledBot, anyhow::Error, teloxide::dispatching::DefaultKey> {
    let state = AppState { engine, roles };

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
}

/// Build the handler schema.
fn schema() -> UpdateHandler<anyhow::Error> {
    use teloxide::dispatching::UpdateFilterExt;

    dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback_query))
        .branch(Update::filter_chat_member().endpoint(on_chat_member))
}

/// Translate one message update into engine events.
async fn on_message(msg: Message, state: AppState) -> anyhow::Result<()> {
    // Moderation only makes sense in group chats.
    if msg.chat.is_private() || msg.chat.is_channel() {
        return Ok(());
    }
    let chat_id = msg.chat.id.0;

    if let Some(members) = msg.new_chat_members() {
        for user in members.iter().filter(|user| !user.is_bot) {
            state.engine.submit(ChatEvent::NewChatMember {
                chat_id,
                user_id: user.id.0,
                display_name: display_name(
                    &user.first_name,
                    user.last_name.as_deref(),
                    user.username.as_deref(),
                ),
                service_message: Some(msg.id.0),
            });
        }
        return Ok(());
    }

    if let Some(user) = msg.left_chat_member() {
        state.engine.submit(ChatEvent::MemberLeft { chat_id, user_id: user.id.0 });
        return Ok(());
    }

    let (Some(user), Some(text)) = (msg.from.as_ref(), msg.text()) else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let sender_role = state.roles.resolve(chat_id, user.id.0).await;
    state.engine.submit(ChatEvent::TextMessage {
        chat_id,
        user_id: user.id.0,
        message_id: msg.id.0,
        text: text.to_string(),
        is_forwarded: msg.forward_origin().is_some(),
        sender_role,
        sent_at: msg.date,
    });

    Ok(())
}

/// A member's status changed (promotion, demotion, restriction); the
/// cached role is stale now.
async fn on_chat_member(update: ChatMemberUpdated, state: AppState) -> anyhow::Result<()> {
    state
        .roles
        .invalidate(update.chat.id.0, update.new_chat_member.user.id.0);
    Ok(())
}

/// Translate a callback query (verify button clicks) into an event.
async fn on_callback_query(q: CallbackQuery, state: AppState) -> anyhow::Result<()> {
    let (Some(message), Some(data)) = (q.message.as_ref(), q.data.as_ref()) else {
        // A query without a reachable message cannot be routed to a chat.
        return Ok(());
    };

    state.engine.submit(ChatEvent::CallbackQuery {
        callback_id: q.id.clone(),
        chat_id: message.chat().id.0,
        from_user_id: q.from.id.0,
        message_id: Some(message.id().0),
        data: data.clone(),
    });

    Ok(())
}
