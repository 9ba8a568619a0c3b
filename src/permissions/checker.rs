//! Cached role lookups against the Telegram API.

use std::time::Duration;

use moka::sync::Cache;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ChatMemberKind, UserId};
use tracing::debug;

use crate::engine::event::SenderRole;

/// Resolves a message sender's role in a chat, with caching.
///
/// Bot owners (from `OWNER_IDS`) are always `Owner`, in every chat,
/// without an API call.
#[derive(Clone)]
pub struct RoleResolver {
    bot: Bot,
    cache: Cache<(i64, u64), SenderRole>,
    owner_ids: Vec<u64>,
}

impl RoleResolver {
    pub fn new(bot: Bot, owner_ids: Vec<u64>) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(300))
            .time_to_idle(Duration::from_secs(120))
            .build();

        Self { bot, cache, owner_ids }
    }

    /// Role of `user_id` in `chat_id`.
    ///
    /// A failed lookup resolves to `Member`: moderation stays active for
    /// the sender rather than granting an exemption on error. Failures
    /// are not cached.
    pub async fn resolve(&self, chat_id: i64, user_id: u64) -> SenderRole {
        if self.owner_ids.contains(&user_id) {
            return SenderRole::Owner;
        }

        if let Some(role) = self.cache.get(&(chat_id, user_id)) {
            return role;
        }

        let role = match self.bot.get_chat_member(ChatId(chat_id), UserId(user_id)).await {
            Ok(member) => match member.kind {
                ChatMemberKind::Owner(_) => SenderRole::Owner,
                ChatMemberKind::Administrator(_) => SenderRole::Admin,
                _ => SenderRole::Member,
            },
            Err(e) => {
                debug!("getChatMember({chat_id}, {user_id}) failed, treating as member: {e}");
                return SenderRole::Member;
            }
        };

        self.cache.insert((chat_id, user_id), role);
        role
    }

    /// Drop the cached role, e.g. after a promotion or demotion event.
    pub fn invalidate(&self, chat_id: i64, user_id: u64) {
        self.cache.invalidate(&(chat_id, user_id));
        debug!("invalidated cached role for user {user_id} in chat {chat_id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> RoleResolver {
        RoleResolver::new(Bot::new("123456:TEST"), vec![42])
    }

    #[tokio::test]
    async fn owner_ids_resolve_without_an_api_call() {
        let r = resolver();
        assert_eq!(r.resolve(1, 42).await, SenderRole::Owner);
    }

    #[test]
    fn invalidate_flushes_a_cached_role() {
        let r = resolver();
        r.cache.insert((1, 7), SenderRole::Admin);
        assert_eq!(r.cache.get(&(1, 7)), Some(SenderRole::Admin));

        r.invalidate(1, 7);
        assert_eq!(r.cache.get(&(1, 7)), None);
        // Other entries are untouched.
        r.cache.insert((1, 8), SenderRole::Member);
        r.invalidate(1, 7);
        assert_eq!(r.cache.get(&(1, 8)), Some(SenderRole::Member));
    }
}
