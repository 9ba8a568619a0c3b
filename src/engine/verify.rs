//! Verification gatekeeper state.
//!
//! Per-(chat, user) records for members that joined while verification
//! is enabled. A record existing means the member is still restricted;
//! every terminal transition (verify click, timeout, member left)
//! removes the record, which is what makes completion idempotent: the
//! losing side of a verify-vs-timeout race finds no record and becomes
//! a no-op. Side effects live in the engine; this module only decides.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// A member still inside the verification gate.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRecord {
    pub deadline: DateTime<Utc>,
    /// Kept so the welcome after a verify click can greet by name.
    pub display_name: String,
    /// The prompt message carrying the verify button, once sent.
    pub prompt_message: Option<i32>,
}

/// Outcome of a verify button click.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    /// The member verified in time; carries the removed record so the
    /// engine can delete the prompt.
    Verified(VerificationRecord),
    /// Someone clicked another member's button. No state change.
    Unauthorized,
    /// No live record - the timeout already resolved this member (or
    /// they were never gated). Idempotent no-op.
    AlreadyResolved,
}

/// Arena of pending verifications, keyed (chat, user).
#[derive(Clone, Default)]
pub struct Gatekeeper {
    records: Arc<DashMap<(i64, u64), VerificationRecord>>,
}

impl Gatekeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the gate: create the `Restricted` record. At most one
    /// record per (chat, user) exists; a re-join overwrites.
    pub fn begin(&self, chat_id: i64, user_id: u64, display_name: &str, deadline: DateTime<Utc>) {
        self.records.insert(
            (chat_id, user_id),
            VerificationRecord {
                deadline,
                display_name: display_name.to_string(),
                prompt_message: None,
            },
        );
    }

    /// Remember the prompt message so it can be deleted on resolution.
    pub fn attach_prompt(&self, chat_id: i64, user_id: u64, message_id: i32) {
        if let Some(mut record) = self.records.get_mut(&(chat_id, user_id)) {
            record.prompt_message = Some(message_id);
        }
    }

    /// Resolve a verify click. Only the gated member may verify
    /// themselves; whichever of click and timeout arrives first wins.
    pub fn resolve_click(&self, chat_id: i64, clicking_user: u64, target_user: u64) -> VerifyOutcome {
        if clicking_user != target_user {
            return VerifyOutcome::Unauthorized;
        }

        match self.records.remove(&(chat_id, target_user)) {
            Some((_, record)) => VerifyOutcome::Verified(record),
            None => VerifyOutcome::AlreadyResolved,
        }
    }

    /// Resolve a deadline firing. Returns the record if the member was
    /// still gated, `None` if a click (or a second firing) got there
    /// first.
    pub fn resolve_timeout(&self, chat_id: i64, user_id: u64) -> Option<VerificationRecord> {
        self.records.remove(&(chat_id, user_id)).map(|(_, record)| record)
    }

    /// Drop the record for a member who left the chat.
    pub fn discard(&self, chat_id: i64, user_id: u64) -> Option<VerificationRecord> {
        self.records.remove(&(chat_id, user_id)).map(|(_, record)| record)
    }

    /// Whether a member is still waiting inside the gate.
    pub fn is_pending(&self, chat_id: i64, user_id: u64) -> bool {
        self.records.contains_key(&(chat_id, user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deadline() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_060, 0).unwrap()
    }

    #[test]
    fn click_before_timeout_verifies() {
        let gate = Gatekeeper::new();
        gate.begin(1, 7, "Alice", deadline());
        gate.attach_prompt(1, 7, 42);

        match gate.resolve_click(1, 7, 7) {
            VerifyOutcome::Verified(record) => {
                assert_eq!(record.prompt_message, Some(42));
                assert_eq!(record.display_name, "Alice");
            }
            other => panic!("expected Verified, got {other:?}"),
        }

        // The late timeout finds nothing to do.
        assert!(gate.resolve_timeout(1, 7).is_none());
        assert!(!gate.is_pending(1, 7));
    }

    #[test]
    fn timeout_before_click_wins() {
        let gate = Gatekeeper::new();
        gate.begin(1, 7, "Alice", deadline());

        assert!(gate.resolve_timeout(1, 7).is_some());
        // The late click is an idempotent no-op.
        assert_eq!(gate.resolve_click(1, 7, 7), VerifyOutcome::AlreadyResolved);
    }

    #[test]
    fn double_timeout_has_no_second_effect() {
        let gate = Gatekeeper::new();
        gate.begin(1, 7, "Alice", deadline());

        assert!(gate.resolve_timeout(1, 7).is_some());
        assert!(gate.resolve_timeout(1, 7).is_none());
    }

    #[test]
    fn other_users_click_is_unauthorized_and_changes_nothing() {
        let gate = Gatekeeper::new();
        gate.begin(1, 7, "Alice", deadline());

        assert_eq!(gate.resolve_click(1, 99, 7), VerifyOutcome::Unauthorized);
        assert!(gate.is_pending(1, 7));
    }

    #[test]
    fn leaving_discards_the_record() {
        let gate = Gatekeeper::new();
        gate.begin(1, 7, "Alice", deadline());

        assert!(gate.discard(1, 7).is_some());
        assert!(gate.resolve_timeout(1, 7).is_none());
        assert_eq!(gate.resolve_click(1, 7, 7), VerifyOutcome::AlreadyResolved);
    }

    #[test]
    fn records_are_scoped_per_chat() {
        let gate = Gatekeeper::new();
        gate.begin(1, 7, "Alice", deadline());
        gate.begin(2, 7, "Bob", deadline());

        assert!(gate.resolve_timeout(1, 7).is_some());
        assert!(gate.is_pending(2, 7));
    }
}
