//! Cancellable timer registry.
//!
//! Delayed work (verification timeouts, welcome auto-deletes) is keyed
//! so the owning path can cancel it later. Cancellation is best-effort:
//! if a cancel races a firing, the state checks at the firing site make
//! the outcome safe either way.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identity of a pending timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    VerifyTimeout { chat_id: i64, user_id: u64 },
    WelcomeDelete { chat_id: i64, message_id: i32 },
}

struct PendingTimer {
    token: CancellationToken,
    generation: u64,
}

/// Keyed registry of cancellable one-shot timers.
///
/// Cloning is cheap and shares the underlying registry.
#[derive(Clone, Default)]
pub struct TimerRegistry {
    pending: Arc<DashMap<TimerKey, PendingTimer>>,
    generations: Arc<AtomicU64>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_fire` to run after `delay`, replacing (and
    /// cancelling) any timer already registered under the same key.
    pub fn schedule<F>(&self, key: TimerKey, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        if let Some(previous) = self.pending.insert(
            key.clone(),
            PendingTimer { token: token.clone(), generation },
        ) {
            previous.token.cancel();
        }

        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("timer {key:?} cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    // Deregister only our own entry; a newer timer may
                    // have replaced it under the same key.
                    pending.remove_if(&key, |_, timer| timer.generation == generation);
                    on_fire.await;
                }
            }
        });
    }

    /// Cancel a pending timer. Returns whether one was registered.
    pub fn cancel(&self, key: &TimerKey) -> bool {
        match self.pending.remove(key) {
            Some((_, timer)) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let timers = TimerRegistry::new();
        let fired = Arc::new(AtomicU32::new(0));

        let seen = fired.clone();
        timers.schedule(
            TimerKey::VerifyTimeout { chat_id: 1, user_id: 2 },
            Duration::from_secs(60),
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let timers = TimerRegistry::new();
        let fired = Arc::new(AtomicU32::new(0));
        let key = TimerKey::VerifyTimeout { chat_id: 1, user_id: 2 };

        let seen = fired.clone();
        timers.schedule(key.clone(), Duration::from_secs(60), async move {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(timers.cancel(&key));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!timers.cancel(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_previous_timer() {
        let timers = TimerRegistry::new();
        let fired = Arc::new(AtomicU32::new(0));
        let key = TimerKey::WelcomeDelete { chat_id: 1, message_id: 10 };

        let first = fired.clone();
        timers.schedule(key.clone(), Duration::from_secs(10), async move {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = fired.clone();
        timers.schedule(key.clone(), Duration::from_secs(30), async move {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        // Only the replacement fired.
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }
}
