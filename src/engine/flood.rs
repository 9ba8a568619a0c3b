//! Flood detector.
//!
//! Per-(chat, user) sliding window of message timestamps. The detector
//! only counts; the engine applies the configured penalty and clears
//! the window so one threshold crossing triggers exactly one action.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::policy::AntiFloodPolicy;

/// Result of recording one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodVerdict {
    Ok,
    Exceeded,
}

/// In-memory flood windows, keyed (chat, user).
#[derive(Clone, Default)]
pub struct FloodDetector {
    windows: Arc<DashMap<(i64, u64), VecDeque<DateTime<Utc>>>>,
}

impl FloodDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message timestamp and check the window against the
    /// policy threshold.
    ///
    /// A disabled policy short-circuits without recording, so the map
    /// does not grow while anti-flood is off.
    pub fn record_and_check(
        &self,
        chat_id: i64,
        user_id: u64,
        timestamp: DateTime<Utc>,
        policy: &AntiFloodPolicy,
    ) -> FloodVerdict {
        if !policy.enabled {
            return FloodVerdict::Ok;
        }

        let horizon = timestamp - Duration::seconds(i64::from(policy.window_secs));

        let mut window = self.windows.entry((chat_id, user_id)).or_default();
        // Only strictly older entries leave; one exactly window_secs old
        // still counts.
        while window.front().is_some_and(|&t| t < horizon) {
            window.pop_front();
        }
        window.push_back(timestamp);

        if window.len() >= policy.threshold as usize {
            FloodVerdict::Exceeded
        } else {
            FloodVerdict::Ok
        }
    }

    /// Drop a user's window, e.g. right after a penalty was applied.
    pub fn clear(&self, chat_id: i64, user_id: u64) {
        self.windows.remove(&(chat_id, user_id));
    }

    /// Evict stale timestamps everywhere and drop empty windows.
    /// Runs on the periodic tick.
    pub fn decay(&self, now: DateTime<Utc>, policy: &AntiFloodPolicy) {
        let horizon = now - Duration::seconds(i64::from(policy.window_secs));
        self.windows.retain(|_, window| {
            while window.front().is_some_and(|&t| t < horizon) {
                window.pop_front();
            }
            !window.is_empty()
        });
    }

    #[cfg(test)]
    fn window_len(&self, chat_id: i64, user_id: u64) -> usize {
        self.windows
            .get(&(chat_id, user_id))
            .map(|w| w.len())
            .unwrap_or(0)
    }
}
