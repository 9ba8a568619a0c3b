//! Night-mode scheduler.
//!
//! Phase is a pure function of the wall clock and the policy; the
//! per-chat watch only remembers the last observed phase so transitions
//! are edge-triggered (the minute tick never re-applies a phase it
//! already applied).

use std::sync::Arc;

use chrono::NaiveTime;
use dashmap::DashMap;

use crate::policy::{NightModeKind, NightModePolicy};

/// Current night-mode phase of a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Day,
    Night,
}

/// Edge emitted when a chat's phase changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Entered night; carries the mode to apply.
    Entered(NightModeKind),
    /// Left night. `restore` is set when entry revoked chat-wide send
    /// permission, i.e. it must now be given back.
    Left { restore: bool },
}

/// Compute the phase holding at `now`.
///
/// With `start <= end` night holds on `[start, end)`; when the window
/// wraps past midnight it holds on `t >= start || t < end`.
pub fn phase_at(now: NaiveTime, policy: &NightModePolicy) -> Phase {
    if !policy.enabled {
        return Phase::Day;
    }

    let night = if policy.start <= policy.end {
        now >= policy.start && now < policy.end
    } else {
        now >= policy.start || now < policy.end
    };

    if night { Phase::Night } else { Phase::Day }
}

struct ChatNight {
    phase: Phase,
    /// Whether entering night revoked chat-wide send permission.
    restricted: bool,
}

/// Per-chat night-mode runtime state.
#[derive(Clone, Default)]
pub struct NightWatch {
    chats: Arc<DashMap<i64, ChatNight>>,
}

impl NightWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the phase holding now and return the transition to apply,
    /// if any. Transitions are strictly monotonic per chat: observing
    /// the same phase twice yields nothing.
    ///
    /// The first observation after startup counts as an edge only into
    /// `Night`, so a restart mid-night re-applies the quiet period
    /// without announcing a morning that never happened.
    pub fn observe(&self, chat_id: i64, now: NaiveTime, policy: &NightModePolicy) -> Option<Transition> {
        let phase = phase_at(now, policy);

        match self.chats.get_mut(&chat_id) {
            None => {
                let restricted = phase == Phase::Night && policy.mode == NightModeKind::Mute;
                self.chats.insert(chat_id, ChatNight { phase, restricted });
                (phase == Phase::Night).then_some(Transition::Entered(policy.mode))
            }
            Some(mut state) if state.phase != phase => {
                state.phase = phase;
                match phase {
                    Phase::Night => {
                        state.restricted = policy.mode == NightModeKind::Mute;
                        Some(Transition::Entered(policy.mode))
                    }
                    Phase::Day => {
                        let restore = state.restricted;
                        state.restricted = false;
                        Some(Transition::Left { restore })
                    }
                }
            }
            Some(_) => None,
        }
    }

    /// Whether the chat is currently in the night phase.
    pub fn is_night(&self, chat_id: i64) -> bool {
        self.chats
            .get(&chat_id)
            .map(|state| state.phase == Phase::Night)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn wrapping(mode: NightModeKind) -> NightModePolicy {
        NightModePolicy {
            enabled: true,
            start: hm(23, 0),
            end: hm(8, 0),
            mode,
        }
    }

    #[test]
    fn wraparound_window_boundaries_are_exact() {
        let p = wrapping(NightModeKind::Mute);
        assert_eq!(phase_at(hm(22, 59), &p), Phase::Day);
        assert_eq!(phase_at(hm(23, 0), &p), Phase::Night);
        assert_eq!(phase_at(hm(3, 0), &p), Phase::Night);
        assert_eq!(phase_at(hm(7, 59), &p), Phase::Night);
        assert_eq!(phase_at(hm(8, 0), &p), Phase::Day);
    }

    #[test]
    fn same_day_window() {
        let p = NightModePolicy { start: hm(13, 0), end: hm(14, 0), ..wrapping(NightModeKind::Mute) };
        assert_eq!(phase_at(hm(12, 59), &p), Phase::Day);
        assert_eq!(phase_at(hm(13, 0), &p), Phase::Night);
        assert_eq!(phase_at(hm(13, 59), &p), Phase::Night);
        assert_eq!(phase_at(hm(14, 0), &p), Phase::Day);
    }

    #[test]
    fn disabled_policy_is_always_day() {
        let p = NightModePolicy { enabled: false, ..wrapping(NightModeKind::Mute) };
        assert_eq!(phase_at(hm(23, 30), &p), Phase::Day);
    }

    #[test]
    fn transitions_are_edge_triggered() {
        let watch = NightWatch::new();
        let p = wrapping(NightModeKind::Mute);

        assert_eq!(watch.observe(1, hm(12, 0), &p), None);
        assert_eq!(watch.observe(1, hm(12, 1), &p), None);
        assert_eq!(
            watch.observe(1, hm(23, 0), &p),
            Some(Transition::Entered(NightModeKind::Mute))
        );
        // Level stays Night over subsequent ticks, no repeat edge.
        assert_eq!(watch.observe(1, hm(23, 1), &p), None);
        assert_eq!(watch.observe(1, hm(3, 0), &p), None);
        assert_eq!(
            watch.observe(1, hm(8, 0), &p),
            Some(Transition::Left { restore: true })
        );
        assert_eq!(watch.observe(1, hm(8, 1), &p), None);
    }

    #[test]
    fn close_mode_does_not_restore_permissions_on_exit() {
        let watch = NightWatch::new();
        let p = wrapping(NightModeKind::Close);

        watch.observe(1, hm(12, 0), &p);
        assert_eq!(
            watch.observe(1, hm(23, 30), &p),
            Some(Transition::Entered(NightModeKind::Close))
        );
        assert!(watch.is_night(1));
        assert_eq!(
            watch.observe(1, hm(8, 0), &p),
            Some(Transition::Left { restore: false })
        );
        assert!(!watch.is_night(1));
    }

    #[test]
    fn first_observation_mid_night_reapplies_quiet_period() {
        let watch = NightWatch::new();
        let p = wrapping(NightModeKind::Mute);
        assert_eq!(
            watch.observe(1, hm(2, 0), &p),
            Some(Transition::Entered(NightModeKind::Mute))
        );
    }

    #[test]
    fn first_observation_during_day_is_silent() {
        let watch = NightWatch::new();
        let p = wrapping(NightModeKind::Mute);
        assert_eq!(watch.observe(1, hm(12, 0), &p), None);
    }

    #[test]
    fn disabling_mid_night_reopens_the_chat() {
        let watch = NightWatch::new();
        let p = wrapping(NightModeKind::Mute);
        watch.observe(1, hm(23, 30), &p);

        let disabled = NightModePolicy { enabled: false, ..p };
        assert_eq!(
            watch.observe(1, hm(23, 31), &disabled),
            Some(Transition::Left { restore: true })
        );
    }
}
