//! Policy configuration.
//!
//! The engine is driven by a single immutable [`PolicyConfiguration`]
//! snapshot. The operator-facing tool writes it as a JSON document
//! (camelCase keys, matching that tool's schema); we parse, validate and
//! publish it through the [`store::PolicyStore`]. An invalid document is
//! rejected wholesale - the engine never observes a partial update.

mod store;
mod watcher;

pub use store::PolicyStore;
pub use watcher::{load_policy_file, spawn_policy_watcher};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a policy document.
///
/// These occur at publish time only. Once a snapshot is published it is
/// valid by construction and stays valid for its whole lifetime.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("policy file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("verification is enabled but its timeout is zero")]
    ZeroVerificationTimeout,

    #[error("anti-flood is enabled but its threshold or window is zero")]
    ZeroFloodLimits,

    #[error("welcome button {0:?} has an empty label or an invalid url")]
    InvalidButton(String),

    #[error("scheduled task {id:?}: {problem}")]
    InvalidTask { id: String, problem: &'static str },
}

/// Penalty applied on verification timeout or flood violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PenaltyAction {
    Mute,
    Kick,
    Ban,
}

/// One inline URL button attached to the welcome message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeButton {
    pub label: String,
    pub url: String,
}

/// Welcome message settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WelcomePolicy {
    pub enabled: bool,

    /// Template with `{username}`, `{mention}` and `{id}` placeholders.
    pub message: String,

    /// Seconds until the welcome message is deleted. 0 = keep forever.
    #[serde(rename = "deleteAfter")]
    pub delete_after_secs: u32,

    pub buttons: Vec<WelcomeButton>,

    /// Delete the platform's native "user joined" service message.
    pub delete_service_message: bool,
}

impl Default for WelcomePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            message: "欢迎 {username} 来到本群！\n\n请先查看群规，如果不守规矩会被踢出哦。".to_string(),
            delete_after_secs: 30,
            buttons: vec![
                WelcomeButton {
                    label: "查看群规".to_string(),
                    url: "https://t.me/your_channel/123".to_string(),
                },
                WelcomeButton {
                    label: "访问官网".to_string(),
                    url: "https://example.com".to_string(),
                },
            ],
            delete_service_message: true,
        }
    }
}

/// New-member verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationPolicy {
    pub enabled: bool,

    /// Seconds the member has to click the verify button.
    #[serde(rename = "timeout")]
    pub timeout_secs: u32,

    /// Applied when the deadline elapses unverified.
    pub action: PenaltyAction,

    /// Prompt template with `{username}` and `{timeout}` placeholders.
    #[serde(rename = "welcomeMessage")]
    pub prompt: String,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 60,
            action: PenaltyAction::Mute,
            prompt: "你好 {username}，请在 {timeout} 秒内点击下方按钮验证你不是机器人。".to_string(),
        }
    }
}

/// Anti-flood settings nested under [`ProtectionPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AntiFloodPolicy {
    pub enabled: bool,

    /// Message count that trips the detector.
    pub threshold: u32,

    /// Rolling window in seconds the count is taken over.
    #[serde(rename = "timeWindow")]
    pub window_secs: u32,

    pub action: PenaltyAction,
}

impl Default for AntiFloodPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            window_secs: 10,
            action: PenaltyAction::Mute,
        }
    }
}

/// Content protection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtectionPolicy {
    pub block_links: bool,
    pub block_forwarded: bool,

    /// Matched case-insensitively as substrings, in configuration order.
    pub sensitive_words: Vec<String>,

    pub anti_flood: AntiFloodPolicy,
}

impl Default for ProtectionPolicy {
    fn default() -> Self {
        Self {
            block_links: true,
            block_forwarded: false,
            sensitive_words: vec![
                "加群".to_string(),
                "兼职".to_string(),
                "刷单".to_string(),
                "free money".to_string(),
                "crypto".to_string(),
            ],
            anti_flood: AntiFloodPolicy::default(),
        }
    }
}

/// What the chat does while night mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NightModeKind {
    /// Only admins may send (chat-wide send permission revoked).
    Mute,
    /// Every new message is deleted, admin messages included.
    Close,
}

/// Scheduled quiet-period settings. The window may wrap past midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NightModePolicy {
    pub enabled: bool,

    #[serde(rename = "startTime", with = "hhmm")]
    pub start: NaiveTime,

    #[serde(rename = "endTime", with = "hhmm")]
    pub end: NaiveTime,

    pub mode: NightModeKind,
}

impl Default for NightModePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            mode: NightModeKind::Mute,
        }
    }
}

/// One periodic broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    pub content: String,

    #[serde(rename = "interval")]
    pub interval_hours: u32,

    /// Wall-clock anchor for the first firing of the day.
    #[serde(with = "hhmm")]
    pub next_run: NaiveTime,

    pub active: bool,
}

/// The full policy snapshot the engine reads on every event.
///
/// Replaced wholesale on operator saves, never mutated in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfiguration {
    pub welcome: WelcomePolicy,
    pub verification: VerificationPolicy,
    pub protection: ProtectionPolicy,
    pub night_mode: NightModePolicy,
    pub scheduled_tasks: Vec<ScheduledTask>,
}

impl PolicyConfiguration {
    /// Validate a parsed document before it may be published.
    ///
    /// Time fields are already shape-checked by the `HH:MM` deserializer,
    /// so only cross-field constraints are left here.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.verification.enabled && self.verification.timeout_secs == 0 {
            return Err(PolicyError::ZeroVerificationTimeout);
        }

        let flood = &self.protection.anti_flood;
        if flood.enabled && (flood.threshold == 0 || flood.window_secs == 0) {
            return Err(PolicyError::ZeroFloodLimits);
        }

        for button in &self.welcome.buttons {
            if button.label.trim().is_empty() || url::Url::parse(&button.url).is_err() {
                return Err(PolicyError::InvalidButton(button.label.clone()));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for task in &self.scheduled_tasks {
            if task.id.trim().is_empty() {
                return Err(PolicyError::InvalidTask {
                    id: task.id.clone(),
                    problem: "empty id",
                });
            }
            if !seen.insert(task.id.as_str()) {
                return Err(PolicyError::InvalidTask {
                    id: task.id.clone(),
                    problem: "duplicate id",
                });
            }
            if task.interval_hours == 0 {
                return Err(PolicyError::InvalidTask {
                    id: task.id.clone(),
                    problem: "interval must be at least one hour",
                });
            }
        }

        Ok(())
    }
}

/// Serde helper for `HH:MM` wall-clock fields.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(de)?;
        NaiveTime::parse_from_str(&raw, "%H:%M").map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PolicyConfiguration::default().validate().is_ok());
    }

    #[test]
    fn parses_operator_schema() {
        let doc = r#"{
            "verification": { "enabled": true, "timeout": 90, "action": "kick" },
            "protection": {
                "blockLinks": false,
                "sensitiveWords": ["spam"],
                "antiFlood": { "enabled": true, "threshold": 3, "timeWindow": 5, "action": "ban" }
            },
            "nightMode": { "enabled": true, "startTime": "22:30", "endTime": "07:00", "mode": "close" },
            "scheduledTasks": [
                { "id": "1", "content": "hi", "interval": 6, "nextRun": "14:00", "active": true }
            ]
        }"#;

        let policy: PolicyConfiguration = serde_json::from_str(doc).unwrap();
        assert_eq!(policy.verification.timeout_secs, 90);
        assert_eq!(policy.verification.action, PenaltyAction::Kick);
        assert!(!policy.protection.block_links);
        assert_eq!(policy.protection.anti_flood.window_secs, 5);
        assert_eq!(policy.night_mode.mode, NightModeKind::Close);
        assert_eq!(policy.night_mode.start, NaiveTime::from_hms_opt(22, 30, 0).unwrap());
        assert_eq!(policy.scheduled_tasks[0].interval_hours, 6);
        // Missing sections fall back to defaults.
        assert!(policy.welcome.enabled);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn rejects_malformed_time() {
        let doc = r#"{ "nightMode": { "startTime": "25:99" } }"#;
        assert!(serde_json::from_str::<PolicyConfiguration>(doc).is_err());
    }

    #[test]
    fn rejects_zero_verification_timeout() {
        let mut policy = PolicyConfiguration::default();
        policy.verification.timeout_secs = 0;
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::ZeroVerificationTimeout)
        ));

        // A zero timeout is fine while verification is off.
        policy.verification.enabled = false;
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn rejects_zero_flood_limits() {
        let mut policy = PolicyConfiguration::default();
        policy.protection.anti_flood.threshold = 0;
        assert!(matches!(policy.validate(), Err(PolicyError::ZeroFloodLimits)));
    }

    #[test]
    fn rejects_bad_welcome_button() {
        let mut policy = PolicyConfiguration::default();
        policy.welcome.buttons.push(WelcomeButton {
            label: "rules".to_string(),
            url: "not a url".to_string(),
        });
        assert!(matches!(policy.validate(), Err(PolicyError::InvalidButton(_))));
    }

    #[test]
    fn rejects_duplicate_task_ids() {
        let task = ScheduledTask {
            id: "a".to_string(),
            content: "x".to_string(),
            interval_hours: 1,
            next_run: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            active: true,
        };
        let mut policy = PolicyConfiguration::default();
        policy.scheduled_tasks = vec![task.clone(), task];
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::InvalidTask { problem: "duplicate id", .. })
        ));
    }

    #[test]
    fn rejects_zero_task_interval() {
        let mut policy = PolicyConfiguration::default();
        policy.scheduled_tasks = vec![ScheduledTask {
            id: "a".to_string(),
            content: "x".to_string(),
            interval_hours: 0,
            next_run: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            active: true,
        }];
        assert!(matches!(policy.validate(), Err(PolicyError::InvalidTask { .. })));
    }
}
