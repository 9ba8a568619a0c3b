//! Welcome dispatcher rendering.
//!
//! Template substitution and button rows for the welcome and
//! verification-prompt messages. Sending and the auto-delete timer are
//! orchestrated by the engine.

use crate::policy::{VerificationPolicy, WelcomePolicy};
use crate::utils::html_escape;

use super::actions::Button;
use super::event::VERIFY_CALLBACK_PREFIX;

/// Label on the verification prompt's callback button.
const VERIFY_BUTTON_LABEL: &str = "✅ 我是人类 (点击验证)";

/// Render the welcome template for a joined member.
///
/// Supports `{username}`, `{mention}` (an HTML deep link) and `{id}`.
/// The display name is user-controlled and therefore escaped.
pub fn render_welcome(policy: &WelcomePolicy, user_id: u64, display_name: &str) -> String {
    let name = html_escape(display_name);
    let mention = format!("<a href=\"tg://user?id={user_id}\">{name}</a>");

    policy
        .message
        .replace("{username}", &name)
        .replace("{mention}", &mention)
        .replace("{id}", &user_id.to_string())
}

/// One row per configured welcome button.
pub fn welcome_buttons(policy: &WelcomePolicy) -> Vec<Button> {
    policy
        .buttons
        .iter()
        .map(|button| Button::url(&button.label, &button.url))
        .collect()
}

/// Render the verification prompt for a joined member.
///
/// Supports `{username}` and `{timeout}`.
pub fn render_prompt(policy: &VerificationPolicy, display_name: &str) -> String {
    policy
        .prompt
        .replace("{username}", &html_escape(display_name))
        .replace("{timeout}", &policy.timeout_secs.to_string())
}

/// The single callback button on the verification prompt.
pub fn prompt_button(user_id: u64) -> Button {
    Button::callback(VERIFY_BUTTON_LABEL, format!("{VERIFY_CALLBACK_PREFIX}{user_id}"))
}
