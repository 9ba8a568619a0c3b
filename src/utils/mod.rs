//! Utility functions.

/// Escape text for Telegram HTML parse mode.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Display name for a member: full name, or `@username` when the
/// profile carries no name at all.
pub fn display_name(first_name: &str, last_name: Option<&str>, username: Option<&str>) -> String {
    match (first_name, last_name) {
        ("", None) => username.map(|u| format!("@{u}")).unwrap_or_default(),
        (first, None) => first.to_string(),
        (first, Some(last)) => format!("{first} {last}"),
    }
}
