//! Content filter.
//!
//! Stateless classification of a message against the protection policy.
//! The filter is role-agnostic; the engine grants the admin exemption
//! for link blocks and performs the actual deletion.

use crate::policy::ProtectionPolicy;

/// Markers that make a message count as containing a link.
const LINK_MARKERS: [&str; 3] = ["http://", "https://", "t.me/"];

/// Why a message was blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The first configured sensitive word found in the text.
    SensitiveWord(String),
    Link,
    Forwarded,
}

/// Classification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block(BlockReason),
}

/// Classify a message. Pure function, no side effects.
///
/// Precedence when several reasons apply: sensitive word > link >
/// forwarded, so a sensitive word wins even on a forwarded link.
pub fn classify(text: &str, is_forwarded: bool, policy: &ProtectionPolicy) -> Verdict {
    let lowered = text.to_lowercase();

    // Configuration order decides which word is reported.
    for word in &policy.sensitive_words {
        if !word.is_empty() && lowered.contains(&word.to_lowercase()) {
            return Verdict::Block(BlockReason::SensitiveWord(word.clone()));
        }
    }

    if policy.block_links && LINK_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return Verdict::Block(BlockReason::Link);
    }

    if policy.block_forwarded && is_forwarded {
        return Verdict::Block(BlockReason::Forwarded);
    }

    Verdict::Allow
}
