//! Sender role resolution.
//!
//! The engine consumes a pre-resolved [`crate::engine::event::SenderRole`]
//! with every message; this module is where roles come from. Lookups hit
//! the `getChatMember` API and are cached per (chat, user) to keep the
//! per-message cost down.

mod checker;

pub use checker::RoleResolver;
