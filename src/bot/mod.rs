//! Bot module - Telegram-facing plumbing.
//!
//! The adapter implements the engine's action port, the dispatcher
//! translates inbound updates into engine events, and the runtime picks
//! between polling and webhook delivery.

pub mod adapter;
pub mod dispatcher;
mod runtime;
pub mod webhook;

pub use adapter::TelegramActions;
pub use dispatcher::build_dispatcher;
pub use runtime::run;
