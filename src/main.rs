//! Praetor - Group moderation automation for Telegram.
//!
//! Reads a policy document maintained by the operator tool and enforces
//! it: new-member verification, content filtering, flood control, night
//! mode and scheduled broadcasts.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `policy` - Policy document parsing, validation, hot reload
//! - `engine` - The moderation engine (per-chat serialized workers)
//! - `permissions` - Sender role resolution with caching
//! - `bot` - Telegram plumbing (adapter, dispatcher, runtime)
//! - `utils` - Utility functions

mod bot;
mod config;
mod engine;
mod permissions;
mod policy;
mod utils;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use teloxide::adaptors::throttle::Limits;
use teloxide::prelude::*;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use engine::ModerationEngine;
use engine::event::ChatEvent;
use permissions::RoleResolver;
use policy::{PolicyConfiguration, PolicyError, PolicyStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("praetor=info,teloxide=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    info!("Starting Praetor...");

    let config = Config::from_env();
    info!("Configuration loaded successfully");
    info!("Bot mode: {:?}", config.bot_mode);

    // First policy snapshot. A missing file means defaults; a present
    // but invalid file is a configuration error worth failing on.
    let store = PolicyStore::new();
    let initial = match policy::load_policy_file(&config.policy_file) {
        Ok(policy) => policy,
        Err(PolicyError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "policy file {} not found, starting with built-in defaults",
                config.policy_file.display()
            );
            PolicyConfiguration::default()
        }
        Err(e) => return Err(e.into()),
    };
    store.publish(initial);

    // Throttle respects Telegram's rate limits (30 msg/s globally,
    // 20 msg/min to the same group).
    let bot = Bot::new(&config.bot_token).throttle(Limits::default());
    info!("Bot initialized with rate limiting (Throttle)");

    let me = bot.get_me().await?;
    info!("Bot username: @{}", me.username());

    if config.owner_ids.is_empty() {
        info!("No owner IDs configured (OWNER_IDS is empty)");
    } else {
        info!("Bot owners: {:?}", config.owner_ids);
    }
    if config.group_ids.is_empty() {
        warn!("GROUP_IDS is empty: night mode and broadcasts are inactive");
    } else {
        info!("Managed chats: {:?}", config.group_ids);
    }

    let actions = Arc::new(bot::TelegramActions::new(bot.clone()));
    let engine = ModerationEngine::new(actions, store.clone(), config.group_ids.clone());
    let roles = RoleResolver::new(bot.inner().clone(), config.owner_ids.clone());

    // Hot reload of the policy file.
    let _watcher = policy::spawn_policy_watcher(config.policy_file.clone(), store);

    // Minute tick driving night mode, broadcasts and flood decay.
    let tick_engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            tick_engine.submit(ChatEvent::Tick { now: Utc::now() });
        }
    });

    let dispatcher = bot::build_dispatcher(bot.clone(), engine, roles);
    bot::run(&config, dispatcher, bot).await;

    Ok(())
}
