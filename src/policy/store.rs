//! Atomic policy snapshot slot.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::PolicyConfiguration;

/// Shared slot holding the latest published policy snapshot.
///
/// Readers get an `Arc` to an immutable snapshot; a publish swaps the
/// reference, so in-flight event handling keeps seeing the snapshot it
/// started with. The slot starts empty - the engine refuses to process
/// events until the first publish.
#[derive(Clone, Default)]
pub struct PolicyStore {
    slot: Arc<RwLock<Option<Arc<PolicyConfiguration>>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new snapshot, replacing the previous one wholesale.
    ///
    /// The caller must have validated the configuration already.
    pub fn publish(&self, policy: PolicyConfiguration) {
        *self.slot.write() = Some(Arc::new(policy));
        info!("policy snapshot published");
    }

    /// The latest snapshot, or `None` if nothing was ever published.
    pub fn snapshot(&self) -> Option<Arc<PolicyConfiguration>> {
        self.slot.read().clone()
    }
}
