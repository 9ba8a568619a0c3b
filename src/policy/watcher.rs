//! Policy file loading and change watching.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{PolicyConfiguration, PolicyError, PolicyStore};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Read, parse and validate a policy document from disk.
pub fn load_policy_file(path: &Path) -> Result<PolicyConfiguration, PolicyError> {
    let raw = std::fs::read_to_string(path)?;
    let policy: PolicyConfiguration = serde_json::from_str(&raw)?;
    policy.validate()?;
    Ok(policy)
}

/// Watch the policy file for changes and republish on every valid edit.
///
/// The file's mtime is polled; a reload that fails to read, parse or
/// validate keeps the previously published snapshot so the engine never
/// sees a broken configuration.
pub fn spawn_policy_watcher(path: PathBuf, store: PolicyStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_mtime = file_mtime(&path);
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let mtime = file_mtime(&path);
            if mtime == last_mtime {
                continue;
            }
            last_mtime = mtime;

            debug!("policy file {} changed, reloading", path.display());
            match load_policy_file(&path) {
                Ok(policy) => {
                    store.publish(policy);
                    info!("policy file {} reloaded", path.display());
                }
                Err(e) => {
                    error!(
                        "failed to reload policy file {}, keeping previous snapshot: {}",
                        path.display(),
                        e
                    );
                }
            }
        }
    })
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_rejects_invalid_document() {
        let dir = std::env::temp_dir();
        let path = dir.join("praetor-policy-invalid-test.json");
        std::fs::write(&path, r#"{ "verification": { "enabled": true, "timeout": 0 } }"#).unwrap();

        let result = load_policy_file(&path);
        assert!(matches!(result, Err(PolicyError::ZeroVerificationTimeout)));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_round_trips_valid_document() {
        let dir = std::env::temp_dir();
        let path = dir.join("praetor-policy-valid-test.json");
        std::fs::write(&path, r#"{ "protection": { "blockForwarded": true } }"#).unwrap();

        let policy = load_policy_file(&path).unwrap();
        assert!(policy.protection.block_forwarded);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = load_policy_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(PolicyError::Io(_))));
    }
}
