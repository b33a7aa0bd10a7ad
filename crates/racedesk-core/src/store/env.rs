//! Deployment environment descriptor.
//!
//! Holds what the console reports about itself to the backend: which
//! deployment it targets, its version and platform, and a stable
//! per-install device id minted on first run.

use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::Store;

/// File name under the data directory
const STORE_NAME: &str = "env";

/// Length of a generated device id
const DEVICE_ID_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct EnvRecord {
    pub environment: String,
    pub app_id: String,
    pub version: String,
    pub platform: String,
    pub user_agent: String,
    pub device_id: String,
}

impl Default for EnvRecord {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            app_id: "racedesk".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            user_agent: concat!("racedesk/", env!("CARGO_PKG_VERSION")).to_string(),
            device_id: String::new(),
        }
    }
}

pub type EnvStore = Store<EnvRecord>;

impl Store<EnvRecord> {
    /// Open the env store under `dir`, minting a device id on first run.
    pub async fn open_env(dir: &Path) -> Self {
        let store = Self::open(dir, STORE_NAME).await;
        if store.get().await.device_id.is_empty() {
            let id = generate_device_id();
            store.update(|record| record.device_id = id).await;
        }
        store
    }
}

fn generate_device_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DEVICE_ID_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mints_a_device_id_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvStore::open_env(dir.path()).await;
        let first = store.get().await.device_id;
        assert_eq!(first.len(), DEVICE_ID_LENGTH);

        let reopened = EnvStore::open_env(dir.path()).await;
        assert_eq!(reopened.get().await.device_id, first);
    }

    #[tokio::test]
    async fn defaults_describe_this_build() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvStore::open_env(dir.path()).await;
        let record = store.get().await;
        assert_eq!(record.environment, "production");
        assert_eq!(record.version, env!("CARGO_PKG_VERSION"));
        assert!(!record.platform.is_empty());
        assert!(record.user_agent.starts_with("racedesk/"));
    }
}
