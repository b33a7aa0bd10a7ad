//! Persisted client state.
//!
//! Each logical store is a single JSON record in the data directory, read
//! whole at startup and rewritten whole on every mutation. Records carry
//! per-field serde defaults, so a file written by an older build or damaged
//! on disk degrades to defaults instead of refusing to load. Persist
//! failures are logged and swallowed; the in-memory record stays
//! authoritative for the rest of the session.

pub mod env;
pub mod settings;
pub mod user;

pub use env::{EnvRecord, EnvStore};
pub use settings::{SettingsRecord, SettingsStore, Theme};
pub use user::{AccountProfile, Credentials, UserRecord, UserStore};

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// One JSON file under the data directory.
struct StoreFile {
    path: PathBuf,
}

impl StoreFile {
    fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{name}.json")),
        }
    }

    /// Read and parse the record. A missing, unreadable, or unparsable file
    /// yields defaults.
    async fn read<T: DeserializeOwned + Default>(&self) -> T {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "store file missing, using defaults");
                return T::default();
            }
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "failed to read store file, using defaults");
                return T::default();
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "store file did not parse, using defaults");
                T::default()
            }
        }
    }

    /// Write the record. Persist failures are logged and swallowed.
    async fn write<T: Serialize>(&self, record: &T) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %e, path = %parent.display(), "failed to create store directory");
                return;
            }
        }
        let json = match serde_json::to_string_pretty(record) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize store record");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.path, json).await {
            warn!(error = %e, path = %self.path.display(), "failed to write store file");
        }
    }
}

/// A whole-record JSON store with an in-memory copy behind a lock.
///
/// Mutations go through [`Store::update`], which applies a closure to the
/// record and persists the result while still holding the write lock, so
/// concurrent updates serialize and the file always reflects the last
/// in-memory state.
pub struct Store<T> {
    file: StoreFile,
    state: RwLock<T>,
}

impl<T> Store<T>
where
    T: Clone + Default + Serialize + DeserializeOwned,
{
    /// Open the named store under `dir`, loading any persisted record.
    pub async fn open(dir: &Path, name: &str) -> Self {
        let file = StoreFile::new(dir, name);
        let state = file.read().await;
        Self {
            file,
            state: RwLock::new(state),
        }
    }

    /// Snapshot of the current record.
    pub async fn get(&self) -> T {
        self.state.read().await.clone()
    }

    /// Apply `apply` to the record and persist the result. Fields the
    /// closure does not touch keep their values.
    pub async fn update(&self, apply: impl FnOnce(&mut T)) -> T {
        let mut state = self.state.write().await;
        apply(&mut state);
        let snapshot = state.clone();
        self.file.write(&snapshot).await;
        snapshot
    }

    /// Reset the record to its defaults. Idempotent.
    pub async fn clear(&self) -> T {
        self.update(|record| *record = T::default()).await
    }
}
