//! Signed-in user state: the credential pair, the mirrored account profile,
//! and the login flag.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::Store;

/// File name under the data directory
const STORE_NAME: &str = "user";

/// The token pair issued at login.
///
/// Both tokens are needed for silent refresh. An access token without a
/// refresh token is still attached to requests, but its expiry forces a new
/// login instead of a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credentials {
    /// Both tokens present: the session can be validated and silently
    /// refreshed.
    pub fn is_refreshable(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_empty() && self.refresh_token.is_empty()
    }
}

/// Account fields mirrored from the backend at login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AccountProfile {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub phone: String,
    pub avatar_url: String,
}

/// The whole persisted user record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserRecord {
    pub credentials: Credentials,
    pub profile: AccountProfile,
    pub logged_in: bool,
    pub logged_in_at: Option<DateTime<Utc>>,
}

/// User store plus a login-state channel, so callers can react to sign-in
/// and sign-out without polling the record.
pub struct UserStore {
    store: Store<UserRecord>,
    login_tx: watch::Sender<bool>,
}

impl UserStore {
    pub async fn open(dir: &Path) -> Self {
        let store: Store<UserRecord> = Store::open(dir, STORE_NAME).await;
        let logged_in = store.get().await.logged_in;
        let (login_tx, _) = watch::channel(logged_in);
        Self { store, login_tx }
    }

    pub async fn get(&self) -> UserRecord {
        self.store.get().await
    }

    pub async fn credentials(&self) -> Credentials {
        self.store.get().await.credentials
    }

    /// Current access token, empty when signed out. Read by the pipeline at
    /// send time.
    pub async fn access_token(&self) -> String {
        self.store.get().await.credentials.access_token
    }

    pub async fn update(&self, apply: impl FnOnce(&mut UserRecord)) -> UserRecord {
        let record = self.store.update(apply).await;
        self.login_tx.send_replace(record.logged_in);
        record
    }

    /// Drop credentials, profile and login flag. Idempotent.
    pub async fn clear(&self) -> UserRecord {
        self.update(|record| *record = UserRecord::default()).await
    }

    /// Observe the login flag. The receiver sees the current value right
    /// away and every change after it.
    pub fn watch_login(&self) -> watch::Receiver<bool> {
        self.login_tx.subscribe()
    }
}
