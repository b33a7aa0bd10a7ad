//! Session lifecycle: validation, silent refresh, teardown.
//!
//! Expiry is handled in two tiers. A token already past expiry blocks the
//! caller until a refresh has succeeded or failed; a token merely inside the
//! refresh buffer lets the caller proceed on the current token while a
//! refresh runs in the background. At most one refresh is on the wire at any
//! time; concurrent triggers coalesce onto it. An unrecoverable refresh, or
//! a 401 from any endpoint, tears the session down: credentials cleared, one
//! warning, one redirect to the login screen carrying the route the user was
//! headed to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::client::resolve_url;
use crate::api::error::ApiError;
use crate::auth::token::{self, TokenStatus};
use crate::config::Config;
use crate::store::{AccountProfile, Credentials, UserStore};

/// Notice shown exactly once when the session is torn down
const SESSION_EXPIRED_NOTICE: &str = "Your session has expired. Please sign in again.";

/// How the session reaches the view layer. It pushes exactly two things at
/// it: a one-shot warning and a redirect to the login screen.
pub trait Navigator: Send + Sync {
    /// Route currently displayed, used as the default return target.
    fn current_location(&self) -> String;

    /// Send the user to the login screen; `redirect` is the route to come
    /// back to after signing in.
    fn redirect_to_login(&self, redirect: &str);

    /// Show a warning notice.
    fn warn(&self, message: &str);
}

/// Snapshot of session health for status displays.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    /// A refreshable credential pair is present and the access token has not
    /// expired.
    pub authenticated: bool,
    /// Health of the access token, `None` when there is none.
    pub token_status: Option<TokenStatus>,
    /// Expiry of the access token as epoch seconds, when decodable.
    pub expires_at: Option<i64>,
    /// A refresh is on the wire right now.
    pub refreshing: bool,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct SessionInner {
    store: Arc<UserStore>,
    navigator: Arc<dyn Navigator>,
    http: reqwest::Client,
    refresh_url: String,
    login_location: String,
    /// Held by whichever task is currently refreshing. Everyone else either
    /// waits on it (expired path) or declines to start (background path).
    refresh_gate: Arc<Mutex<()>>,
    /// Latch for the teardown notice and redirect, re-armed at login.
    torn_down: AtomicBool,
}

/// Cloning is cheap - all clones share the same inner state via Arc.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(
        store: Arc<UserStore>,
        navigator: Arc<dyn Navigator>,
        http: reqwest::Client,
        config: &Config,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                store,
                navigator,
                http,
                refresh_url: resolve_url(&config.base_url, &config.refresh_path),
                login_location: config.login_location.clone(),
                refresh_gate: Arc::new(Mutex::new(())),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn store(&self) -> &Arc<UserStore> {
        &self.inner.store
    }

    /// Answer whether navigation to `intended` may proceed as authenticated.
    ///
    /// An expired token is refreshed before answering; a token inside the
    /// refresh buffer answers `true` immediately and refreshes in the
    /// background. A failed refresh tears the session down with `intended`
    /// preserved as the return target, then answers `false`.
    pub async fn validate(&self, intended: &str) -> bool {
        let credentials = self.inner.store.credentials().await;
        if !credentials.is_refreshable() {
            return false;
        }
        match token::evaluate(&credentials.access_token) {
            TokenStatus::Valid => true,
            TokenStatus::ExpiringSoon => {
                self.refresh_in_background();
                true
            }
            TokenStatus::Expired => match self.refresh_expired().await {
                Ok(()) => true,
                Err(error) => {
                    warn!(error = %error, "token refresh failed");
                    self.teardown(Some(intended)).await;
                    false
                }
            },
        }
    }

    /// Pre-send hook for the request pipeline. Requests without a
    /// refreshable pair go out as they are; login and other public calls
    /// must not be blocked here.
    pub(crate) async fn ensure_fresh(&self) -> Result<(), ApiError> {
        let credentials = self.inner.store.credentials().await;
        if !credentials.is_refreshable() {
            return Ok(());
        }
        match token::evaluate(&credentials.access_token) {
            TokenStatus::Valid => Ok(()),
            TokenStatus::ExpiringSoon => {
                self.refresh_in_background();
                Ok(())
            }
            TokenStatus::Expired => {
                if let Err(error) = self.refresh_expired().await {
                    self.teardown(None).await;
                    return Err(error);
                }
                Ok(())
            }
        }
    }

    /// Refresh now regardless of token health. Used by the status tooling;
    /// the regular flows only refresh when expiry calls for it.
    pub async fn refresh_now(&self) -> Result<(), ApiError> {
        let result = {
            let _gate = self.inner.refresh_gate.lock().await;
            let credentials = self.inner.store.credentials().await;
            if !credentials.is_refreshable() {
                return Err(ApiError::Unauthenticated);
            }
            self.refresh_once(&credentials.refresh_token).await
        };
        if let Err(error) = result {
            warn!(error = %error, "forced token refresh failed");
            self.teardown(None).await;
            return Err(error);
        }
        Ok(())
    }

    /// Blocking refresh path for an expired token. Waits for the gate, then
    /// re-reads the token: whoever held the gate before us may already have
    /// replaced it.
    async fn refresh_expired(&self) -> Result<(), ApiError> {
        let _gate = self.inner.refresh_gate.lock().await;
        let credentials = self.inner.store.credentials().await;
        if !credentials.is_refreshable() {
            return Err(ApiError::Unauthenticated);
        }
        if !token::is_expired(&credentials.access_token) {
            debug!("token already refreshed while waiting");
            return Ok(());
        }
        self.refresh_once(&credentials.refresh_token).await
    }

    /// Detached refresh for the expiring-soon window. Failure is logged and
    /// swallowed; the next validation retries or escalates. If a refresh is
    /// already on the wire, nothing new starts.
    fn refresh_in_background(&self) {
        let Ok(gate) = Arc::clone(&self.inner.refresh_gate).try_lock_owned() else {
            debug!("refresh already in flight, not starting another");
            return;
        };
        let session = self.clone();
        tokio::spawn(async move {
            let _gate = gate;
            let credentials = session.inner.store.credentials().await;
            if !credentials.is_refreshable() {
                return;
            }
            if let Err(error) = session.refresh_once(&credentials.refresh_token).await {
                warn!(error = %error, "background token refresh failed");
            }
        });
    }

    /// One refresh round trip. Goes over the raw HTTP client with the
    /// refresh token as bearer; the decorated pipeline would attach the
    /// access token and recurse into freshness checks.
    async fn refresh_once(&self, refresh_token: &str) -> Result<(), ApiError> {
        debug!("refreshing access token");
        let response = self
            .inner
            .http
            .post(&self.inner.refresh_url)
            .bearer_auth(refresh_token)
            .send()
            .await
            .map_err(|e| ApiError::RefreshFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::RefreshFailed(format!(
                "refresh endpoint answered {}: {}",
                status.as_u16(),
                ApiError::truncate_body(&body)
            )));
        }

        let fresh: RefreshResponse = response
            .json()
            .await
            .map_err(|e| ApiError::RefreshFailed(e.to_string()))?;
        if fresh.access_token.is_empty() {
            return Err(ApiError::RefreshFailed(
                "refresh response carried no access token".to_string(),
            ));
        }

        self.inner
            .store
            .update(|record| {
                record.credentials.access_token = fresh.access_token;
                if let Some(rotated) = fresh.refresh_token {
                    record.credentials.refresh_token = rotated;
                }
            })
            .await;
        info!("access token refreshed");
        Ok(())
    }

    /// Clear the session and send the user back to the login screen.
    ///
    /// Safe to call from any number of concurrent failures: the store clear
    /// is idempotent, and the notice plus redirect fire once until the next
    /// login re-arms them. `redirect` is the route to return to after
    /// signing in; when `None`, the current location is used. No redirect is
    /// issued when the target is already the login screen.
    pub async fn teardown(&self, redirect: Option<&str>) {
        self.inner.store.clear().await;
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            debug!("session already torn down, skipping notice");
            return;
        }
        warn!("session torn down, credentials cleared");
        self.inner.navigator.warn(SESSION_EXPIRED_NOTICE);
        let target = match redirect {
            Some(route) => route.to_string(),
            None => self.inner.navigator.current_location(),
        };
        if target != self.inner.login_location {
            self.inner.navigator.redirect_to_login(&target);
        }
    }

    /// 401 from any endpoint: the server no longer honors the token.
    pub(crate) async fn handle_unauthorized(&self) {
        debug!("server rejected the access token");
        self.teardown(None).await;
    }

    /// Install the credential pair and profile from a login or registration
    /// response, re-arming the teardown notice.
    pub async fn install(&self, credentials: Credentials, profile: AccountProfile) {
        self.inner.torn_down.store(false, Ordering::SeqCst);
        self.inner
            .store
            .update(move |record| {
                record.credentials = credentials;
                record.profile = profile;
                record.logged_in = true;
                record.logged_in_at = Some(Utc::now());
            })
            .await;
        info!("credentials installed");
    }

    /// Local sign-out: clear the stored session without notice or redirect.
    pub async fn sign_out(&self) {
        self.inner.store.clear().await;
        self.inner.torn_down.store(false, Ordering::SeqCst);
        info!("signed out");
    }

    pub async fn inspect(&self) -> SessionStatus {
        let credentials = self.inner.store.credentials().await;
        let token_status = if credentials.access_token.is_empty() {
            None
        } else {
            Some(token::evaluate(&credentials.access_token))
        };
        SessionStatus {
            authenticated: credentials.is_refreshable()
                && token_status != Some(TokenStatus::Expired),
            token_status,
            expires_at: token::decode_expiry(&credentials.access_token),
            refreshing: self.inner.refresh_gate.try_lock().is_err(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use std::sync::Mutex as StdMutex;

    struct RecordingNavigator {
        location: String,
        warnings: StdMutex<Vec<String>>,
        redirects: StdMutex<Vec<String>>,
    }

    impl RecordingNavigator {
        fn at(location: &str) -> Arc<Self> {
            Arc::new(Self {
                location: location.to_string(),
                warnings: StdMutex::new(Vec::new()),
                redirects: StdMutex::new(Vec::new()),
            })
        }

        fn warnings(&self) -> Vec<String> {
            self.warnings.lock().unwrap().clone()
        }

        fn redirects(&self) -> Vec<String> {
            self.redirects.lock().unwrap().clone()
        }
    }

    impl Navigator for RecordingNavigator {
        fn current_location(&self) -> String {
            self.location.clone()
        }

        fn redirect_to_login(&self, redirect: &str) {
            self.redirects.lock().unwrap().push(redirect.to_string());
        }

        fn warn(&self, message: &str) {
            self.warnings.lock().unwrap().push(message.to_string());
        }
    }

    fn token_expiring_at(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("{header}.{payload}.signature")
    }

    async fn session_at(
        dir: &std::path::Path,
        location: &str,
    ) -> (Session, Arc<UserStore>, Arc<RecordingNavigator>) {
        let store = Arc::new(UserStore::open(dir).await);
        let navigator = RecordingNavigator::at(location);
        let session = Session::new(
            Arc::clone(&store),
            navigator.clone() as Arc<dyn Navigator>,
            reqwest::Client::new(),
            &Config::default(),
        );
        (session, store, navigator)
    }

    async fn seed_tokens(store: &UserStore, access: &str, refresh: &str) {
        let access = access.to_string();
        let refresh = refresh.to_string();
        store
            .update(|record| {
                record.credentials = Credentials {
                    access_token: access,
                    refresh_token: refresh,
                };
                record.logged_in = true;
            })
            .await;
    }

    #[tokio::test]
    async fn validate_without_credentials_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _store, navigator) = session_at(dir.path(), "/dashboard").await;

        assert!(!session.validate("/races").await);
        assert!(navigator.warnings().is_empty());
        assert!(navigator.redirects().is_empty());
    }

    #[tokio::test]
    async fn validate_without_refresh_token_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let (session, store, _navigator) = session_at(dir.path(), "/dashboard").await;
        let future = Utc::now().timestamp() + 3600;
        seed_tokens(&store, &token_expiring_at(future), "").await;

        assert!(!session.validate("/races").await);
    }

    #[tokio::test]
    async fn validate_with_healthy_token_is_true() {
        let dir = tempfile::tempdir().unwrap();
        let (session, store, navigator) = session_at(dir.path(), "/dashboard").await;
        let future = Utc::now().timestamp() + 3600;
        seed_tokens(&store, &token_expiring_at(future), "refresh-1").await;

        assert!(session.validate("/races").await);
        assert!(navigator.warnings().is_empty());
    }

    #[tokio::test]
    async fn teardown_fires_notice_and_redirect_once() {
        let dir = tempfile::tempdir().unwrap();
        let (session, store, navigator) = session_at(dir.path(), "/races/42").await;
        let future = Utc::now().timestamp() + 3600;
        seed_tokens(&store, &token_expiring_at(future), "refresh-1").await;

        session.teardown(None).await;
        session.teardown(None).await;

        assert!(store.get().await.credentials.is_empty());
        assert_eq!(navigator.warnings().len(), 1);
        assert_eq!(navigator.redirects(), vec!["/races/42".to_string()]);
    }

    #[tokio::test]
    async fn teardown_preserves_intended_destination() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _store, navigator) = session_at(dir.path(), "/dashboard").await;

        session.teardown(Some("/athletes/17")).await;

        assert_eq!(navigator.redirects(), vec!["/athletes/17".to_string()]);
    }

    #[tokio::test]
    async fn teardown_skips_redirect_at_the_login_screen() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _store, navigator) = session_at(dir.path(), "/login").await;

        session.teardown(None).await;

        assert_eq!(navigator.warnings().len(), 1);
        assert!(navigator.redirects().is_empty());
    }

    #[tokio::test]
    async fn install_rearms_the_teardown_notice() {
        let dir = tempfile::tempdir().unwrap();
        let (session, store, navigator) = session_at(dir.path(), "/dashboard").await;

        session.teardown(None).await;
        assert_eq!(navigator.warnings().len(), 1);

        let future = Utc::now().timestamp() + 3600;
        session
            .install(
                Credentials {
                    access_token: token_expiring_at(future),
                    refresh_token: "refresh-2".to_string(),
                },
                AccountProfile::default(),
            )
            .await;
        assert!(store.get().await.logged_in);

        session.teardown(None).await;
        assert_eq!(navigator.warnings().len(), 2);
    }

    #[tokio::test]
    async fn inspect_reports_token_health() {
        let dir = tempfile::tempdir().unwrap();
        let (session, store, _navigator) = session_at(dir.path(), "/dashboard").await;

        let status = session.inspect().await;
        assert!(!status.authenticated);
        assert!(status.token_status.is_none());

        let now = Utc::now().timestamp();
        seed_tokens(&store, &token_expiring_at(now + 100), "refresh-1").await;
        let status = session.inspect().await;
        assert!(status.authenticated);
        assert_eq!(status.token_status, Some(TokenStatus::ExpiringSoon));
        assert!(!status.refreshing);

        seed_tokens(&store, &token_expiring_at(now - 100), "refresh-1").await;
        let status = session.inspect().await;
        assert!(!status.authenticated);
        assert_eq!(status.token_status, Some(TokenStatus::Expired));
    }

    #[tokio::test]
    async fn sign_out_clears_without_notice() {
        let dir = tempfile::tempdir().unwrap();
        let (session, store, navigator) = session_at(dir.path(), "/dashboard").await;
        let future = Utc::now().timestamp() + 3600;
        seed_tokens(&store, &token_expiring_at(future), "refresh-1").await;

        session.sign_out().await;

        assert!(store.get().await.credentials.is_empty());
        assert!(!store.get().await.logged_in);
        assert!(navigator.warnings().is_empty());
        assert!(navigator.redirects().is_empty());
    }
}
