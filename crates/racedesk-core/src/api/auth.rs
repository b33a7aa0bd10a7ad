//! Authentication endpoints: login, registration, logout, profile, and the
//! server-side session descriptor.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{AccountProfile, Credentials};

use super::{ApiClient, ApiError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub email: String,
    pub phone: String,
}

/// Token pair plus account fields returned by login and registration.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub account: AccountProfile,
}

/// Server-side session descriptor fetched after login.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionBootstrap {
    /// Whether the backend still honors the current token.
    #[serde(default)]
    pub auth: bool,
    /// Theme the deployment asks the console to use, if it cares.
    #[serde(default)]
    pub theme: Option<String>,
}

impl ApiClient {
    /// Log in and install the returned credential pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<AccountProfile, ApiError> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self.post(&self.config.login_path, &request).await?;
        self.install_auth(response).await
    }

    /// Register a new account. The backend signs the new account in
    /// directly, so the returned pair is installed like a login.
    pub async fn register(&self, request: &RegisterRequest) -> Result<AccountProfile, ApiError> {
        let response: AuthResponse = self.post(&self.config.register_path, request).await?;
        self.install_auth(response).await
    }

    async fn install_auth(&self, response: AuthResponse) -> Result<AccountProfile, ApiError> {
        if response.access_token.is_empty() || response.refresh_token.is_empty() {
            return Err(ApiError::UnexpectedBody(
                "auth response carried an incomplete token pair".to_string(),
            ));
        }
        let profile = response.account.clone();
        self.session
            .install(
                Credentials {
                    access_token: response.access_token,
                    refresh_token: response.refresh_token,
                },
                response.account,
            )
            .await;
        Ok(profile)
    }

    /// Fetch the signed-in account's profile and mirror it into the user
    /// store.
    pub async fn profile(&self) -> Result<AccountProfile, ApiError> {
        let profile: AccountProfile = self.get(&self.config.profile_path).await?;
        let stored = profile.clone();
        self.store()
            .update(move |record| record.profile = stored)
            .await;
        Ok(profile)
    }

    /// Fetch the server-side session descriptor for the current token.
    pub async fn bootstrap_session(&self) -> Result<SessionBootstrap, ApiError> {
        self.get(&self.config.session_path).await
    }

    /// Sign out. The server call is best effort; the local session is
    /// cleared either way.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let result = self.post_empty(&self.config.logout_path).await;
        self.session.sign_out().await;
        if let Err(error) = result {
            warn!(error = %error, "server-side logout failed, cleared locally");
        }
        Ok(())
    }
}
