//! HTTP pipeline for the racedesk backend.
//!
//! Every request goes through the same path: resolve the URL against the
//! configured base, make sure the access token is fresh, attach it as a
//! bearer header read at send time, then classify the outcome into
//! [`ApiError`] shapes the caller can branch on.

use std::sync::Arc;

use reqwest::{header, multipart, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::auth::session::{Navigator, Session};
use crate::config::Config;
use crate::store::UserStore;

use super::ApiError;

/// Resolve a request path against the base URL. Absolute URLs pass through
/// untouched.
pub(crate) fn resolve_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// API client for the racedesk backend.
/// Clone is cheap - reqwest::Client and the session share state via Arc.
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) http: Client,
    pub(crate) config: Config,
    pub(crate) session: Session,
}

impl ApiClient {
    /// Create a client and the session that keeps its tokens fresh.
    pub fn new(
        config: &Config,
        store: Arc<UserStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("racedesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::from_transport)?;
        let session = Session::new(store, navigator, http.clone(), config);
        Ok(Self {
            http,
            config: config.clone(),
            session,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &Arc<UserStore> {
        self.session.store()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None::<&()>).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, None::<&()>).await
    }

    /// POST with no payload where only the status matters.
    pub async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        let url = resolve_url(&self.config.base_url, path);
        let builder = self
            .http
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json");
        self.dispatch(builder, &url).await?;
        Ok(())
    }

    /// Multipart upload. The content type is left to the form encoder so the
    /// part boundary survives; everything else about the pipeline applies.
    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: multipart::Form,
    ) -> Result<T, ApiError> {
        let url = resolve_url(&self.config.base_url, path);
        let builder = self.http.post(&url).multipart(form);
        let response = self.dispatch(builder, &url).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::UnexpectedBody(e.to_string()))
    }

    async fn request<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let url = resolve_url(&self.config.base_url, path);
        let builder = self.http.request(method, &url);
        let builder = match body {
            Some(body) => builder.json(body),
            // JSON is the pipeline default even without a payload
            None => builder.header(header::CONTENT_TYPE, "application/json"),
        };
        let response = self.dispatch(builder, &url).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::UnexpectedBody(e.to_string()))
    }

    /// Shared send path: freshness check, bearer decoration read at send
    /// time, status classification. A 401 tears the session down before the
    /// error is returned.
    async fn dispatch(&self, builder: RequestBuilder, url: &str) -> Result<Response, ApiError> {
        self.session.ensure_fresh().await?;

        let token = self.store().access_token().await;
        let builder = if token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&token)
        };

        debug!(%url, "sending request");
        let response = builder.send().await.map_err(ApiError::from_transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            warn!(%url, "server rejected the request as unauthorized");
            self.session.handle_unauthorized().await;
            return Err(ApiError::from_status(status, &body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
        Ok(response)
    }
}
