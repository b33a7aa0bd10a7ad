//! Refresh-flow tests against an in-process backend.
//!
//! Each test stands up a real HTTP listener on loopback so the session code
//! exercises the same reqwest path it uses in production: single-flight
//! refresh, background refresh inside the buffer window, and teardown when
//! the refresh endpoint gives up on us.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};

use racedesk_core::{ApiClient, Config, Credentials, Navigator, UserStore};

fn make_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.signature")
}

struct RecordingNavigator {
    location: String,
    warnings: Mutex<Vec<String>>,
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    fn at(location: &str) -> Arc<Self> {
        Arc::new(Self {
            location: location.to_string(),
            warnings: Mutex::new(Vec::new()),
            redirects: Mutex::new(Vec::new()),
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

/// Refresh endpoint behavior plus counters for the assertions.
#[derive(Clone)]
struct RefreshState {
    calls: Arc<AtomicUsize>,
    seen_bearers: Arc<Mutex<Vec<String>>>,
    /// `None` makes the endpoint answer 500.
    grant: Option<RefreshGrant>,
}

#[derive(Clone)]
struct RefreshGrant {
    access_token: String,
    refresh_token: Option<String>,
}

async fn refresh_endpoint(
    State(state): State<RefreshState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    state.calls.fetch_add(1, Ordering::SeqCst);
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.seen_bearers.lock().unwrap().push(authorization);

    match &state.grant {
        Some(grant) => {
            let mut body = json!({ "access_token": grant.access_token });
            if let Some(rotated) = &grant.refresh_token {
                body["refresh_token"] = json!(rotated);
            }
            (StatusCode::OK, Json(body))
        }
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "refresh rejected" })),
        ),
    }
}

async fn spawn_backend(state: RefreshState) -> SocketAddr {
    let router = Router::new()
        .route("/api/auth/refresh", post(refresh_endpoint))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn granting_state(calls: &Arc<AtomicUsize>, access_token: &str) -> RefreshState {
    RefreshState {
        calls: Arc::clone(calls),
        seen_bearers: Arc::new(Mutex::new(Vec::new())),
        grant: Some(RefreshGrant {
            access_token: access_token.to_string(),
            refresh_token: None,
        }),
    }
}

async fn signed_in_client(
    addr: SocketAddr,
    dir: &Path,
    access: &str,
    refresh: &str,
    location: &str,
) -> (ApiClient, Arc<UserStore>, Arc<RecordingNavigator>) {
    let store = Arc::new(UserStore::open(dir).await);
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

    let navigator = RecordingNavigator::at(location);
    let config = Config {
        base_url: format!("http://{addr}"),
        ..Config::default()
    };
    let client = ApiClient::new(&config, Arc::clone(&store), navigator.clone()).unwrap();
    (client, store, navigator)
}

#[tokio::test]
async fn expired_token_is_replaced_before_validation_answers() {
    let now = Utc::now().timestamp();
    let fresh = make_token(now + 3600);
    let calls = Arc::new(AtomicUsize::new(0));
    let state = granting_state(&calls, &fresh);
    let seen = Arc::clone(&state.seen_bearers);
    let addr = spawn_backend(state).await;

    let dir = tempfile::tempdir().unwrap();
    let (client, store, navigator) =
        signed_in_client(addr, dir.path(), &make_token(now - 300), "refresh-1", "/races").await;

    assert!(client.session().validate("/races/42").await);
    assert_eq!(store.access_token().await, fresh);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // The refresh call carries the refresh token, not the dead access token.
    assert_eq!(seen.lock().unwrap().as_slice(), ["Bearer refresh-1"]);
    assert!(navigator.warnings().is_empty());
}

#[tokio::test]
async fn concurrent_validations_share_one_refresh() {
    let now = Utc::now().timestamp();
    let fresh = make_token(now + 3600);
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = spawn_backend(granting_state(&calls, &fresh)).await;

    let dir = tempfile::tempdir().unwrap();
    let (client, store, _navigator) =
        signed_in_client(addr, dir.path(), &make_token(now - 60), "refresh-1", "/races").await;

    let session = client.session();
    let (first, second) = tokio::join!(session.validate("/a"), session.validate("/b"));
    assert!(first);
    assert!(second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.access_token().await, fresh);
}

#[tokio::test]
async fn expiring_soon_answers_immediately_and_refreshes_behind() {
    let now = Utc::now().timestamp();
    let fresh = make_token(now + 3600);
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = spawn_backend(granting_state(&calls, &fresh)).await;

    let dir = tempfile::tempdir().unwrap();
    let expiring = make_token(now + 120);
    let (client, store, _navigator) =
        signed_in_client(addr, dir.path(), &expiring, "refresh-1", "/races").await;

    // Inside the buffer the caller is not held up.
    assert!(client.session().validate("/races").await);

    for _ in 0..50 {
        if store.access_token().await == fresh {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(store.access_token().await, fresh);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_refresh_tears_down_with_the_destination_preserved() {
    let calls = Arc::new(AtomicUsize::new(0));
    let state = RefreshState {
        calls: Arc::clone(&calls),
        seen_bearers: Arc::new(Mutex::new(Vec::new())),
        grant: None,
    };
    let addr = spawn_backend(state).await;

    let now = Utc::now().timestamp();
    let dir = tempfile::tempdir().unwrap();
    let (client, store, navigator) = signed_in_client(
        addr,
        dir.path(),
        &make_token(now - 60),
        "refresh-1",
        "/dashboard",
    )
    .await;

    assert!(!client.session().validate("/events/5/edit").await);
    assert!(store.get().await.credentials.is_empty());
    assert_eq!(navigator.warnings().len(), 1);
    assert_eq!(navigator.redirects(), vec!["/events/5/edit".to_string()]);

    // The session is gone now; asking again neither refreshes nor warns.
    assert!(!client.session().validate("/events/5/edit").await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(navigator.warnings().len(), 1);
    assert_eq!(navigator.redirects().len(), 1);
}

#[tokio::test]
async fn refresh_failure_with_a_long_multibyte_body_still_tears_down() {
    // A localized error page longer than the quoting limit, with the limit
    // falling inside a character.
    async fn overloaded() -> (StatusCode, String) {
        (StatusCode::INTERNAL_SERVER_ERROR, "稍后再试".repeat(50))
    }
    let router = Router::new().route("/api/auth/refresh", post(overloaded));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let now = Utc::now().timestamp();
    let dir = tempfile::tempdir().unwrap();
    let (client, store, navigator) = signed_in_client(
        addr,
        dir.path(),
        &make_token(now - 60),
        "refresh-1",
        "/dashboard",
    )
    .await;

    assert!(!client.session().validate("/races/7/results").await);
    assert!(store.get().await.credentials.is_empty());
    assert_eq!(navigator.warnings().len(), 1);
    assert_eq!(navigator.redirects(), vec!["/races/7/results".to_string()]);
}

#[tokio::test]
async fn rotated_refresh_token_is_stored() {
    let now = Utc::now().timestamp();
    let fresh = make_token(now + 3600);
    let calls = Arc::new(AtomicUsize::new(0));
    let state = RefreshState {
        calls: Arc::clone(&calls),
        seen_bearers: Arc::new(Mutex::new(Vec::new())),
        grant: Some(RefreshGrant {
            access_token: fresh.clone(),
            refresh_token: Some("refresh-2".to_string()),
        }),
    };
    let addr = spawn_backend(state).await;

    let dir = tempfile::tempdir().unwrap();
    let (client, store, _navigator) =
        signed_in_client(addr, dir.path(), &make_token(now - 10), "refresh-1", "/races").await;

    assert!(client.session().validate("/races").await);
    let credentials = store.get().await.credentials;
    assert_eq!(credentials.access_token, fresh);
    assert_eq!(credentials.refresh_token, "refresh-2");
}

#[tokio::test]
async fn forced_refresh_replaces_a_healthy_token() {
    let now = Utc::now().timestamp();
    let fresh = make_token(now + 7200);
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = spawn_backend(granting_state(&calls, &fresh)).await;

    let dir = tempfile::tempdir().unwrap();
    let (client, store, _navigator) =
        signed_in_client(addr, dir.path(), &make_token(now + 3600), "refresh-1", "/races").await;

    client.session().refresh_now().await.unwrap();
    assert_eq!(store.access_token().await, fresh);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn validation_without_a_refresh_token_never_calls_the_endpoint() {
    let now = Utc::now().timestamp();
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = spawn_backend(granting_state(&calls, &make_token(now + 3600))).await;

    let dir = tempfile::tempdir().unwrap();
    let (client, _store, navigator) =
        signed_in_client(addr, dir.path(), &make_token(now - 60), "", "/races").await;

    assert!(!client.session().validate("/races").await);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(navigator.warnings().is_empty());
}
