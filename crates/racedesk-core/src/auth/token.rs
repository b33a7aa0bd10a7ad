//! Local token expiry evaluation.
//!
//! Access tokens are JWTs. Only the `exp` claim of the payload segment is
//! read here, without signature verification, so health checks run on every
//! guarded operation with no network round trip. Verification is the
//! backend's job; a forged token still dies at the server. Anything that
//! does not decode to a usable `exp` is treated as expired.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;

/// Tokens expiring within this many seconds get refreshed ahead of time.
/// Five minutes absorbs clock skew between client and server and leaves a
/// refresh round trip time to finish before the token actually dies.
pub const REFRESH_BUFFER_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Health of an access token at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// Usable and outside the refresh buffer.
    Valid,
    /// Usable now, but inside the refresh buffer.
    ExpiringSoon,
    /// Past expiry, or not decodable at all.
    Expired,
}

/// Decode the `exp` claim (epoch seconds) from a token's payload segment.
///
/// Returns `None` unless the token has exactly three dot-separated segments
/// and the middle one is base64url-encoded JSON carrying an integer `exp`.
pub fn decode_expiry(token: &str) -> Option<i64> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }
    let payload = URL_SAFE_NO_PAD.decode(segments[1]).ok()?;
    let claims: Claims = serde_json::from_slice(&payload).ok()?;
    claims.exp
}

/// True when the token's expiry is at or before `now`.
pub fn is_expired_at(token: &str, now: i64) -> bool {
    match decode_expiry(token) {
        Some(exp) => exp <= now,
        None => true,
    }
}

/// True when the token expires strictly less than `buffer` seconds after
/// `now`. An already-expired token is always expiring soon.
pub fn is_expiring_soon_at(token: &str, now: i64, buffer: i64) -> bool {
    match decode_expiry(token) {
        Some(exp) => exp.saturating_sub(now) < buffer,
        None => true,
    }
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now().timestamp())
}

pub fn is_expiring_soon(token: &str) -> bool {
    is_expiring_soon_at(token, Utc::now().timestamp(), REFRESH_BUFFER_SECS)
}

/// Classify a token at a given instant.
pub fn evaluate_at(token: &str, now: i64) -> TokenStatus {
    match decode_expiry(token) {
        None => TokenStatus::Expired,
        Some(exp) if exp <= now => TokenStatus::Expired,
        Some(exp) if exp.saturating_sub(now) < REFRESH_BUFFER_SECS => TokenStatus::ExpiringSoon,
        Some(_) => TokenStatus::Valid,
    }
}

/// Classify a token against the current wall clock.
pub fn evaluate(token: &str) -> TokenStatus {
    evaluate_at(token, Utc::now().timestamp())
}
