use serde::Deserialize;
use thiserror::Error;

/// Maximum length of a response body quoted in an error message
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Failures surfaced by the request pipeline and the session layer.
///
/// The variants are deliberately coarse: callers only need to tell apart
/// "the server answered and said no" (`Rejected`, `Unauthorized`), "the
/// server never answered" (`Unreachable`, retryable), and "the request never
/// left" (`Request`). Session-level outcomes get their own variants so the
/// caller can report them without string matching.
#[derive(Error, Debug)]
pub enum ApiError {
    /// No stored credential pair; the caller has to sign in first.
    #[error("not signed in")]
    Unauthenticated,

    /// The refresh endpoint rejected the refresh token or could not be
    /// reached. The session has already been torn down when this surfaces.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The server answered with a 401. The session has been torn down.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The server answered with an error status other than 401.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// The request went out but no response came back (timeout, connection
    /// refused, DNS failure). Safe to retry; credentials are untouched.
    #[error("no response from server: {0}")]
    Unreachable(#[source] reqwest::Error),

    /// The request could not be built or sent at all.
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// A success response whose body did not parse as the expected shape.
    #[error("unexpected response body: {0}")]
    UnexpectedBody(String),
}

/// Error payload shape used by the backend. Older endpoints use `msg`.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "msg")]
    message: Option<String>,
}

impl ApiError {
    /// Classify an error response by status, pulling the human-readable
    /// message out of the body when the backend provided one.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = server_message(body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string())
        });
        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            code => ApiError::Rejected {
                status: code,
                message,
            },
        }
    }

    /// Classify a transport-level failure from the HTTP client.
    pub(crate) fn from_transport(error: reqwest::Error) -> Self {
        if error.is_builder() {
            ApiError::Request(error)
        } else if error.is_decode() {
            ApiError::UnexpectedBody(error.to_string())
        } else {
            // Timeouts, refused connections, DNS failures: the server never
            // produced a response.
            ApiError::Unreachable(error)
        }
    }

    /// Whether the operation can be retried as-is without a new login.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Unreachable(_))
    }

    /// Truncate a response body for inclusion in an error message
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        // The limit is in bytes; the cut still has to land on a char
        // boundary.
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}

/// Extract the `message` field from a JSON error body, if there is one.
fn server_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed.message.filter(|m| !m.is_empty())
}
