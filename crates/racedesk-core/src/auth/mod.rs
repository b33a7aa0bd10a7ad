//! Authentication module for managing the session lifecycle.
//!
//! This module provides:
//! - `Session`: validation, single-flight silent refresh, and teardown
//! - token helpers: local JWT expiry evaluation without verification
//! - `PasswordStore`: remembered passwords in the OS keychain
//!
//! Tokens themselves live in the user store; this module decides when they
//! are still good and what happens when they are not.

pub mod credentials;
pub mod session;
pub mod token;

pub use credentials::PasswordStore;
pub use session::{Navigator, Session, SessionStatus};
pub use token::{
    decode_expiry, evaluate, is_expired, is_expiring_soon, TokenStatus, REFRESH_BUFFER_SECS,
};
