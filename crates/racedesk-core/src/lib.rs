//! Core library for the racedesk race administration console.
//!
//! Everything a front-end needs to hold a session against the racedesk
//! backend:
//!
//! - `store`: persisted client state (user record with the token pair,
//!   console settings, environment descriptor)
//! - `auth`: token expiry evaluation, the session lifecycle with silent
//!   refresh and teardown, keychain-backed password storage
//! - `api`: the authenticated request pipeline and the auth endpoints
//! - `config`: backend location, endpoint paths, timeouts
//!
//! The view layer plugs in through [`Navigator`]: the session pushes one
//! warning and one login redirect through it when a session ends.

pub mod api;
pub mod auth;
pub mod config;
pub mod store;

pub use api::{ApiClient, ApiError, AuthResponse, LoginRequest, RegisterRequest, SessionBootstrap};
pub use auth::{Navigator, PasswordStore, Session, SessionStatus, TokenStatus};
pub use config::Config;
pub use store::{
    AccountProfile, Credentials, EnvRecord, EnvStore, SettingsRecord, SettingsStore, Theme,
    UserRecord, UserStore,
};
