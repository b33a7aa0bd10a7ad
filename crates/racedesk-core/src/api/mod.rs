//! REST API module for the racedesk admin console backend.
//!
//! This module provides the `ApiClient` that every backend call goes
//! through: bearer decoration, token freshness, and a single error taxonomy.
//!
//! The backend uses JWT bearer authentication; token pairs come from the
//! login and registration endpoints and are rotated by the refresh endpoint.

pub mod auth;
pub mod client;
pub mod error;

pub use auth::{AuthResponse, LoginRequest, RegisterRequest, SessionBootstrap};
pub use client::ApiClient;
pub use error::ApiError;
