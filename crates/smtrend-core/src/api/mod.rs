//! REST API client module for the SM Trend backend.
//!
//! This module provides the `ApiClient` for the user endpoints: login,
//! credential renewal, profile lookup by credential, registration and
//! profile updates. Authenticated calls carry the credential as a bearer
//! token.

pub mod client;
pub mod error;

pub use client::{ApiClient, AuthApi, AuthResponse};
pub use error::ApiError;
