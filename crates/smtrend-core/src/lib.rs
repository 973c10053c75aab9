//! Core library for the SM Trend client.
//!
//! This crate owns the one stateful subsystem of the client: the lifecycle of
//! the bearer credential issued at login. It provides:
//!
//! - `auth`: credential decoding, durable storage, the session state machine,
//!   activity-driven renewal and cross-tab synchronization
//! - `api`: the REST client for the authentication endpoints
//! - `models`: user profile types exchanged with the backend
//! - `config`: application configuration and directory locations
//! - `utils`: formatting helpers

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, AuthApi};
pub use auth::{
    Activity, ActivityBus, Claims, Credential, CurrentUser, Notice, PersistenceBridge,
    RenewOutcome, Session, SessionHost, SessionSnapshot, SessionState, SharedStorage,
};
pub use config::{Config, SessionSettings};
pub use models::{NewUser, ProfileUpdate, UserProfile};
