//! Data models exchanged with the SM Trend backend.
//!
//! - `UserProfile`: the profile returned by login and profile lookups
//! - `ProfileUpdate`: partial profile edits
//! - `NewUser`: registration payload

pub mod user;

pub use user::{NewUser, ProfileUpdate, UserProfile};
