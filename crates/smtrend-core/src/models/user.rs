use serde::{Deserialize, Serialize};

use crate::auth::Claims;

/// Profile of a registered user as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl UserProfile {
    /// Minimal profile derived from credential claims, used when the profile
    /// endpoint is unreachable but the credential itself is well-formed.
    pub fn from_claims(claims: &Claims) -> Self {
        let subject = claims.subject.clone().unwrap_or_default();
        let id = subject.parse().unwrap_or_default();
        let username = claims.name.clone().unwrap_or(subject);
        Self {
            id,
            username,
            first_name: None,
            last_name: None,
        }
    }

    /// Name shown in the UI: "First Last" when known, otherwise the username.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) if !first.is_empty() && !last.is_empty() => {
                format!("{} {}", first, last)
            }
            (Some(first), _) if !first.is_empty() => first.clone(),
            _ => self.username.clone(),
        }
    }

    /// Merge a successful profile edit into this profile.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(ref username) = update.username {
            self.username = username.clone();
        }
        if let Some(ref first_name) = update.first_name {
            self.first_name = Some(first_name.clone());
        }
        if let Some(ref last_name) = update.last_name {
            self.last_name = Some(last_name.clone());
        }
    }
}

/// Partial profile edit. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Registration payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}
