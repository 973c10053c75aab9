//! Decoding of the compact signed-claims credential.
//!
//! Only the payload segment is read. The signature is never checked here;
//! the backend verifies it on every bearer request. Any failure yields a
//! `ClaimsError`, which callers treat exactly like a missing credential.

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// base64url with optional padding; some issuers keep the trailing `=`.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("credential does not have three segments")]
    MissingSegment,

    #[error("claims segment is not valid base64url: {0}")]
    Base64(String),

    #[error("claims segment is not valid JSON: {0}")]
    Json(String),

    #[error("claims have no numeric exp")]
    MissingExpiry,
}

/// Raw credential string as issued by the backend.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> Result<Claims, ClaimsError> {
        decode(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<String> for Credential {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Claims consumed by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Expiry, Unix seconds.
    pub exp: i64,
    pub subject: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize)]
struct RawClaims {
    exp: Option<serde_json::Number>,
    #[serde(alias = "nameid")]
    sub: Option<serde_json::Value>,
    #[serde(alias = "unique_name")]
    name: Option<String>,
}

impl Claims {
    pub fn expiry_instant(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn expiry_millis(&self) -> i64 {
        self.exp.saturating_mul(1000)
    }

    /// Time left until expiry; negative once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        Duration::try_milliseconds(self.expiry_millis().saturating_sub(now.timestamp_millis()))
            .unwrap_or(Duration::MIN)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now) <= Duration::zero()
    }
}

/// Decode the claims segment of `credential`.
pub fn decode(credential: &str) -> Result<Claims, ClaimsError> {
    let mut segments = credential.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) if !payload.is_empty() => payload,
        _ => return Err(ClaimsError::MissingSegment),
    };

    let bytes = PAYLOAD_ENGINE
        .decode(payload)
        .map_err(|e| ClaimsError::Base64(e.to_string()))?;
    let raw: RawClaims =
        serde_json::from_slice(&bytes).map_err(|e| ClaimsError::Json(e.to_string()))?;

    // Float casts saturate; anything outside chrono's range is unusable.
    let exp = raw
        .exp
        .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)))
        .filter(|&exp| DateTime::from_timestamp(exp, 0).is_some())
        .ok_or(ClaimsError::MissingExpiry)?;

    // Some issuers emit numeric subjects.
    let subject = match raw.sub {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    Ok(Claims {
        exp,
        subject,
        name: raw.name,
    })
}
