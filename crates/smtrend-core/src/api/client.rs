//! API client for the SM Trend user endpoints.
//!
//! `AuthApi` is the narrow surface the session core consumes; `ApiClient`
//! implements it over HTTP and adds the profile endpoints used by the
//! account screens.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::Credential;
use crate::models::{NewUser, ProfileUpdate, UserProfile};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticateRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Login response: the profile with the issued credential alongside.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(rename = "token")]
    pub credential: Credential,
    #[serde(flatten)]
    pub profile: UserProfile,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: Credential,
}

/// Backend operations the session lifecycle depends on.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange a username and password for a credential and profile.
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthResponse, ApiError>;

    /// Exchange a still-acceptable credential for a fresh one.
    async fn refresh(&self, credential: &Credential) -> Result<Credential, ApiError>;

    /// Look up the profile the credential belongs to.
    async fn user_by_credential(&self, credential: &Credential) -> Result<UserProfile, ApiError>;
}

/// HTTP client for the user endpoints.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request built by `build`, retrying on 429 with exponential backoff.
    async fn send<F>(&self, method: Method, path: &str, build: F) -> Result<Response, ApiError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let request = build(self.client.request(method.clone(), &url));
            let response = request.send().await?;

            if response.status().as_u16() != 429 {
                return Self::check_response(response).await;
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2;
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Create an account.
    pub async fn register(&self, user: &NewUser) -> Result<(), ApiError> {
        debug!(username = %user.username, "Registering user");
        self.send(Method::POST, "register", |req| req.json(user)).await?;
        Ok(())
    }

    /// Update the profile of `user_id` on behalf of the credential holder.
    pub async fn update_profile(
        &self,
        credential: &Credential,
        user_id: i64,
        update: &ProfileUpdate,
    ) -> Result<(), ApiError> {
        let path = format!("{}/update-profile", user_id);
        self.send(Method::PUT, &path, |req| {
            req.bearer_auth(credential.as_str()).json(update)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthResponse, ApiError> {
        debug!(username = %username, "Sending authenticate request");
        let body = AuthenticateRequest { username, password };
        let response = self
            .send(Method::POST, "authenticate", |req| req.json(&body))
            .await?;
        Self::parse(response).await
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, ApiError> {
        debug!("Sending refresh request");
        let response = self
            .send(Method::POST, "RefreshToken", |req| req.bearer_auth(credential.as_str()))
            .await?;
        let refreshed: RefreshResponse = Self::parse(response).await?;
        Ok(refreshed.token)
    }

    async fn user_by_credential(&self, credential: &Credential) -> Result<UserProfile, ApiError> {
        let response = self
            .send(Method::GET, "GetUserByToken", |req| req.bearer_auth(credential.as_str()))
            .await?;
        Self::parse(response).await
    }
}
