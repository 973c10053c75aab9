//! Test fixtures: credential builder, scripted backend and a session harness
//! on an anchored clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::DateTime;
use tokio::sync::Semaphore;

use crate::api::{ApiError, AuthApi, AuthResponse};
use crate::auth::clock::{AnchoredClock, Clock};
use crate::auth::{Credential, Session, SharedStorage};
use crate::config::SessionSettings;
use crate::models::UserProfile;

/// Wall-clock start of every harness, in Unix seconds.
pub const EPOCH_SECS: i64 = 1_700_000_000;

pub fn credential_with_payload(payload: &str) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload)
    )
}

pub fn make_credential(subject: &str, exp: i64) -> String {
    credential_with_payload(&format!(r#"{{"sub":"{}","exp":{}}}"#, subject, exp))
}

pub fn profile_for(id: i64) -> UserProfile {
    UserProfile {
        id,
        username: format!("user{}", id),
        first_name: None,
        last_name: None,
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Unauthorized,
    Server,
}

impl Failure {
    fn into_error(self) -> ApiError {
        match self {
            Failure::Unauthorized => ApiError::Unauthorized,
            Failure::Server => ApiError::ServerError("boom".to_string()),
        }
    }
}

/// Scripted backend. Refresh replies are consumed in order; an empty script
/// answers `Unauthorized`.
#[derive(Default)]
pub struct FakeApi {
    login: Mutex<Option<Credential>>,
    refreshes: Mutex<VecDeque<Result<Credential, Failure>>>,
    profile_failure: Mutex<Option<Failure>>,
    refresh_gate: Mutex<Option<Arc<Semaphore>>>,
    refresh_calls: AtomicUsize,
    profile_calls: AtomicUsize,
}

impl FakeApi {
    pub fn set_login(&self, credential: Credential) {
        *self.login.lock().unwrap() = Some(credential);
    }

    pub fn clear_login(&self) {
        *self.login.lock().unwrap() = None;
    }

    pub fn push_refresh(&self, reply: Result<Credential, Failure>) {
        self.refreshes.lock().unwrap().push_back(reply);
    }

    pub fn fail_profile(&self, failure: Option<Failure>) {
        *self.profile_failure.lock().unwrap() = failure;
    }

    /// Hold every refresh until a permit is added to the returned semaphore.
    pub fn gate_refresh(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.refresh_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    fn profile_of(credential: &Credential) -> UserProfile {
        let id = credential
            .decode()
            .ok()
            .and_then(|c| c.subject)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        profile_for(id)
    }
}

#[async_trait]
impl AuthApi for FakeApi {
    async fn authenticate(&self, _username: &str, _password: &str) -> Result<AuthResponse, ApiError> {
        let credential = self.login.lock().unwrap().clone().ok_or(ApiError::Unauthorized)?;
        Ok(AuthResponse {
            profile: Self::profile_of(&credential),
            credential,
        })
    }

    async fn refresh(&self, _credential: &Credential) -> Result<Credential, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.refresh_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        let reply = self.refreshes.lock().unwrap().pop_front();
        match reply {
            Some(Ok(credential)) => Ok(credential),
            Some(Err(failure)) => Err(failure.into_error()),
            None => Err(ApiError::Unauthorized),
        }
    }

    async fn user_by_credential(&self, credential: &Credential) -> Result<UserProfile, ApiError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = *self.profile_failure.lock().unwrap() {
            return Err(failure.into_error());
        }
        Ok(Self::profile_of(credential))
    }
}

pub struct Harness {
    pub session: Session,
    pub api: Arc<FakeApi>,
    pub storage: SharedStorage,
    pub clock: Arc<AnchoredClock>,
    pub settings: SessionSettings,
}

impl Harness {
    /// Credential for `subject` expiring `secs` from the current test time.
    pub fn credential(&self, subject: &str, secs: i64) -> Credential {
        Credential::new(make_credential(subject, self.clock.now().timestamp() + secs))
    }

    pub fn profile(&self, id: i64) -> UserProfile {
        profile_for(id)
    }

    pub fn store_credential(&self, subject: &str, secs: i64) {
        let credential = self.credential(subject, secs);
        self.storage
            .open_tab(self.settings.storage_key.clone())
            .save(&credential)
            .unwrap();
    }

    pub fn login(&self, subject: &str, secs: i64) {
        let credential = self.credential(subject, secs);
        let id = subject.parse().unwrap();
        self.session.login(profile_for(id), credential).unwrap();
    }

    /// Another tab of the same origin: shared storage, backend and clock.
    pub fn open_tab(&self) -> Session {
        Session::new(
            self.api.clone(),
            self.storage.open_tab(self.settings.storage_key.clone()),
            self.clock.clone(),
            self.settings.clone(),
        )
    }
}

pub fn harness() -> Harness {
    let api = Arc::new(FakeApi::default());
    let storage = SharedStorage::in_memory();
    let clock = Arc::new(AnchoredClock::new(
        DateTime::from_timestamp(EPOCH_SECS, 0).unwrap(),
    ));
    let settings = SessionSettings::default();
    let session = Session::new(
        api.clone(),
        storage.open_tab(settings.storage_key.clone()),
        clock.clone(),
        settings.clone(),
    );
    Harness {
        session,
        api,
        storage,
        clock,
        settings,
    }
}
