//! Session state machine for the client-held credential.
//!
//! A `Session` is either anonymous or authenticated with a decoded, unexpired
//! credential. While authenticated exactly one logout timer is armed for the
//! credential's remaining lifetime. Every credential change bumps an epoch so
//! that timers, renewals and profile lookups started under an older credential
//! are discarded instead of applied.
//!
//! Failures never escape as errors (login aside): they become transitions to
//! `Anonymous` and are logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, AuthApi};
use crate::config::SessionSettings;
use crate::models::{ProfileUpdate, UserProfile};
use crate::utils::format_remaining;

use super::claims::{Claims, ClaimsError, Credential};
use super::clock::Clock;
use super::store::PersistenceBridge;
use super::timer::TimerSlot;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("credential rejected: {0}")]
    InvalidCredential(#[from] ClaimsError),

    #[error("credential has already expired")]
    Expired,

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// User-facing notices raised by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Signed out because the credential expired or could not be renewed.
    SessionExpired,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::SessionExpired => "Your session has expired. Please sign in again.",
        }
    }
}

/// The signed-in user together with the credential that authenticates them.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub profile: UserProfile,
    pub credential: Credential,
    pub claims: Claims,
}

impl CurrentUser {
    pub fn id(&self) -> i64 {
        self.profile.id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expiry_instant()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticated {
        user: CurrentUser,
        imminent_expiry: bool,
    },
}

/// Observable state published to UI consumers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub notice: Option<Notice>,
}

impl SessionSnapshot {
    pub fn current_user(&self) -> Option<&CurrentUser> {
        match &self.state {
            SessionState::Authenticated { user, .. } => Some(user),
            SessionState::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    pub fn imminent_expiry(&self) -> bool {
        matches!(
            self.state,
            SessionState::Authenticated {
                imminent_expiry: true,
                ..
            }
        )
    }
}

/// Result of a `renew()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    /// Another renewal was already in flight; nothing was sent.
    AlreadyRenewing,
    NotAuthenticated,
    /// The backend refused or the call failed; the session was signed out.
    Failed,
    /// The session changed while the call was in flight, or another tab had
    /// already rotated the credential; the result was dropped.
    Discarded,
}

struct Core {
    user: Option<CurrentUser>,
    imminent_expiry: bool,
    notice: Option<Notice>,
    logout_timer: TimerSlot,
    epoch: u64,
}

struct Inner {
    api: Arc<dyn AuthApi>,
    bridge: PersistenceBridge,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    core: Mutex<Core>,
    renewing: AtomicBool,
    snapshot: watch::Sender<SessionSnapshot>,
}

/// Releases the renewal flag on every exit path, cancellation included.
struct RenewGuard<'a>(&'a AtomicBool);

impl<'a> RenewGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RenewGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to the session of one tab. Clone is cheap and every clone refers
/// to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(
        api: Arc<dyn AuthApi>,
        bridge: PersistenceBridge,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                api,
                bridge,
                clock,
                settings,
                core: Mutex::new(Core {
                    user: None,
                    imminent_expiry: false,
                    notice: None,
                    logout_timer: TimerSlot::new(),
                    epoch: 0,
                }),
                renewing: AtomicBool::new(false),
                snapshot,
            }),
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.snapshot().current_user().cloned()
    }

    pub fn imminent_expiry(&self) -> bool {
        self.inner.snapshot.borrow().imminent_expiry()
    }

    pub fn is_renewing(&self) -> bool {
        self.inner.renewing.load(Ordering::Acquire)
    }

    /// Credential to attach to authenticated requests.
    pub fn bearer(&self) -> Option<Credential> {
        self.lock().user.as_ref().map(|u| u.credential.clone())
    }

    /// Time left on the current credential.
    pub fn remaining(&self) -> Option<Duration> {
        let now = self.inner.clock.now();
        self.lock().user.as_ref().map(|u| u.claims.remaining(now))
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub(crate) fn bridge(&self) -> &PersistenceBridge {
        &self.inner.bridge
    }

    pub fn logout_timer_armed(&self) -> bool {
        self.lock().logout_timer.is_armed()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Adopt the credential persisted by an earlier visit, if still valid.
    pub async fn restore(&self) {
        let Some(credential) = self.inner.bridge.load() else {
            debug!("No stored credential");
            return;
        };

        let claims = match credential.decode() {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Stored credential rejected");
                self.clear_storage();
                return;
            }
        };

        if claims.is_expired(self.inner.clock.now()) {
            info!(expired_at = %claims.expiry_instant(), "Stored credential already expired");
            let mut core = self.lock();
            self.clear_storage();
            self.reset(&mut core, Some(Notice::SessionExpired));
            self.publish(&core);
            return;
        }

        let epoch = self.lock().epoch;
        let lookup = self.inner.api.user_by_credential(&credential).await;

        let mut core = self.lock();
        if core.epoch != epoch {
            debug!("Session changed during restore, discarding lookup");
            return;
        }
        match lookup {
            Ok(profile) => {
                info!(user_id = profile.id, "Restored session");
                self.install(
                    &mut core,
                    CurrentUser {
                        profile,
                        credential,
                        claims,
                    },
                );
            }
            Err(e) if e.is_unauthorized() => {
                warn!(error = %e, "Stored credential refused by backend");
                self.clear_storage();
                self.reset(&mut core, Some(Notice::SessionExpired));
            }
            Err(e) => {
                warn!(error = %e, "Could not load profile, staying signed out");
            }
        }
        self.publish(&core);
    }

    /// Sign in with a credential and profile obtained from the backend.
    pub fn login(&self, profile: UserProfile, credential: Credential) -> Result<(), SessionError> {
        let claims = credential.decode()?;
        if claims.is_expired(self.inner.clock.now()) {
            return Err(SessionError::Expired);
        }

        let mut core = self.lock();
        if let Err(e) = self.inner.bridge.save(&credential) {
            warn!(error = %e, "Failed to persist credential");
        }
        info!(user_id = profile.id, "Signed in");
        core.notice = None;
        self.install(
            &mut core,
            CurrentUser {
                profile,
                credential,
                claims,
            },
        );
        self.publish(&core);
        Ok(())
    }

    /// Authenticate with the backend and sign in.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let response = self.inner.api.authenticate(username, password).await?;
        self.login(response.profile, response.credential)
    }

    /// Manual sign-out. Raises no notice; safe to call repeatedly.
    pub fn logout(&self) {
        let mut core = self.lock();
        if let Some(ref user) = core.user {
            info!(user_id = user.id(), "Signed out");
        }
        self.clear_storage();
        self.reset(&mut core, None);
        self.publish(&core);
    }

    /// Exchange the current credential for a fresh one.
    ///
    /// At most one renewal is in flight per session; concurrent calls return
    /// `AlreadyRenewing` without contacting the backend.
    pub async fn renew(&self) -> RenewOutcome {
        let (epoch, credential) = {
            let core = self.lock();
            match core.user {
                Some(ref user) => (core.epoch, user.credential.clone()),
                None => return RenewOutcome::NotAuthenticated,
            }
        };

        let Some(_guard) = RenewGuard::acquire(&self.inner.renewing) else {
            debug!("Renewal already in flight");
            return RenewOutcome::AlreadyRenewing;
        };

        let renewed = self.fetch_renewal(&credential).await;

        match self.apply_renewal(epoch, &credential, renewed) {
            Some(outcome) => outcome,
            None => {
                self.observe_external().await;
                RenewOutcome::Discarded
            }
        }
    }

    /// Settle a finished renewal. `None` means another tab rotated the
    /// credential first and the caller should adopt it from storage.
    fn apply_renewal(
        &self,
        epoch: u64,
        started_with: &Credential,
        renewed: Result<CurrentUser, SessionError>,
    ) -> Option<RenewOutcome> {
        let mut core = self.lock();
        if core.epoch != epoch || core.user.is_none() {
            debug!("Session changed during renewal, discarding result");
            return Some(RenewOutcome::Discarded);
        }

        let outcome = match renewed {
            Ok(user) => {
                if let Err(e) = self.inner.bridge.save(&user.credential) {
                    warn!(error = %e, "Failed to persist renewed credential");
                }
                let remaining = user.claims.remaining(self.inner.clock.now());
                info!(remaining = %format_remaining(remaining), "Credential renewed");
                self.install(&mut core, user);
                RenewOutcome::Renewed
            }
            Err(e) if self.stored_newer_than(started_with) => {
                info!(error = %e, "Renewal refused, another tab already renewed");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Renewal failed, signing out");
                self.clear_storage();
                self.reset(&mut core, Some(Notice::SessionExpired));
                RenewOutcome::Failed
            }
        };
        self.publish(&core);
        Some(outcome)
    }

    /// Whether storage holds a different, still valid credential.
    fn stored_newer_than(&self, credential: &Credential) -> bool {
        let now = self.inner.clock.now();
        self.inner.bridge.load().is_some_and(|stored| {
            &stored != credential && stored.decode().is_ok_and(|claims| !claims.is_expired(now))
        })
    }

    async fn fetch_renewal(&self, credential: &Credential) -> Result<CurrentUser, SessionError> {
        let credential = self.inner.api.refresh(credential).await?;
        let claims = credential.decode()?;
        if claims.is_expired(self.inner.clock.now()) {
            return Err(SessionError::Expired);
        }
        let profile = self.inner.api.user_by_credential(&credential).await?;
        Ok(CurrentUser {
            profile,
            credential,
            claims,
        })
    }

    /// Re-derive the imminent-expiry flag from the clock. Signs out if the
    /// credential has run out without the timer noticing.
    pub fn check_expiry(&self) {
        let now = self.inner.clock.now();
        let mut core = self.lock();
        let Some(remaining) = core.user.as_ref().map(|u| u.claims.remaining(now)) else {
            return;
        };
        debug!(remaining = %format_remaining(remaining), "Session time remaining");

        if remaining <= Duration::zero() {
            info!("Session expired");
            self.clear_storage();
            self.reset(&mut core, Some(Notice::SessionExpired));
        } else {
            let imminent = remaining <= self.inner.settings.imminent_threshold();
            if imminent != core.imminent_expiry {
                debug!(imminent, "Imminent expiry changed");
            }
            core.imminent_expiry = imminent;
        }
        self.publish(&core);
    }

    /// Reconcile with the credential another tab left in storage.
    pub async fn observe_external(&self) {
        let now = self.inner.clock.now();
        let stored = self.inner.bridge.load();
        let valid = stored.and_then(|credential| match credential.decode() {
            Ok(claims) if !claims.is_expired(now) => Some((credential, claims)),
            _ => None,
        });

        let (credential, claims) = match valid {
            Some(pair) => pair,
            None => {
                let mut core = self.lock();
                if core.user.is_some() {
                    info!("Signed out in another tab");
                }
                self.reset(&mut core, None);
                self.publish(&core);
                return;
            }
        };

        let epoch = {
            let core = self.lock();
            if core.user.as_ref().map(|u| &u.credential) == Some(&credential) {
                return;
            }
            core.epoch
        };

        let profile = match self.inner.api.user_by_credential(&credential).await {
            Ok(profile) => profile,
            Err(e) if e.is_unauthorized() => {
                warn!(error = %e, "Credential from another tab refused by backend");
                let mut core = self.lock();
                if core.epoch == epoch {
                    self.reset(&mut core, None);
                    self.publish(&core);
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Profile lookup failed, using credential claims");
                UserProfile::from_claims(&claims)
            }
        };

        let mut core = self.lock();
        if core.epoch != epoch {
            debug!("Session changed during sync, discarding lookup");
            return;
        }
        info!(user_id = profile.id, "Adopted session from another tab");
        core.notice = None;
        self.install(
            &mut core,
            CurrentUser {
                profile,
                credential,
                claims,
            },
        );
        self.publish(&core);
    }

    pub fn dismiss_notice(&self) {
        let mut core = self.lock();
        core.notice = None;
        self.publish(&core);
    }

    /// Merge a profile edit the backend has accepted.
    pub fn apply_profile_update(&self, update: &ProfileUpdate) {
        let mut core = self.lock();
        if let Some(ref mut user) = core.user {
            user.profile.apply(update);
        }
        self.publish(&core);
    }

    /// Cancel the logout timer. Called on teardown.
    pub fn teardown(&self) {
        self.lock().logout_timer.cancel();
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.inner
            .core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clear_storage(&self) {
        if let Err(e) = self.inner.bridge.clear() {
            warn!(error = %e, "Failed to clear stored credential");
        }
    }

    /// Make `user` current: new epoch, fresh imminent flag, re-armed timer.
    fn install(&self, core: &mut Core, user: CurrentUser) {
        let remaining = user.claims.remaining(self.inner.clock.now());
        core.epoch += 1;
        core.imminent_expiry =
            remaining > Duration::zero() && remaining <= self.inner.settings.imminent_threshold();
        core.user = Some(user);

        let epoch = core.epoch;
        let session: Weak<Inner> = Arc::downgrade(&self.inner);
        let delay = remaining.to_std().unwrap_or_default();
        core.logout_timer.arm(delay, async move {
            if let Some(inner) = session.upgrade() {
                Session { inner }.on_logout_timer(epoch);
            }
        });
    }

    fn reset(&self, core: &mut Core, notice: Option<Notice>) {
        core.epoch += 1;
        core.user = None;
        core.imminent_expiry = false;
        core.logout_timer.cancel();
        if notice.is_some() {
            core.notice = notice;
        }
    }

    fn on_logout_timer(&self, epoch: u64) {
        let mut core = self.lock();
        if core.epoch != epoch || core.user.is_none() {
            return;
        }
        info!("Session expired");
        self.clear_storage();
        self.reset(&mut core, Some(Notice::SessionExpired));
        self.publish(&core);
    }

    fn publish(&self, core: &Core) {
        let state = match core.user {
            Some(ref user) => SessionState::Authenticated {
                user: user.clone(),
                imminent_expiry: core.imminent_expiry,
            },
            None => SessionState::Anonymous,
        };
        let next = SessionSnapshot {
            state,
            notice: core.notice,
        };
        self.inner.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use tokio::time;

    use crate::testing::{credential_with_payload, harness, Failure, Harness};

    const MINUTE: i64 = 60;

    fn stored(h: &Harness) -> Option<Credential> {
        h.storage.open_tab("jwt").load()
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_without_credential_is_anonymous() {
        let h = harness();
        h.session.restore().await;
        assert_eq!(h.session.snapshot(), SessionSnapshot::default());
        assert!(!h.session.logout_timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_valid_credential() {
        let h = harness();
        h.store_credential("42", 20 * MINUTE);

        h.session.restore().await;

        let snapshot = h.session.snapshot();
        assert_eq!(snapshot.current_user().map(|u| u.id()), Some(42));
        assert!(!snapshot.imminent_expiry());
        assert!(h.session.logout_timer_armed());
        assert_eq!(h.session.remaining(), Some(Duration::minutes(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_expired_credential_raises_notice() {
        let h = harness();
        h.store_credential("42", -1);

        h.session.restore().await;

        let snapshot = h.session.snapshot();
        assert!(!snapshot.is_authenticated());
        assert_eq!(snapshot.notice, Some(Notice::SessionExpired));
        assert!(stored(&h).is_none());
        assert_eq!(h.api.refresh_calls(), 0);
        assert_eq!(h.api.profile_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_malformed_credential_clears_silently() {
        let h = harness();
        h.storage
            .open_tab("jwt")
            .save(&Credential::new("garbage"))
            .unwrap();

        h.session.restore().await;

        assert_eq!(h.session.snapshot(), SessionSnapshot::default());
        assert!(stored(&h).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_out_of_range_expiry_stays_anonymous() {
        let h = harness();
        for payload in [
            r#"{"sub":"1","exp":-1e300}"#,
            r#"{"sub":"1","exp":-9223372036854776}"#,
        ] {
            h.storage
                .open_tab("jwt")
                .save(&Credential::new(credential_with_payload(payload)))
                .unwrap();

            h.session.restore().await;

            assert_eq!(h.session.snapshot(), SessionSnapshot::default());
            assert!(stored(&h).is_none());
        }
        h.session.check_expiry();
        assert!(!h.session.snapshot().is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_rejects_out_of_range_expiry() {
        let h = harness();
        let credential = Credential::new(credential_with_payload(r#"{"sub":"1","exp":-1e300}"#));
        assert!(matches!(
            h.session.login(h.profile(1), credential),
            Err(SessionError::InvalidCredential(ClaimsError::MissingExpiry))
        ));
        assert!(!h.session.snapshot().is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_refused_credential_is_cleared() {
        let h = harness();
        h.store_credential("42", 20 * MINUTE);
        h.api.fail_profile(Some(Failure::Unauthorized));

        h.session.restore().await;

        assert!(!h.session.snapshot().is_authenticated());
        assert_eq!(h.session.snapshot().notice, Some(Notice::SessionExpired));
        assert!(stored(&h).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_transient_failure_keeps_storage() {
        let h = harness();
        h.store_credential("42", 20 * MINUTE);
        h.api.fail_profile(Some(Failure::Server));

        h.session.restore().await;

        assert_eq!(h.session.snapshot(), SessionSnapshot::default());
        assert!(stored(&h).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_persists_and_arms_timer() {
        let h = harness();
        h.login("7", 20 * MINUTE);

        assert_eq!(h.session.current_user().map(|u| u.id()), Some(7));
        assert!(h.session.logout_timer_armed());
        assert_eq!(stored(&h), h.session.bearer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_rejects_malformed_and_expired() {
        let h = harness();
        let err = h
            .session
            .login(h.profile(1), Credential::new("not-a-credential"))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidCredential(_)));

        let err = h
            .session
            .login(h.profile(1), h.credential("1", -MINUTE))
            .unwrap_err();
        assert!(matches!(err, SessionError::Expired));

        assert!(!h.session.snapshot().is_authenticated());
        assert!(stored(&h).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_authenticate_uses_backend() {
        let h = harness();
        h.api.set_login(h.credential("9", 20 * MINUTE));
        h.session.authenticate("ola", "secret").await.unwrap();
        assert_eq!(h.session.current_user().map(|u| u.id()), Some(9));

        h.session.logout();
        h.api.clear_login();
        let err = h.session.authenticate("ola", "wrong").await.unwrap_err();
        assert!(matches!(err, SessionError::Api(ApiError::Unauthorized)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_expiry_signs_out_with_notice() {
        let h = harness();
        h.login("7", MINUTE);

        time::sleep(StdDuration::from_secs(59)).await;
        assert!(h.session.snapshot().is_authenticated());

        time::sleep(StdDuration::from_secs(2)).await;
        let snapshot = h.session.snapshot();
        assert!(!snapshot.is_authenticated());
        assert_eq!(snapshot.notice, Some(Notice::SessionExpired));
        assert!(stored(&h).is_none());
        assert!(!h.session.logout_timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_is_idempotent() {
        let h = harness();
        h.login("7", 20 * MINUTE);

        h.session.logout();
        assert_eq!(h.session.snapshot(), SessionSnapshot::default());
        h.session.logout();
        assert_eq!(h.session.snapshot(), SessionSnapshot::default());
        assert!(!h.session.logout_timer_armed());
        assert!(stored(&h).is_none());

        // The cancelled timer must not raise a notice later.
        time::sleep(StdDuration::from_secs(30 * 60)).await;
        assert_eq!(h.session.snapshot().notice, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_expiry_raises_imminent_flag() {
        let h = harness();
        h.login("7", 20 * MINUTE);
        assert!(!h.session.imminent_expiry());

        time::advance(StdDuration::from_secs(4 * 60)).await;
        h.session.check_expiry();
        assert!(!h.session.imminent_expiry());

        time::advance(StdDuration::from_secs(61)).await;
        h.session.check_expiry();
        assert!(h.session.imminent_expiry());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_expiry_signs_out_past_expiry() {
        let h = harness();
        h.login("7", MINUTE);
        h.session.teardown();

        time::advance(StdDuration::from_secs(2 * 60)).await;
        h.session.check_expiry();
        assert_eq!(h.session.snapshot().notice, Some(Notice::SessionExpired));
        assert!(!h.session.snapshot().is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_rearms_timer() {
        let h = harness();
        h.login("7", 10 * MINUTE);
        assert!(h.session.imminent_expiry());

        let fresh = h.credential("7", 30 * MINUTE);
        h.api.push_refresh(Ok(fresh.clone()));
        assert_eq!(h.session.renew().await, RenewOutcome::Renewed);

        assert!(!h.session.imminent_expiry());
        assert_eq!(h.session.bearer(), Some(fresh.clone()));
        assert_eq!(stored(&h), Some(fresh));

        // The old ten-minute timer must not fire.
        time::sleep(StdDuration::from_secs(11 * 60)).await;
        assert!(h.session.snapshot().is_authenticated());

        time::sleep(StdDuration::from_secs(19 * 60 + 1)).await;
        assert!(!h.session.snapshot().is_authenticated());
        assert_eq!(h.session.snapshot().notice, Some(Notice::SessionExpired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_keeps_imminent_for_short_credential() {
        let h = harness();
        h.login("7", 5 * MINUTE);
        h.api.push_refresh(Ok(h.credential("7", 10 * MINUTE)));

        assert_eq!(h.session.renew().await, RenewOutcome::Renewed);
        assert!(h.session.imminent_expiry());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_failure_signs_out_with_notice() {
        let h = harness();
        h.login("7", 10 * MINUTE);
        h.api.push_refresh(Err(Failure::Unauthorized));

        assert_eq!(h.session.renew().await, RenewOutcome::Failed);
        let snapshot = h.session.snapshot();
        assert!(!snapshot.is_authenticated());
        assert_eq!(snapshot.notice, Some(Notice::SessionExpired));
        assert!(stored(&h).is_none());
        assert!(!h.session.is_renewing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_renewal_adopts_credential_rotated_by_other_tab() {
        let h = harness();
        h.login("7", 10 * MINUTE);
        let other = h.open_tab();
        other.restore().await;
        assert!(other.snapshot().is_authenticated());

        let fresh = h.credential("7", 30 * MINUTE);
        h.api.push_refresh(Ok(fresh.clone()));
        assert_eq!(other.renew().await, RenewOutcome::Renewed);

        // The old credential was rotated away, so this tab's refresh is refused.
        h.api.push_refresh(Err(Failure::Unauthorized));
        assert_eq!(h.session.renew().await, RenewOutcome::Discarded);

        assert_eq!(stored(&h), Some(fresh.clone()));
        assert_eq!(h.session.bearer(), Some(fresh));
        assert_eq!(h.session.snapshot().notice, None);
        assert!(h.session.logout_timer_armed());
        assert!(!h.session.is_renewing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_renewal_with_same_stored_credential_signs_out() {
        let h = harness();
        h.login("7", 10 * MINUTE);
        let other = h.open_tab();
        other.restore().await;
        h.api.push_refresh(Err(Failure::Unauthorized));

        assert_eq!(h.session.renew().await, RenewOutcome::Failed);
        assert!(stored(&h).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_rejects_malformed_replacement() {
        let h = harness();
        h.login("7", 10 * MINUTE);
        h.api.push_refresh(Ok(Credential::new("x.%%%.y")));

        assert_eq!(h.session.renew().await, RenewOutcome::Failed);
        assert!(!h.session.snapshot().is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_renew_failure_is_treated_as_rejection() {
        let h = harness();
        h.login("7", 10 * MINUTE);
        h.api.push_refresh(Err(Failure::Server));

        assert_eq!(h.session.renew().await, RenewOutcome::Failed);
        assert_eq!(h.session.snapshot().notice, Some(Notice::SessionExpired));

        // The guard is released, so a later session can renew again.
        h.session.dismiss_notice();
        h.login("7", 10 * MINUTE);
        h.api.push_refresh(Ok(h.credential("7", 30 * MINUTE)));
        assert_eq!(h.session.renew().await, RenewOutcome::Renewed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_when_anonymous_is_noop() {
        let h = harness();
        assert_eq!(h.session.renew().await, RenewOutcome::NotAuthenticated);
        assert_eq!(h.api.refresh_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_renewals_send_one_request() {
        let h = harness();
        h.login("7", 10 * MINUTE);
        let gate = h.api.gate_refresh();
        h.api.push_refresh(Ok(h.credential("7", 30 * MINUTE)));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let session = h.session.clone();
                tokio::spawn(async move { session.renew().await })
            })
            .collect();

        while h.api.refresh_calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(h.session.is_renewing());
        assert_eq!(h.session.renew().await, RenewOutcome::AlreadyRenewing);

        gate.add_permits(1);
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert_eq!(h.api.refresh_calls(), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == RenewOutcome::Renewed).count(), 1);
        assert_eq!(
            outcomes.iter().filter(|o| **o == RenewOutcome::AlreadyRenewing).count(),
            4
        );
        assert!(!h.session.is_renewing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_renewal_after_logout_is_discarded() {
        let h = harness();
        h.login("7", 10 * MINUTE);
        let gate = h.api.gate_refresh();
        h.api.push_refresh(Ok(h.credential("7", 30 * MINUTE)));

        let session = h.session.clone();
        let pending = tokio::spawn(async move { session.renew().await });
        while h.api.refresh_calls() == 0 {
            tokio::task::yield_now().await;
        }

        h.session.logout();
        gate.add_permits(1);

        assert_eq!(pending.await.unwrap(), RenewOutcome::Discarded);
        assert_eq!(h.session.snapshot(), SessionSnapshot::default());
        assert!(stored(&h).is_none());
        assert!(!h.session.is_renewing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_renewal_releases_guard() {
        let h = harness();
        h.login("7", 10 * MINUTE);
        let _gate = h.api.gate_refresh();

        let session = h.session.clone();
        let pending = tokio::spawn(async move { session.renew().await });
        while h.api.refresh_calls() == 0 {
            tokio::task::yield_now().await;
        }
        pending.abort();
        let _ = pending.await;

        assert!(!h.session.is_renewing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_update_and_notice_dismissal() {
        let h = harness();
        h.login("7", 20 * MINUTE);
        h.session.apply_profile_update(&ProfileUpdate {
            first_name: Some("Ola".to_string()),
            ..Default::default()
        });
        let user = h.session.current_user().unwrap();
        assert_eq!(user.profile.first_name.as_deref(), Some("Ola"));
        assert_eq!(Some(user.credential), h.session.bearer());

        h.api.push_refresh(Err(Failure::Unauthorized));
        h.session.renew().await;
        assert!(h.session.snapshot().notice.is_some());
        h.session.dismiss_notice();
        assert!(h.session.snapshot().notice.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_transitions() {
        let h = harness();
        let mut rx = h.session.subscribe();

        h.login("7", 20 * MINUTE);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_authenticated());

        h.session.logout();
        assert!(!rx.borrow_and_update().is_authenticated());
    }
}
