use tracing::{error, info, warn};

use smtrend_core::auth::SessionError;
use smtrend_core::{ActivityBus, Config, RenewOutcome, Session, SessionHost, SessionSnapshot};

// ============================================================================
// Constants
// ============================================================================

/// Maximum username length accepted by the login form
const MAX_USERNAME_LENGTH: usize = 50;

/// Maximum password length accepted by the login form
const MAX_PASSWORD_LENGTH: usize = 128;

// ============================================================================
// UI State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppState {
    Normal,
    LoggingIn,
    ConfirmingQuit,
    Quitting,
}

/// Login form focus state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoginFocus {
    Username,
    Password,
    Button,
}

/// Main application state container
pub struct App {
    pub config: Config,
    pub session: Session,
    pub activity: ActivityBus,

    /// Session state as of the last frame
    pub snapshot: SessionSnapshot,

    pub state: AppState,
    pub status_message: Option<String>,

    // Login form state
    pub login_username: String,
    pub login_password: String,
    pub login_focus: LoginFocus,
    pub login_error: Option<String>,
}

impl App {
    pub fn new(config: Config, host: &SessionHost) -> Self {
        let session = host.session().clone();
        let login_username = config.last_username.clone().unwrap_or_default();
        Self {
            snapshot: session.snapshot(),
            session,
            activity: host.activity().clone(),
            config,
            state: AppState::Normal,
            status_message: None,
            login_username,
            login_password: String::new(),
            login_focus: LoginFocus::Username,
            login_error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot.is_authenticated()
    }

    /// Pick up transitions made by the background tasks.
    pub fn sync_snapshot(&mut self) {
        let snapshot = self.session.snapshot();
        if self.snapshot.is_authenticated() && !snapshot.is_authenticated() {
            self.status_message = None;
        }
        self.snapshot = snapshot;
    }

    /// Start the login process (show login overlay)
    pub fn start_login(&mut self) {
        self.state = AppState::LoggingIn;
        self.login_focus = if self.login_username.is_empty() {
            LoginFocus::Username
        } else {
            LoginFocus::Password
        };
        self.login_error = None;
    }

    /// Attempt login with the credentials from the login form
    pub async fn attempt_login(&mut self) {
        let username = self.login_username.trim().to_string();
        if username.is_empty() || self.login_password.is_empty() {
            self.login_error = Some("Username and password required".to_string());
            return;
        }

        self.login_error = None;
        match self.session.authenticate(&username, &self.login_password).await {
            Ok(()) => {
                self.config.last_username = Some(username);
                if let Err(e) = self.config.save() {
                    warn!(error = %e, "Failed to save config");
                }
                self.login_password.clear();
                self.state = AppState::Normal;
                self.status_message = Some("Signed in".to_string());
                self.sync_snapshot();
                info!("Login successful");
            }
            Err(e) => {
                error!(error = %e, "Login failed");
                self.login_error = Some(login_error_message(&e));
            }
        }
    }

    pub fn logout(&mut self) {
        self.session.logout();
        self.status_message = Some("Signed out".to_string());
        self.sync_snapshot();
    }

    /// Renew on request instead of waiting for activity near expiry.
    pub async fn renew(&mut self) {
        let outcome = self.session.renew().await;
        self.status_message = Some(renew_message(outcome).to_string());
        self.sync_snapshot();
    }

    pub fn dismiss_notice(&mut self) {
        self.session.dismiss_notice();
        self.sync_snapshot();
    }
}

fn login_error_message(e: &SessionError) -> String {
    match e {
        SessionError::Api(api) => api.user_message(),
        SessionError::Expired => "The server issued an expired credential".to_string(),
        SessionError::InvalidCredential(_) => "The server issued an unreadable credential".to_string(),
    }
}

pub fn renew_message(outcome: RenewOutcome) -> &'static str {
    match outcome {
        RenewOutcome::Renewed => "Session renewed",
        RenewOutcome::AlreadyRenewing => "Renewal already in progress",
        RenewOutcome::NotAuthenticated => "Not signed in",
        RenewOutcome::Failed => "Renewal failed, signed out",
        RenewOutcome::Discarded => "Session changed during renewal",
    }
}

// ============================================================================
// Input validation helpers (exported for use in input.rs)
// ============================================================================

/// Check if a character is valid for input (no control characters)
fn is_valid_input_char(c: char) -> bool {
    !c.is_control()
}

/// Check if a username character should be accepted
pub fn can_add_username_char(current_len: usize, c: char) -> bool {
    current_len < MAX_USERNAME_LENGTH && is_valid_input_char(c)
}

/// Check if a password character should be accepted
pub fn can_add_password_char(current_len: usize, c: char) -> bool {
    current_len < MAX_PASSWORD_LENGTH && is_valid_input_char(c)
}
