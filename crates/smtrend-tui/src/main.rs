//! SM Trend TUI - terminal front end for the SM Trend session manager.
//!
//! Shows the signed-in user and the remaining credential lifetime, renews the
//! credential on activity when it is about to expire and signs out when it
//! runs out.

mod app;
mod ui;

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind,
        KeyModifiers, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use smtrend_core::auth::SystemClock;
use smtrend_core::{
    Activity, ApiClient, Config, NewUser, ProfileUpdate, Session, SessionHost, SharedStorage,
};

use app::{App, AppState};
use ui::input::handle_input;
use ui::render::render;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for polling terminal events (in milliseconds)
const EVENT_POLL_TIMEOUT_MS: u64 = 100;

/// Environment variable overriding the configured backend address
const API_URL_ENV: &str = "SMTREND_API_URL";

const LOG_FILE_PREFIX: &str = "smtrend.log";

/// Initialize the tracing subscriber for logging.
///
/// The terminal is in the alternate screen, so logs go to a daily rolling file
/// in the cache directory. Use RUST_LOG to control the level.
fn init_tracing(log_dir: &Path) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    if let Ok(url) = std::env::var(API_URL_ENV) {
        config.api_base_url = url;
    }
    let cache_dir = config.cache_dir()?;
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("Failed to create {}", cache_dir.display()))?;

    let _log_guard = init_tracing(&cache_dir);
    info!(api = %config.api_base_url, "SM Trend TUI starting");

    let client = ApiClient::new(config.api_base_url.clone())?;

    // Check for CLI commands
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--register") {
        return register_interactive(&client).await;
    }

    let storage = SharedStorage::on_disk(&cache_dir);
    let mut host = SessionHost::start(
        config.session.clone(),
        Arc::new(client.clone()),
        storage.open_tab(config.session.storage_key.clone()),
        Arc::new(SystemClock),
    )
    .await;

    if let Some(pos) = args.iter().position(|a| a == "--set-name") {
        let first = args
            .get(pos + 1)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Usage: smtrend --set-name <first> [last]"))?;
        let last = args.get(pos + 2).cloned();
        return set_name(&client, host.session(), first, last).await;
    }

    if args.iter().any(|a| a == "--login") {
        login_interactive(&mut config, &host).await?;
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, &host);
    if !app.is_authenticated() {
        app.start_login();
    }

    // Main loop
    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    host.shutdown();

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }

    info!("SM Trend TUI shutting down");
    Ok(())
}

/// Prompt for credentials on the plain terminal before the UI starts.
async fn login_interactive(config: &mut Config, host: &SessionHost) -> Result<()> {
    println!("\n=== SM Trend Login ===\n");

    let username = match config.last_username {
        Some(ref last) => {
            print!("Username [{}]: ", last);
            io::stdout().flush()?;
            let input = read_line()?;
            if input.is_empty() {
                last.clone()
            } else {
                input
            }
        }
        None => {
            print!("Username: ");
            io::stdout().flush()?;
            read_line()?
        }
    };
    let password = rpassword::prompt_password("Password: ")?;

    println!("\nAuthenticating...");
    host.session()
        .authenticate(&username, &password)
        .await
        .context("Login failed")?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
    println!("Login successful!\n");
    Ok(())
}

/// Create an account; the user signs in afterwards as usual.
async fn register_interactive(client: &ApiClient) -> Result<()> {
    println!("\n=== SM Trend Registration ===\n");

    print!("Username: ");
    io::stdout().flush()?;
    let username = read_line()?;
    print!("First name: ");
    io::stdout().flush()?;
    let first_name = read_line()?;
    print!("Last name: ");
    io::stdout().flush()?;
    let last_name = read_line()?;
    let password = rpassword::prompt_password("Password: ")?;
    if rpassword::prompt_password("Repeat password: ")? != password {
        anyhow::bail!("Passwords do not match");
    }

    let user = NewUser {
        username,
        password,
        first_name,
        last_name,
    };
    client.register(&user).await.context("Registration failed")?;
    println!("Registered {}. Run `smtrend --login` to sign in.", user.username);
    Ok(())
}

/// Change the signed-in user's name on the backend and in the session.
async fn set_name(
    client: &ApiClient,
    session: &Session,
    first_name: String,
    last_name: Option<String>,
) -> Result<()> {
    let user = session
        .current_user()
        .ok_or_else(|| anyhow::anyhow!("Not signed in. Run `smtrend --login` first."))?;

    let update = ProfileUpdate {
        first_name: Some(first_name),
        last_name,
        ..Default::default()
    };
    client
        .update_profile(&user.credential, user.id(), &update)
        .await
        .context("Profile update failed")?;
    session.apply_profile_update(&update);

    let name = session
        .current_user()
        .map(|u| u.profile.display_name())
        .unwrap_or_default();
    println!("Profile updated: {}", name);
    Ok(())
}

fn read_line() -> Result<String> {
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        app.sync_snapshot();
        terminal.draw(|f| render(f, app))?;

        // Poll for events with timeout so the countdown keeps moving
        if event::poll(Duration::from_millis(EVENT_POLL_TIMEOUT_MS))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    app.activity.record(Activity::KeyPress);

                    // Ctrl+C to quit
                    if key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL)
                    {
                        return Ok(());
                    }

                    if handle_input(app, key).await? {
                        return Ok(());
                    }
                }
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::Moved | MouseEventKind::Drag(_) => {
                        app.activity.record(Activity::PointerMove);
                    }
                    MouseEventKind::Down(_) => {
                        app.activity.record(Activity::Click);
                    }
                    _ => {}
                },
                _ => {}
            }
        }

        if matches!(app.state, AppState::Quitting) {
            return Ok(());
        }
    }
}
