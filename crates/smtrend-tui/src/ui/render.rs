use chrono::Local;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

use smtrend_core::utils::{format_remaining, format_remaining_short, truncate};

use crate::app::{App, AppState, LoginFocus};

use super::styles;

/// Longest username shown in the title bar
const MAX_TITLE_NAME_LEN: usize = 24;

pub fn render(frame: &mut Frame, app: &App) {
    let notice_height = if app.snapshot.notice.is_some() { 3 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),             // Title bar
            Constraint::Length(notice_height), // Notice banner
            Constraint::Min(8),                // Session panel
            Constraint::Length(2),             // Status bar
        ])
        .split(frame.area());

    render_title_bar(frame, app, chunks[0]);
    render_notice(frame, app, chunks[1]);
    render_session_panel(frame, app, chunks[2]);
    render_status_bar(frame, app, chunks[3]);

    if matches!(app.state, AppState::LoggingIn) {
        render_login_overlay(frame, app);
    }

    if matches!(app.state, AppState::ConfirmingQuit) {
        render_quit_overlay(frame);
    }
}

fn render_title_bar(frame: &mut Frame, app: &App, area: Rect) {
    let title = "  SM Trend";
    let user_hint = match app.snapshot.current_user() {
        Some(user) => format!(
            "{} ({})",
            truncate(&user.profile.username, MAX_TITLE_NAME_LEN),
            format_remaining_short(app.session.remaining().unwrap_or_else(chrono::Duration::zero))
        ),
        None => "Signed out".to_string(),
    };

    let title_line = Line::from(vec![
        Span::styled(title, styles::title_style()),
        Span::raw(" ".repeat(
            (area.width as usize).saturating_sub(title.len() + user_hint.len() + 2),
        )),
        Span::styled(user_hint, styles::muted_style()),
    ]);

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(styles::muted_style());

    frame.render_widget(Paragraph::new(title_line).block(block), area);
}

fn render_notice(frame: &mut Frame, app: &App, area: Rect) {
    let Some(notice) = app.snapshot.notice else {
        return;
    };
    let lines = vec![
        Line::from(Span::styled(format!(" {}", notice.message()), styles::notice_style())),
        Line::from(vec![
            Span::styled(" [l]", styles::help_key_style()),
            Span::styled(" sign in   ", styles::muted_style()),
            Span::styled("[d]", styles::help_key_style()),
            Span::styled(" dismiss", styles::muted_style()),
        ]),
    ];
    frame.render_widget(Paragraph::new(lines), area);
}

fn render_session_panel(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Session ")
        .borders(Borders::ALL)
        .border_style(styles::border_style(true));

    let Some(user) = app.snapshot.current_user() else {
        let lines = vec![
            Line::from(""),
            Line::from(Span::styled("  Not signed in.", styles::muted_style())),
            Line::from(vec![
                Span::styled("  Press ", styles::muted_style()),
                Span::styled("[l]", styles::help_key_style()),
                Span::styled(" to sign in.", styles::muted_style()),
            ]),
        ];
        frame.render_widget(Paragraph::new(lines).block(block), area);
        return;
    };

    let remaining = app.session.remaining().unwrap_or_else(chrono::Duration::zero);
    let imminent = app.snapshot.imminent_expiry();
    let expires = user.expires_at().with_timezone(&Local);

    let renewal = if app.session.is_renewing() {
        Span::styled("renewing...", styles::warning_style())
    } else if imminent {
        Span::styled("on next activity", styles::warning_style())
    } else {
        Span::styled("not needed yet", styles::muted_style())
    };

    let lines = vec![
        Line::from(""),
        field("User", Span::styled(user.profile.display_name(), styles::value_style())),
        field("Username", Span::styled(user.profile.username.clone(), styles::value_style())),
        field("User ID", Span::styled(user.id().to_string(), styles::value_style())),
        Line::from(""),
        field(
            "Expires",
            Span::styled(expires.format("%Y-%m-%d %H:%M:%S").to_string(), styles::value_style()),
        ),
        field(
            "Remaining",
            Span::styled(
                format_remaining(remaining),
                styles::remaining_style(imminent, remaining.num_seconds()),
            ),
        ),
        field("Renewal", renewal),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn field(label: &str, value: Span<'static>) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("  {:<10} ", label), styles::muted_style()),
        value,
    ])
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let shortcuts = if app.is_authenticated() {
        "[r]enew | [o] sign out | [q]uit"
    } else {
        "[l] sign in | [q]uit"
    };

    let left_text = match app.status_message {
        Some(ref msg) => format!(" {} ", msg),
        None => String::new(),
    };
    let right_text = format!(" {} ", shortcuts);

    let padding_len = (area.width as usize)
        .saturating_sub(left_text.len())
        .saturating_sub(right_text.len());
    let status_line = Line::from(vec![
        Span::styled(left_text, styles::muted_style()),
        Span::raw(" ".repeat(padding_len)),
        Span::styled(right_text, styles::muted_style()),
    ]);
    frame.render_widget(
        Paragraph::new(status_line).style(styles::status_bar_style()),
        area,
    );
}

fn render_login_overlay(frame: &mut Frame, app: &App) {
    let height = if app.login_error.is_some() { 10 } else { 8 };
    let area = centered_rect_fixed(46, height, frame.area());

    frame.render_widget(Clear, area);

    let mut lines = vec![Line::from("")];

    let username_focused = app.login_focus == LoginFocus::Username;
    let username_style = if username_focused {
        styles::selected_style()
    } else {
        styles::value_style()
    };
    let cursor = if username_focused { "▌" } else { "" };
    lines.push(Line::from(vec![
        Span::raw("      "),
        Span::styled("Username: [", styles::muted_style()),
        Span::styled(format!("{:<16}{}", app.login_username, cursor), username_style),
        Span::styled("]", styles::muted_style()),
    ]));

    let password_focused = app.login_focus == LoginFocus::Password;
    let password_style = if password_focused {
        styles::selected_style()
    } else {
        styles::value_style()
    };
    let masked = "*".repeat(app.login_password.len().min(16));
    let cursor = if password_focused { "▌" } else { "" };
    lines.push(Line::from(vec![
        Span::raw("      "),
        Span::styled("Password: [", styles::muted_style()),
        Span::styled(format!("{:<16}{}", masked, cursor), password_style),
        Span::styled("]", styles::muted_style()),
    ]));

    let button_focused = app.login_focus == LoginFocus::Button;
    let (label, button_style) = if button_focused {
        (" ▶ Login ◀ ", styles::selected_style())
    } else {
        ("   Login   ", styles::value_style())
    };
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::raw("            ["),
        Span::styled(label, button_style),
        Span::raw("]"),
    ]));

    if let Some(ref error) = app.login_error {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(format!(" {}", error), styles::error_style())));
    }

    let block = Block::default()
        .title(" Sign in ")
        .borders(Borders::ALL)
        .border_style(styles::border_style(true))
        .style(Style::default());

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

/// Create a centered rectangle with fixed dimensions
fn centered_rect_fixed(width: u16, height: u16, r: Rect) -> Rect {
    let x = r.x + (r.width.saturating_sub(width)) / 2;
    let y = r.y + (r.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width.min(r.width), height.min(r.height))
}

fn render_quit_overlay(frame: &mut Frame) {
    let area = centered_rect_fixed(46, 6, frame.area());

    frame.render_widget(Clear, area);

    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            "   Are you sure you want to quit?",
            styles::warning_style(),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled("   Press ", styles::muted_style()),
            Span::styled("[Y]", styles::help_key_style()),
            Span::styled(" to quit, ", styles::muted_style()),
            Span::styled("[N]", styles::help_key_style()),
            Span::styled(" to cancel", styles::muted_style()),
        ]),
    ];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true))
        .style(Style::default());

    frame.render_widget(Paragraph::new(lines).block(block), area);
}
