use chrono::Duration;

/// Format a remaining lifetime as `"1h 4m 9s"`. Negative values show as zero.
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{}h {}m {}s", hours, minutes, seconds)
}

/// Compact form for narrow status bars: `"14:05"` below an hour, `"1h 04m"` above.
pub fn format_remaining_short(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    if total < 3600 {
        format!("{:02}:{:02}", total / 60, total % 60)
    } else {
        format!("{}h {:02}m", total / 3600, (total % 3600) / 60)
    }
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
