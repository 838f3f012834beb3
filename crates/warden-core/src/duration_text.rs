//! Duration text helpers for chat commands (`30m`, `8h`, `1h 30m`) and
//! announcement rendering.

use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Parses human duration text such as `30m`, `8h1m`, or `2 hours`.
pub fn parse_duration_text(text: &str) -> Result<Duration> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        bail!("duration text is empty");
    }
    if !trimmed.chars().any(char::is_alphabetic) {
        bail!("duration '{trimmed}' is missing a unit");
    }
    humantime::parse_duration(trimmed)
        .with_context(|| format!("could not parse duration '{trimmed}'"))
}

/// Renders a duration at second precision, e.g. `1h 30m`.
pub fn humanize_duration(duration: Duration) -> String {
    let whole_seconds = Duration::from_secs(duration.as_secs());
    humantime::format_duration(whole_seconds).to_string()
}

/// Renders an elapsed span as `12m ago`; spans of an hour or more drop the
/// seconds component, future or zero spans render as `just now`.
pub fn render_time_ago(elapsed: chrono::Duration) -> String {
    let Ok(elapsed) = elapsed.to_std() else {
        return "just now".to_string();
    };
    let seconds = elapsed.as_secs();
    if seconds == 0 {
        return "just now".to_string();
    }
    let rounded = if seconds >= 3_600 {
        seconds - seconds % 60
    } else {
        seconds
    };
    format!("{} ago", humanize_duration(Duration::from_secs(rounded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_and_spelled_units() {
        assert_eq!(
            parse_duration_text("8h1m").expect("compound"),
            Duration::from_secs(8 * 3_600 + 60)
        );
        assert_eq!(
            parse_duration_text(" 30m ").expect("minutes"),
            Duration::from_secs(1_800)
        );
        assert_eq!(
            parse_duration_text("2 hours").expect("spelled"),
            Duration::from_secs(7_200)
        );
    }

    #[test]
    fn rejects_empty_and_unitless_text() {
        assert!(parse_duration_text("").is_err());
        assert!(parse_duration_text("soon").is_err());
        assert!(parse_duration_text("45").is_err());
    }

    #[test]
    fn humanizes_whole_units() {
        assert_eq!(humanize_duration(Duration::from_secs(1_800)), "30m");
        assert_eq!(humanize_duration(Duration::from_secs(8 * 3_600)), "8h");
    }

    #[test]
    fn time_ago_handles_future_and_long_spans() {
        assert_eq!(render_time_ago(chrono::Duration::seconds(-5)), "just now");
        assert_eq!(render_time_ago(chrono::Duration::seconds(90)), "1m 30s ago");
        assert_eq!(render_time_ago(chrono::Duration::seconds(3_725)), "1h 2m ago");
    }
}
