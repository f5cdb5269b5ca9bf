//! Plain-text rendering of the session list for the UI layer.

use std::fmt::Write;

use crate::models::SleepSession;

#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub use_24_hour_clock: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            use_24_hour_clock: true,
        }
    }
}

pub fn quality_label(quality: Option<i32>) -> &'static str {
    match quality {
        Some(0) => "very poor",
        Some(1) => "poor",
        Some(2) => "so-so",
        Some(3) => "ok",
        Some(4) => "good",
        Some(5) => "excellent",
        _ => "unrated",
    }
}

fn format_duration(duration_ms: i64) -> String {
    let minutes = duration_ms / 60_000;
    let hours = minutes / 60;
    let minutes = minutes % 60;

    if hours > 0 {
        format!("{hours} h {minutes:02} min")
    } else {
        format!("{minutes} min")
    }
}

/// Renders one line per session, newest first. Open sessions show
/// "in progress" instead of a duration.
pub fn format_sessions(sessions: &[SleepSession], options: &FormatOptions) -> String {
    if sessions.is_empty() {
        return "No sleep recorded yet.".to_string();
    }

    let time_pattern = if options.use_24_hour_clock {
        "%b %d %H:%M"
    } else {
        "%b %d %I:%M %p"
    };

    let mut out = String::from("Your sleep sessions:\n");
    for session in sessions {
        let span = if session.is_open() {
            "in progress".to_string()
        } else {
            format_duration(session.duration_ms())
        };

        let _ = writeln!(
            out,
            "  #{} {}  {}  ({})",
            session.id,
            session.started_at.format(time_pattern),
            span,
            quality_label(session.quality),
        );
    }

    out.trim_end().to_string()
}
