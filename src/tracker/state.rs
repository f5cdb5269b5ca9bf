use serde::Serialize;

use crate::format::{format_sessions, FormatOptions};
use crate::models::SleepSession;

/// Controller-held state. `current` is non-empty only while a session is
/// open; the one-shot slots stay set until their acknowledgement command
/// clears them.
#[derive(Debug, Clone, Default)]
pub(crate) struct TrackerState {
    pub current: Option<SleepSession>,
    pub sessions: Vec<SleepSession>,
    pub pending_snackbar: bool,
    pub pending_rating: Option<SleepSession>,
}

impl TrackerState {
    /// Applies the open-session test to the latest stored session: a closed
    /// session means there is nothing to resume.
    pub fn adopt_latest(&mut self, latest: Option<SleepSession>) {
        self.current = latest.filter(SleepSession::is_open);
    }

    pub fn snapshot(&self, options: &FormatOptions) -> TrackerSnapshot {
        TrackerSnapshot {
            start_button_visible: self.current.is_none(),
            stop_button_visible: self.current.is_some(),
            clear_button_visible: !self.sessions.is_empty(),
            formatted_sessions: format_sessions(&self.sessions, options),
            pending_snackbar: self.pending_snackbar,
            pending_rating: self.pending_rating.clone(),
        }
    }
}

/// Derived signals published to the UI layer whenever the underlying state
/// changes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub start_button_visible: bool,
    pub stop_button_visible: bool,
    pub clear_button_visible: bool,
    pub formatted_sessions: String,
    pub pending_snackbar: bool,
    pub pending_rating: Option<SleepSession>,
}
