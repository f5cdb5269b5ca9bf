//! Sleep session data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest quality rating the store accepts.
pub const QUALITY_MIN: i32 = 0;
/// Highest quality rating the store accepts.
pub const QUALITY_MAX: i32 = 5;

/// One sleep-tracking record.
///
/// A session whose `ended_at` equals `started_at` is still open; the two
/// timestamps are stamped identically at creation and `ended_at` moves
/// forward when the session is stopped. `quality` stays `None` until the
/// rating flow fills it in after the session closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepSession {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub quality: Option<i32>,
}

impl SleepSession {
    pub fn is_open(&self) -> bool {
        self.ended_at == self.started_at
    }

    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}
