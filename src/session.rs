//! Trading session gate
//!
//! The exchange trades 09:15-15:30 local time. The offset is fixed (+05:30,
//! no DST), so a `FixedOffset` is sufficient and no tz database is needed.

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};

const OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Decides whether the trading session is currently open.
#[derive(Clone, Copy)]
pub struct SessionGate {
    offset: FixedOffset,
    open: NaiveTime,
    close: NaiveTime,
}

impl SessionGate {
    pub fn new() -> Self {
        // Statically valid, checked once at startup.
        Self::with_window(
            NaiveTime::from_hms_opt(9, 15, 0).expect("valid open time"),
            NaiveTime::from_hms_opt(15, 30, 0).expect("valid close time"),
        )
    }

    /// Gate with a custom daily window. A window whose open is after its
    /// close never matches.
    pub fn with_window(open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            offset: FixedOffset::east_opt(OFFSET_SECS).expect("valid exchange offset"),
            open,
            close,
        }
    }

    /// True while `now` falls inside the daily window, inclusive on both ends.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset).time();
        local >= self.open && local <= self.close
    }

    /// Convenience wrapper over the current wall clock.
    pub fn is_open_now(&self) -> bool {
        self.is_open(Utc::now())
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}
