use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

/// Width of every export window.
pub const INTERVAL: TimeDelta = TimeDelta::minutes(5);

/// Catch-up bound: at most one hour of windows per run.
pub const MAX_WINDOWS: u32 = 12;

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// The `index`th window after `origin`. Offsets are taken from `origin`
    /// rather than chained from the previous window's end.
    pub fn nth(origin: DateTime<Utc>, index: u32) -> Self {
        let start = origin + INTERVAL * index as i32;
        Self {
            start,
            end: start + INTERVAL,
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Number of whole intervals between `start` and `end`. Zero when `end`
/// is not after `start`.
pub fn interval_count(start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
    let elapsed = end - start;
    if elapsed <= TimeDelta::zero() {
        return 0;
    }
    let count = elapsed.num_milliseconds() / INTERVAL.num_milliseconds();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Windows to process in one run starting at `effective_start`, bounded by
/// [`MAX_WINDOWS`].
pub fn plan(effective_start: DateTime<Utc>, now: DateTime<Utc>) -> impl Iterator<Item = Window> {
    let count = interval_count(effective_start, now).min(MAX_WINDOWS);
    (0..count).map(move |i| Window::nth(effective_start, i))
}
