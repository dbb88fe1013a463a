//! Fixed-duration usage windows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Time window for request counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    /// Per-minute counting, the burst signal
    Minute,
    /// Per-10-minute hard cap
    TenMinutes,
    /// Per-hour hard cap
    Hour,
    /// Per-day hard cap
    Day,
}

impl TimeWindow {
    /// Every tracked window, shortest first.
    pub const ALL: [TimeWindow; 4] = [
        TimeWindow::Minute,
        TimeWindow::TenMinutes,
        TimeWindow::Hour,
        TimeWindow::Day,
    ];

    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Minute => Duration::seconds(60),
            TimeWindow::TenMinutes => Duration::seconds(600),
            TimeWindow::Hour => Duration::seconds(3600),
            TimeWindow::Day => Duration::seconds(86400),
        }
    }

    /// Whether reaching this window's limit blocks requests outright.
    ///
    /// The minute window feeds the burst penalty instead.
    pub fn is_hard_capped(&self) -> bool {
        !matches!(self, TimeWindow::Minute)
    }

    /// Short unit used in rates, e.g. `15/min`.
    pub fn unit(&self) -> &'static str {
        match self {
            TimeWindow::Minute => "min",
            TimeWindow::TenMinutes => "10min",
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
        }
    }

    /// Capitalized name used in messages.
    pub fn label(&self) -> &'static str {
        match self {
            TimeWindow::Minute => "Per-minute",
            TimeWindow::TenMinutes => "10-minute",
            TimeWindow::Hour => "Hourly",
            TimeWindow::Day => "Daily",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            TimeWindow::Minute => 0,
            TimeWindow::TenMinutes => 1,
            TimeWindow::Hour => 2,
            TimeWindow::Day => 3,
        }
    }
}

/// Request count within one fixed window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageWindow {
    pub window: TimeWindow,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub window_start: DateTime<Utc>,
}

impl UsageWindow {
    /// Create an empty window; it rolls on first use.
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            count: 0,
            window_start: DateTime::<Utc>::default(),
        }
    }

    /// When the current window ends, `None` if that lies past the calendar.
    pub fn resets_at(&self) -> Option<DateTime<Utc>> {
        self.window_start.checked_add_signed(self.window.duration())
    }

    /// Start a fresh window if the current one has ended.
    ///
    /// A request exactly on the boundary belongs to the new window. A start
    /// further in the future than one window length cannot come from this
    /// clock and is treated as ended too.
    pub fn roll(&mut self, now: DateTime<Utc>) -> bool {
        let ended = match self.resets_at() {
            Some(end) => now >= end || end - now > self.window.duration() * 2,
            None => true,
        };
        if ended {
            self.count = 0;
            self.window_start = now;
            true
        } else {
            false
        }
    }

    pub fn record(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    pub fn is_exhausted(&self, limit: u64) -> bool {
        self.count >= limit
    }

    /// Get the duration until the current window resets.
    pub fn time_until_reset(&self, now: DateTime<Utc>) -> Duration {
        let Some(end) = self.resets_at() else {
            return Duration::zero();
        };
        let remaining = end - now;
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }
}
