//! Admission decisions and read-only status snapshots.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::window::TimeWindow;

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    None,
    Warning,
    Throttled,
    Blocked,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    /// How long the caller must wait before proceeding
    pub delay_seconds: f64,
    pub reason: DecisionReason,
    /// Text for the user; empty when there is nothing to say
    pub message: String,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            delay_seconds: 0.0,
            reason: DecisionReason::None,
            message: String::new(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            allowed: true,
            delay_seconds: 0.0,
            reason: DecisionReason::Warning,
            message: message.into(),
        }
    }

    pub fn throttle(delay_seconds: f64, message: impl Into<String>) -> Self {
        Self {
            allowed: true,
            delay_seconds,
            reason: DecisionReason::Throttled,
            message: message.into(),
        }
    }

    pub fn block(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            delay_seconds: 0.0,
            reason: DecisionReason::Blocked,
            message: message.into(),
        }
    }

    /// The prescribed wait as a `Duration`; unrepresentable delays read as zero.
    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_seconds).unwrap_or(Duration::ZERO)
    }
}

/// Usage of one window at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStatus {
    pub window: TimeWindow,
    pub count: u64,
    pub limit: u64,
    pub hard_capped: bool,
    pub resets_in_seconds: i64,
}

/// Read-only view of the limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub windows: Vec<WindowStatus>,
    pub penalty_level: u32,
    pub current_delay_seconds: f64,
    pub last_violation: Option<DateTime<Utc>>,
    pub last_request: Option<DateTime<Utc>>,
    pub disabled: bool,
    pub state_file: PathBuf,
}

impl Snapshot {
    pub fn window(&self, window: TimeWindow) -> Option<&WindowStatus> {
        self.windows.iter().find(|status| status.window == window)
    }
}

/// Render a reset interval the way messages show it, e.g. `42m 10s`.
pub fn human_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (hours, minutes, secs) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
