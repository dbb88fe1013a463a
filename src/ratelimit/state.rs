//! Persisted limiter record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::penalty::PenaltyState;
use super::window::{TimeWindow, UsageWindow};
use crate::error::Result;

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

/// Everything the limiter remembers between invocations.
///
/// Missing fields load as defaults so older or hand-edited files still parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterState {
    #[serde(default = "default_version")]
    pub version: u32,

    /// One entry per `TimeWindow`, in `TimeWindow::ALL` order
    #[serde(default)]
    windows: Vec<UsageWindow>,

    #[serde(default)]
    pub penalty: PenaltyState,

    #[serde(default)]
    pub last_request: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl Default for LimiterState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            windows: TimeWindow::ALL.iter().map(|&w| UsageWindow::new(w)).collect(),
            penalty: PenaltyState::default(),
            last_request: None,
        }
    }
}

impl LimiterState {
    /// Parse a state record, repairing the window list.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut state: LimiterState = serde_json::from_str(json)?;
        state.normalize();
        Ok(state)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn window(&self, window: TimeWindow) -> &UsageWindow {
        &self.windows[window.index()]
    }

    pub fn windows(&self) -> &[UsageWindow] {
        &self.windows
    }

    /// Roll every window whose period has ended.
    pub fn roll_windows(&mut self, now: DateTime<Utc>) {
        for usage in &mut self.windows {
            if usage.roll(now) {
                trace!(window = ?usage.window, "Window rolled over");
            }
        }
    }

    /// Count one request against every window.
    pub fn record(&mut self, now: DateTime<Utc>) {
        for usage in &mut self.windows {
            usage.record();
        }
        self.last_request = Some(now);
    }

    /// Keep exactly one window per granularity, in canonical order.
    fn normalize(&mut self) {
        let loaded = std::mem::take(&mut self.windows);
        self.windows = TimeWindow::ALL
            .iter()
            .map(|&w| {
                loaded
                    .iter()
                    .find(|usage| usage.window == w)
                    .cloned()
                    .unwrap_or_else(|| UsageWindow::new(w))
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_state_is_zeroed() {
        let state = LimiterState::default();
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.windows().len(), 4);
        assert!(state.windows().iter().all(|w| w.count == 0));
        assert_eq!(state.penalty.level, 0);
    }

    #[test]
    fn test_partial_record_loads() {
        let json = r#"{
            "windows": [
                {"window": "day", "count": 42, "window_start": "2024-01-01T00:00:00Z"},
                {"window": "minute", "count": 3}
            ]
        }"#;
        let state = LimiterState::from_json(json).unwrap();

        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.window(TimeWindow::Day).count, 42);
        assert_eq!(state.window(TimeWindow::Minute).count, 3);
        assert_eq!(state.window(TimeWindow::Hour).count, 0);
        assert_eq!(
            state.windows().iter().map(|w| w.window).collect::<Vec<_>>(),
            TimeWindow::ALL.to_vec()
        );
        assert_eq!(state.penalty, PenaltyState::default());
    }

    #[test]
    fn test_corrupt_record_is_error() {
        assert!(LimiterState::from_json("{not json").is_err());
        assert!(LimiterState::from_json(r#"{"windows": 7}"#).is_err());
    }

    #[test]
    fn test_record_counts_every_window() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut state = LimiterState::default();
        state.roll_windows(now);
        state.record(now);
        state.record(now);

        assert!(state.windows().iter().all(|w| w.count == 2));
        assert_eq!(state.last_request, Some(now));
    }

    #[test]
    fn test_json_is_human_readable() {
        let json = LimiterState::default().to_json().unwrap();
        assert!(json.contains("\"ten_minutes\""));
        assert!(json.contains("\"penalty\""));
        assert!(json.contains('\n'));
    }
}
