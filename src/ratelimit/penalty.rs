//! Exponential penalty escalation for burst violations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PenaltyConfig;

/// Abuse escalation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyState {
    /// 0 = no penalty; each level multiplies the delay
    pub level: u32,
    pub last_violation: Option<DateTime<Utc>>,
    /// Delay computed for the current level
    pub delay_seconds: f64,
}

impl PenaltyState {
    pub fn is_active(&self) -> bool {
        self.level > 0
    }

    /// Drop the level to zero once `decay_period` has passed since the last violation.
    ///
    /// Decay is a full reset, never a single-step decrement. A violation
    /// stamped more than one period in the future also decays.
    pub fn decay(&mut self, now: DateTime<Utc>, decay_period: Duration) -> bool {
        match self.last_violation {
            Some(at) if self.is_active() && (now - at >= decay_period || at - now > decay_period) => {
                self.level = 0;
                self.delay_seconds = 0.0;
                true
            }
            _ => false,
        }
    }

    /// Record a violation at `now` and return the delay it carries.
    pub fn escalate(&mut self, now: DateTime<Utc>, config: &PenaltyConfig) -> f64 {
        self.level = self.level.saturating_add(1).min(config.max_level());
        self.last_violation = Some(now);
        self.delay_seconds = config.delay_for_level(self.level);
        self.delay_seconds
    }
}
