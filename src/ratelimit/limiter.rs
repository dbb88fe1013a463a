//! Core rate limiter implementation.

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use super::decision::{human_duration, Decision, Snapshot, WindowStatus};
use super::state::LimiterState;
use super::store::StateFile;
use super::window::TimeWindow;
use crate::config::LimiterConfig;
use crate::error::{NinjaexaError, Result};

/// Admission control over a shared, file-persisted usage record.
///
/// Each call to [`RateLimiter::check_and_record`] is a locked
/// read-decide-write cycle, so separate processes pointed at the same state
/// file never lose each other's updates.
pub struct RateLimiter {
    config: LimiterConfig,
    store: StateFile,
}

impl RateLimiter {
    /// Create a rate limiter using the state file named by the configuration.
    pub fn new(config: LimiterConfig) -> Self {
        let store = StateFile::from_config(&config.storage);
        Self { config, store }
    }

    /// Create a rate limiter over an explicit state file.
    pub fn with_store(config: LimiterConfig, store: StateFile) -> Self {
        Self { config, store }
    }

    pub fn state_file(&self) -> &StateFile {
        &self.store
    }

    /// Decide whether a request at `now` may proceed, and count it.
    ///
    /// Never fails: an unavailable lock or unwritable state degrades to
    /// best-effort limiting instead of breaking the caller. A lock held past
    /// the timeout allows the request with a warning. A lock that cannot be
    /// created at all still enforces the recorded state, without saving it.
    pub fn check_and_record(&self, now: DateTime<Utc>) -> Decision {
        if self.config.disabled {
            trace!("Rate limiting disabled");
            return Decision::allow();
        }

        let decision = match self.store.lock() {
            Ok(_lock) => {
                let mut state = self.store.load();
                let decision = evaluate(&self.config, &mut state, now);
                if let Err(e) = self.store.save(&state) {
                    warn!(
                        path = %self.store.path().display(),
                        error = %e,
                        "Failed to persist rate limiter state"
                    );
                }
                decision
            }
            Err(e @ NinjaexaError::LockTimeout { .. }) => {
                warn!(error = %e, "Rate limiter state is busy; allowing request");
                return Decision::warn(format!(
                    "[WARNING] Rate limiter unavailable ({e}). Request allowed without rate limiting."
                ));
            }
            Err(e) => {
                warn!(
                    lock = %self.store.lock_path().display(),
                    error = %e,
                    "Could not lock rate limiter state; deciding without recording"
                );
                let mut state = self.store.load();
                evaluate(&self.config, &mut state, now)
            }
        };

        debug!(
            allowed = decision.allowed,
            reason = ?decision.reason,
            delay_seconds = decision.delay_seconds,
            "Admission decision"
        );
        decision
    }

    /// Report current usage without recording anything.
    pub fn status(&self) -> Snapshot {
        self.status_at(Utc::now())
    }

    /// Report usage as it stands at `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> Snapshot {
        let mut state = self.store.load();
        state.roll_windows(now);
        state.penalty.decay(now, self.config.penalty.decay_period());

        let windows = state
            .windows()
            .iter()
            .map(|usage| WindowStatus {
                window: usage.window,
                count: usage.count,
                limit: self.config.limits.limit_for(usage.window),
                hard_capped: usage.window.is_hard_capped(),
                resets_in_seconds: usage.time_until_reset(now).num_seconds(),
            })
            .collect();

        Snapshot {
            windows,
            penalty_level: state.penalty.level,
            current_delay_seconds: if state.penalty.is_active() {
                state.penalty.delay_seconds
            } else {
                0.0
            },
            last_violation: state.penalty.last_violation,
            last_request: state.last_request,
            disabled: self.config.disabled,
            state_file: self.store.path().to_path_buf(),
        }
    }

    /// Clear all windows and penalty state.
    pub fn reset(&self) -> Result<()> {
        let _lock = self.store.lock()?;
        self.store.save(&LimiterState::default())?;
        info!(path = %self.store.path().display(), "Rate limiter state reset");
        Ok(())
    }
}

/// Apply one request at `now` to `state` and decide its fate.
///
/// Hard caps are checked before anything is counted and take priority over
/// burst penalties. Only the per-minute count drives penalties.
pub fn evaluate(config: &LimiterConfig, state: &mut LimiterState, now: DateTime<Utc>) -> Decision {
    state.roll_windows(now);
    if state.penalty.decay(now, config.penalty.decay_period()) {
        trace!("Penalty decayed");
    }

    let exhausted = TimeWindow::ALL
        .iter()
        .filter(|window| window.is_hard_capped())
        .map(|&window| state.window(window))
        .filter(|usage| usage.is_exhausted(config.limits.limit_for(usage.window)))
        .max_by_key(|usage| usage.resets_at());

    if let Some(usage) = exhausted {
        let limit = config.limits.limit_for(usage.window);
        debug!(window = ?usage.window, count = usage.count, limit, "Hard cap reached");
        return Decision::block(format!(
            "[BLOCKED] {} limit reached ({}/{}). Resets in {}.",
            usage.window.label(),
            limit,
            usage.window.unit(),
            human_duration(usage.time_until_reset(now).num_seconds())
        ));
    }

    state.record(now);

    let per_minute = state.window(TimeWindow::Minute).count;
    let limit = config.limits.per_minute;
    let count = per_minute as f64;

    if count >= config.burst.delay_threshold(limit) {
        let delay = state.penalty.escalate(now, &config.penalty);
        Decision::throttle(
            delay,
            format!(
                "[RATE LIMITED] Too many requests ({}/min). Penalty level {}: waiting {:.1}s. \
                 Slow down to avoid longer delays.",
                per_minute, state.penalty.level, delay
            ),
        )
    } else if count >= config.burst.warning_threshold(limit) {
        Decision::warn(format!(
            "[WARNING] High request rate ({}/min). Limit: {}/min. Slow down to avoid delays.",
            per_minute, limit
        ))
    } else {
        Decision::allow()
    }
}
