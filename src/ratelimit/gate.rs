//! Admission gate for async callers.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::decision::Decision;
use super::limiter::RateLimiter;
use crate::error::{NinjaexaError, Result};

/// Consult the limiter once and honor its decision before an outbound request.
///
/// Returns `Denied` with the user-facing message when the request is blocked,
/// otherwise waits out any prescribed delay and returns the decision so its
/// message can be shown alongside the result. Call exactly once per request.
pub async fn admit(limiter: Arc<RateLimiter>) -> Result<Decision> {
    let decision = tokio::task::spawn_blocking(move || limiter.check_and_record(Utc::now())).await?;

    if !decision.allowed {
        return Err(NinjaexaError::Denied(decision.message));
    }

    if decision.delay_seconds > 0.0 {
        info!(delay_seconds = decision.delay_seconds, "Throttled, waiting before request");
        tokio::time::sleep(decision.delay()).await;
    }

    Ok(decision)
}
