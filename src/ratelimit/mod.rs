//! Rate limiting logic and state management.

mod decision;
mod gate;
mod limiter;
mod lock;
mod penalty;
mod state;
mod store;
mod window;

pub use decision::{human_duration, Decision, DecisionReason, Snapshot, WindowStatus};
pub use gate::admit;
pub use limiter::{evaluate, RateLimiter};
pub use lock::LockFile;
pub use penalty::PenaltyState;
pub use state::{LimiterState, STATE_VERSION};
pub use store::StateFile;
pub use window::{TimeWindow, UsageWindow};
