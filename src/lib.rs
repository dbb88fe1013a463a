//! NinjaExa - abuse-protection rate limiter for the NinjaExa search client
//!
//! Every search invocation consults the limiter once before calling the
//! remote API. Usage is tracked across minute, 10-minute, hour and day
//! windows in a state file shared by all client processes; sustained bursts
//! earn exponentially growing delays that decay after a quiet period.

pub mod config;
pub mod error;
pub mod ratelimit;
