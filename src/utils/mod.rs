//! Shared helpers: reconnect delay policies and log throttling.

pub mod backoff;
pub mod throttle;

pub use backoff::{exponential_delay, linear_delay};
pub use throttle::LogThrottler;
