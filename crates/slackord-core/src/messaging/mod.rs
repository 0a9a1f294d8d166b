//! Target-platform abstractions (Discord today; the port stays platform-neutral).

pub mod port;
pub mod throttled;
pub mod types;
