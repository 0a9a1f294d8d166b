//! Core domain + pipeline for rebuilding a Slack export on Discord.
//!
//! This crate is framework-agnostic. The target platform lives behind
//! [`messaging::port::TargetPort`], implemented in adapter crates.

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod errors;
pub mod export;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod progress;
pub mod reconstruct;
pub mod run;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
