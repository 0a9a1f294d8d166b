//! Slack export side of the pipeline: scanning, users, deconstruction, aggregation.

pub mod aggregate;
pub mod deconstruct;
pub mod message;
pub mod scanner;
pub mod users;
