//! Infrastructure adapters and runtime bootstrap.

pub mod counters;
pub mod error;
pub mod http;
pub mod telemetry;
