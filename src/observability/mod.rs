//! Structured logging setup for the service provider binary.

mod tracing_init;

pub use tracing_init::*;
