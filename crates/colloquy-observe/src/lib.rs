//! Observability for Colloquy: subscriber setup and shared span names.

pub mod attrs;
pub mod tracing_setup;
