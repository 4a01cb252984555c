//! Inference source abstractions for Colloquy.
//!
//! - `InferenceSource`: RPITIT trait for concrete backends
//! - `BoxInferenceSource`: object-safe wrapper for dynamic dispatch
//! - `ScriptedSource`: deterministic source for tests and demos

pub mod box_provider;
pub mod provider;
pub mod scripted;
