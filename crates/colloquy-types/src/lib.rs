//! Shared domain types for Colloquy.
//!
//! This crate contains the core domain types used across the engine:
//! sessions, messages, response variants, stream updates, content flags,
//! configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod moderation;
pub mod stream;
