//! Business logic and repository trait definitions for Colloquy.
//!
//! This crate defines the "ports" (repository, inference source, usage gate,
//! moderation) that the infrastructure layer implements, plus the session
//! store, stream ingestor, response versioning and `ChatService`. It depends
//! only on `colloquy-types` -- never on `colloquy-infra` or any database/IO
//! crate.

pub mod chat;
pub mod gate;
pub mod llm;
pub mod moderation;
