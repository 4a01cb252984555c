//! Infrastructure layer for Colloquy.
//!
//! Contains implementations of the ports defined in `colloquy-core`: the
//! SQLite chat repository, the OpenAI-compatible inference source, the
//! per-owner quota gate, and the `config.toml` loader.

pub mod config;
pub mod llm;
pub mod quota;
pub mod sqlite;
