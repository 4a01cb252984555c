//! Usage gate consulted before every generation.
//!
//! The gate only answers allow/deny; quota bookkeeping belongs to the
//! implementation (see `colloquy_infra::quota`).

use futures_util::future::BoxFuture;

/// What kind of generation is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
    Send,
    Retry,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Send => "send",
            GenerationKind::Retry => "retry",
        }
    }
}

/// Decides whether `owner_id` may start another generation.
pub trait UsageGate: Send + Sync {
    fn allow<'a>(&'a self, owner_id: &'a str, kind: GenerationKind) -> BoxFuture<'a, bool>;

    /// Give back a grant whose generation never started.
    fn refund(&self, _owner_id: &str, _kind: GenerationKind) {}
}

/// Gate that never denies.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl UsageGate for AllowAll {
    fn allow<'a>(&'a self, _owner_id: &'a str, _kind: GenerationKind) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
}
