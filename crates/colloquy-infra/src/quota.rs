//! Per-owner generation quota.
//!
//! [`QuotaGate`] counts sends and retries per owner for the lifetime of the
//! process and denies once the configured cap is reached. Counts are not
//! persisted.

use dashmap::DashMap;
use futures_util::future::BoxFuture;

use colloquy_core::gate::{GenerationKind, UsageGate};

/// [`UsageGate`] enforcing `max_generations_per_owner`.
#[derive(Debug)]
pub struct QuotaGate {
    limit: Option<u32>,
    used: DashMap<String, u32>,
}

impl QuotaGate {
    /// `None` means unlimited; usage is still counted.
    pub fn new(limit: Option<u32>) -> Self {
        Self {
            limit,
            used: DashMap::new(),
        }
    }

    /// Generations granted to `owner_id` so far.
    pub fn used(&self, owner_id: &str) -> u32 {
        self.used.get(owner_id).map(|n| *n).unwrap_or(0)
    }

    fn try_consume(&self, owner_id: &str, kind: GenerationKind) -> bool {
        let mut used = self.used.entry(owner_id.to_string()).or_insert(0);
        if let Some(limit) = self.limit {
            if *used >= limit {
                tracing::info!(owner_id, kind = kind.as_str(), limit, "generation quota exhausted");
                return false;
            }
        }
        *used += 1;
        true
    }
}

impl UsageGate for QuotaGate {
    fn allow<'a>(&'a self, owner_id: &'a str, kind: GenerationKind) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.try_consume(owner_id, kind) })
    }

    fn refund(&self, owner_id: &str, kind: GenerationKind) {
        if let Some(mut used) = self.used.get_mut(owner_id) {
            *used = used.saturating_sub(1);
            tracing::debug!(owner_id, kind = kind.as_str(), "generation refunded");
        }
    }
}
