//! Pull counters

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::PullErrorKind;

/// Snapshot of pull counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullStats {
    /// Pull requests received
    pub requests: u64,

    /// Requests satisfied from the local store without transferring content
    pub cache_hits: u64,

    /// Requests that transferred content from a registry
    pub pulls: u64,

    /// Failed requests, by error kind
    pub failures: BTreeMap<String, u64>,
}

/// Metrics collector
#[derive(Debug, Default)]
pub struct PullMetrics {
    stats: Mutex<PullStats>,
}

impl PullMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.stats.lock().requests += 1;
    }

    pub fn record_cache_hit(&self) {
        self.stats.lock().cache_hits += 1;
    }

    pub fn record_pull(&self) {
        self.stats.lock().pulls += 1;
    }

    pub fn record_failure(&self, kind: PullErrorKind) {
        *self
            .stats
            .lock()
            .failures
            .entry(kind.as_str().to_string())
            .or_insert(0) += 1;
    }

    /// Get current counters
    pub fn snapshot(&self) -> PullStats {
        self.stats.lock().clone()
    }
}
