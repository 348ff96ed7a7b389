//! Keyed, time-bounded memo of probe results with in-flight deduplication.
//!
//! One entry per [`ProbeKey`], overwritten by each completed probe. Failures
//! are cached alongside successes so consumers can distinguish "never
//! checked" from "checked and unhealthy". The pending set enforces the
//! at-most-one-outstanding-probe-per-key invariant; acquisition is a single
//! atomic insert so two concurrent callers can never both win.

use crate::metrics::{HealthMetrics, RecentCheck};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tether_common::types::{HealthCheckResult, ProbeKey};
use tracing::debug;

/// Cap on entries reported in a metrics snapshot.
const RECENT_CHECKS_LIMIT: usize = 32;

/// Probe result cache with category-specific TTLs.
pub struct ProbeCache {
    machine_ttl: Duration,
    session_ttl: Duration,
    entries: RwLock<HashMap<ProbeKey, HealthCheckResult>>,
    pending: Mutex<HashSet<ProbeKey>>,
}

impl ProbeCache {
    pub fn new(machine_ttl: Duration, session_ttl: Duration) -> Self {
        Self {
            machine_ttl,
            session_ttl,
            entries: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
        }
    }

    fn ttl_for(&self, key: &ProbeKey) -> Duration {
        if key.is_machine() {
            self.machine_ttl
        } else {
            self.session_ttl
        }
    }

    /// Cached result for `key` if it is still within its TTL.
    pub fn fresh(&self, key: &ProbeKey) -> Option<HealthCheckResult> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries
            .get(key)
            .filter(|result| result.is_fresh(self.ttl_for(key)))
            .cloned()
    }

    /// Cached result for `key` regardless of freshness. Used by state
    /// derivation, which prefers a stale verdict over re-probing.
    pub fn peek(&self, key: &ProbeKey) -> Option<HealthCheckResult> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.get(key).cloned()
    }

    /// Store a completed probe result, superseding any prior entry.
    pub fn put(&self, key: ProbeKey, result: HealthCheckResult) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(key, result);
    }

    /// Claim the in-flight slot for `key`. Returns `None` when a probe is
    /// already outstanding; the winner gets a guard that releases the slot
    /// on drop, so cleanup happens even if the probe future is dropped.
    pub fn begin_probe(&self, key: &ProbeKey) -> Option<PendingGuard<'_>> {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        if pending.insert(key.clone()) {
            Some(PendingGuard {
                cache: self,
                key: key.clone(),
            })
        } else {
            None
        }
    }

    pub fn is_pending(&self, key: &ProbeKey) -> bool {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .contains(key)
    }

    fn clear_pending(&self, key: &ProbeKey) {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .remove(key);
    }

    /// Drop the cached result for `key`. Pending markers are untouched.
    pub fn invalidate(&self, key: &ProbeKey) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        if entries.remove(key).is_some() {
            debug!(%key, "cache entry invalidated");
        }
    }

    /// Drop every cached result.
    pub fn invalidate_all(&self) {
        self.entries.write().expect("cache lock poisoned").clear();
    }

    /// Forget all in-flight markers. Only for lifecycle teardown; a live
    /// probe's guard will clear its own (now absent) marker harmlessly.
    pub fn clear_pending_all(&self) {
        self.pending.lock().expect("pending lock poisoned").clear();
    }

    /// Diagnostics snapshot: cached totals plus the most recent results.
    pub fn metrics(&self) -> HealthMetrics {
        let entries = self.entries.read().expect("cache lock poisoned");
        let pending_checks = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .len();

        let mut recent: Vec<(&ProbeKey, &HealthCheckResult)> = entries.iter().collect();
        recent.sort_by_key(|(_, result)| std::cmp::Reverse(result.observed_at));
        let recent_checks = recent
            .into_iter()
            .take(RECENT_CHECKS_LIMIT)
            .map(|(key, result)| RecentCheck {
                key: key.to_string(),
                success: result.success,
                latency_ms: result.latency_ms,
                age_ms: result.age().as_millis() as u64,
            })
            .collect();

        HealthMetrics {
            total_cached_checks: entries.len(),
            pending_checks,
            recent_checks,
        }
    }
}

/// Releases a probe key's in-flight slot on drop.
pub struct PendingGuard<'a> {
    cache: &'a ProbeCache,
    key: ProbeKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.cache.clear_pending(&self.key);
    }
}
