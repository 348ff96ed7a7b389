//! Diagnostics snapshot types for the health cache.

use serde::Serialize;

/// Point-in-time view of the probe cache, for status surfaces and debugging.
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    /// Cached results, fresh or stale.
    pub total_cached_checks: usize,
    /// Probes currently in flight.
    pub pending_checks: usize,
    /// Most recent results, newest first.
    pub recent_checks: Vec<RecentCheck>,
}

/// One cached probe result, aged relative to snapshot time.
#[derive(Debug, Clone, Serialize)]
pub struct RecentCheck {
    /// Rendered probe key (`machine:<id>` / `session:<id>`).
    pub key: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub age_ms: u64,
}
