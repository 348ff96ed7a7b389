//! Common types used across Tether components.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Unique identifier for a machine daemon reachable through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineId(pub String);

impl MachineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an agent session supervised by a machine daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache and in-flight-deduplication key for a probe target.
///
/// A tagged type rather than a prefixed string so a machine id can never
/// collide with an equal session id. The `machine:`/`session:` rendering
/// survives only in `Display` for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ProbeKey {
    Machine(MachineId),
    Session(SessionId),
}

impl ProbeKey {
    pub fn machine(id: impl Into<String>) -> Self {
        Self::Machine(MachineId::new(id))
    }

    pub fn session(id: impl Into<String>) -> Self {
        Self::Session(SessionId::new(id))
    }

    /// The bare target id, without the category tag.
    pub fn target(&self) -> &str {
        match self {
            Self::Machine(id) => id.as_str(),
            Self::Session(id) => id.as_str(),
        }
    }

    pub fn is_machine(&self) -> bool {
        matches!(self, Self::Machine(_))
    }
}

impl std::fmt::Display for ProbeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Machine(id) => write!(f, "machine:{id}"),
            Self::Session(id) => write!(f, "session:{id}"),
        }
    }
}

/// Transport-level status of the relay socket, as reported by the snapshot
/// reader. The socket is the only hop whose state is directly observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketStatus {
    Connected,
    Connecting,
    Disconnected,
    Error,
}

impl std::fmt::Display for SocketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Derived machine-daemon hop verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineHealth {
    Online,
    Offline,
    /// Never probed and no usable activity snapshot.
    Unknown,
}

impl std::fmt::Display for MachineHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Derived agent-session hop verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionHealth {
    Active,
    Inactive,
    /// Never probed and no usable activity snapshot.
    Unknown,
}

impl std::fmt::Display for SessionHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of a single liveness probe.
///
/// Immutable once produced; the next probe for the same key supersedes it
/// wholesale (results are never merged). Failures are kept too, so consumers
/// can distinguish "never checked" from "checked and unhealthy".
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Whether the probed hop answered with a healthy status.
    pub success: bool,
    /// Round-trip latency, present on completed probes.
    pub latency_ms: Option<u64>,
    /// Error message if the probe failed.
    pub error: Option<String>,
    /// When the probe completed.
    pub observed_at: Instant,
}

impl HealthCheckResult {
    pub fn success(latency_ms: u64) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency_ms),
            error: None,
            observed_at: Instant::now(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency_ms: None,
            error: Some(error.into()),
            observed_at: Instant::now(),
        }
    }

    /// Returned to the losing caller when a probe for the same key is already
    /// in flight. Never cached: the in-flight probe will publish the real
    /// result.
    pub fn in_progress() -> Self {
        Self::failure("health check already in progress")
    }

    /// Age of this result relative to now.
    pub fn age(&self) -> std::time::Duration {
        self.observed_at.elapsed()
    }

    pub fn is_fresh(&self, ttl: std::time::Duration) -> bool {
        self.age() < ttl
    }
}

/// Tri-state connectivity verdict, derived on demand and never persisted.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// Transport state of the relay socket.
    pub socket: SocketStatus,
    /// Machine-daemon hop verdict.
    pub machine: MachineHealth,
    /// Agent-session hop verdict.
    pub session: SessionHealth,
    /// Most recent probe consulted, if any probe was consulted at all.
    pub last_verified_at: Option<Instant>,
}

/// Outcome of a pre-send chain validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReadiness {
    pub can_send: bool,
    /// Human-readable reason naming the hop that failed, when blocked.
    pub reason: Option<String>,
}

impl SendReadiness {
    pub fn ok() -> Self {
        Self {
            can_send: true,
            reason: None,
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            can_send: false,
            reason: Some(reason.into()),
        }
    }
}

/// Activity snapshot for a known machine, read from the state store.
#[derive(Debug, Clone)]
pub struct MachineSnapshot {
    /// Whether the state store currently flags the machine active.
    pub active: bool,
    /// Last activity timestamp, if one was ever recorded.
    pub active_at: Option<Instant>,
}

/// Activity snapshot for a known session, read from the state store.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub active: bool,
    pub active_at: Option<Instant>,
    /// Machine daemon that supervises this session.
    pub machine_id: MachineId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn probe_key_display_is_tagged() {
        assert_eq!(ProbeKey::machine("m1").to_string(), "machine:m1");
        assert_eq!(ProbeKey::session("s1").to_string(), "session:s1");
    }

    #[test]
    fn probe_key_machine_and_session_with_equal_ids_differ() {
        let m = ProbeKey::machine("x");
        let s = ProbeKey::session("x");
        assert_ne!(m, s);
        assert_eq!(m.target(), s.target());
    }

    #[test]
    fn health_check_result_success() {
        let result = HealthCheckResult::success(40);
        assert!(result.success);
        assert_eq!(result.latency_ms, Some(40));
        assert!(result.error.is_none());
    }

    #[test]
    fn health_check_result_failure_keeps_error() {
        let result = HealthCheckResult::failure("connection refused");
        assert!(!result.success);
        assert!(result.latency_ms.is_none());
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_result_freshness() {
        let result = HealthCheckResult::success(5);
        assert!(result.is_fresh(Duration::from_secs(10)));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!result.is_fresh(Duration::from_secs(10)));
    }

    #[test]
    fn socket_status_serializes_snake_case() {
        let json = serde_json::to_string(&SocketStatus::Disconnected).unwrap();
        assert_eq!(json, "\"disconnected\"");
    }

    #[test]
    fn send_readiness_ctors() {
        assert!(SendReadiness::ok().can_send);
        let blocked = SendReadiness::blocked("not connected to server");
        assert!(!blocked.can_send);
        assert_eq!(blocked.reason.as_deref(), Some("not connected to server"));
    }
}
