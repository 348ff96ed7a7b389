//! Connection health monitoring across the relay → daemon → agent chain.
//!
//! Transport connectivity only proves the first hop, so the monitor issues
//! active probes through the RPC gateway to verify the machine daemon and the
//! agent session behind it, caches every outcome, and derives a tri-state
//! connectivity verdict on demand. A periodic sweep keeps verdicts warm for
//! recently active targets.

use crate::cache::ProbeCache;
use crate::events::{EventBus, TetherEvent};
use crate::metrics::HealthMetrics;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tether_common::config::HealthConfig;
use tether_common::protocol::{
    METHOD_PING, METHOD_STATUS, PingResponse, RpcGateway, StateSnapshot, StatusResponse,
};
use tether_common::types::{
    ConnectionState, HealthCheckResult, MachineHealth, MachineId, ProbeKey, SendReadiness,
    SessionHealth, SessionId, SocketStatus,
};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, interval, timeout};
use tracing::{debug, info, warn};

/// Outcome counts for one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    /// Targets probed this pass.
    pub probed: usize,
    /// Probes that failed or exceeded the per-check bound.
    pub failed: usize,
}

struct SweepTask {
    shutdown: tokio::sync::watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct MonitorInner {
    gateway: Arc<dyn RpcGateway>,
    snapshot: Arc<dyn StateSnapshot>,
    config: HealthConfig,
    cache: ProbeCache,
    events: EventBus,
    sweep_task: Mutex<Option<SweepTask>>,
}

/// Health monitor handle. Cheap to clone; all clones share one cache, one
/// in-flight probe set, and one sweep lifecycle.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(
        gateway: Arc<dyn RpcGateway>,
        snapshot: Arc<dyn StateSnapshot>,
        config: HealthConfig,
        events: EventBus,
    ) -> Self {
        let cache = ProbeCache::new(config.machine_ttl, config.session_ttl);
        Self {
            inner: Arc::new(MonitorInner {
                gateway,
                snapshot,
                config,
                cache,
                events,
                sweep_task: Mutex::new(None),
            }),
        }
    }

    /// The probe cache backing this monitor.
    pub fn cache(&self) -> &ProbeCache {
        &self.inner.cache
    }

    /// Diagnostics snapshot of the probe cache.
    pub fn health_metrics(&self) -> HealthMetrics {
        self.inner.cache.metrics()
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Start the periodic sweep. Idempotent: calling `start` while the sweep
    /// task is alive is a no-op. The first sweep fires immediately.
    pub fn start(&self) {
        let mut slot = self
            .inner
            .sweep_task
            .lock()
            .expect("sweep task lock poisoned");
        if let Some(task) = slot.as_ref()
            && !task.handle.is_finished()
        {
            debug!("health monitor already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let monitor = self.clone();
        let sweep_interval = self.inner.config.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            info!(interval = ?sweep_interval, "health monitor started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.sweep_once().await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("health monitor stopping");
                        break;
                    }
                }
            }
        });
        *slot = Some(SweepTask { shutdown, handle });
    }

    /// Stop the sweep and drop all cached results and pending markers.
    /// Idempotent.
    pub async fn stop(&self) {
        let task = self
            .inner
            .sweep_task
            .lock()
            .expect("sweep task lock poisoned")
            .take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            let _ = task.handle.await;
        }
        self.inner.cache.invalidate_all();
        self.inner.cache.clear_pending_all();
    }

    // ── Probing ────────────────────────────────────────────────────────────

    /// Verify the machine daemon hop. A fresh cached result short-circuits;
    /// a concurrent probe for the same machine yields an immediate
    /// "check in progress" failure without touching the gateway.
    pub async fn verify_machine(&self, id: &MachineId) -> HealthCheckResult {
        self.verify(ProbeKey::Machine(id.clone())).await
    }

    /// Verify the agent session hop. Same contract as [`verify_machine`],
    /// with the session TTL.
    ///
    /// [`verify_machine`]: Self::verify_machine
    pub async fn verify_session(&self, id: &SessionId) -> HealthCheckResult {
        self.verify(ProbeKey::Session(id.clone())).await
    }

    async fn verify(&self, key: ProbeKey) -> HealthCheckResult {
        if let Some(hit) = self.inner.cache.fresh(&key) {
            debug!(%key, age_ms = hit.age().as_millis() as u64, "probe cache hit");
            return hit;
        }
        let Some(_pending) = self.inner.cache.begin_probe(&key) else {
            debug!(%key, "probe already in flight");
            return HealthCheckResult::in_progress();
        };

        let result = self.probe(&key).await;
        self.inner.cache.put(key.clone(), result.clone());
        self.inner.events.emit(TetherEvent::ProbeCompleted {
            key: key.clone(),
            success: result.success,
            latency_ms: result.latency_ms,
        });

        if result.success {
            debug!(%key, latency_ms = result.latency_ms, "probe succeeded");
        } else {
            warn!(%key, error = result.error.as_deref(), "probe failed");
        }
        result
    }

    /// Issue the liveness RPC for one target and classify the reply. The
    /// gateway owns the RPC deadline; an overrun surfaces here as a timeout
    /// error and is classified like any other transport failure.
    async fn probe(&self, key: &ProbeKey) -> HealthCheckResult {
        let method = if key.is_machine() {
            METHOD_PING
        } else {
            METHOD_STATUS
        };
        let start = Instant::now();

        match self.inner.gateway.call(key.target(), method, json!({})).await {
            Ok(value) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                let healthy = if key.is_machine() {
                    PingResponse::parse(value).map(|r| (r.is_healthy(), r.status))
                } else {
                    StatusResponse::parse(value).map(|r| (r.is_healthy(), r.status))
                };
                match healthy {
                    Ok((true, _)) => HealthCheckResult::success(latency_ms),
                    Ok((false, status)) => {
                        HealthCheckResult::failure(format!("unexpected {method} status: {status}"))
                    }
                    Err(err) => HealthCheckResult::failure(err.to_string()),
                }
            }
            Err(err) => HealthCheckResult::failure(err.to_string()),
        }
    }

    // ── Derived state ──────────────────────────────────────────────────────

    /// Derive the tri-state connectivity verdict. Pure and synchronous: reads
    /// the cache and the snapshot, never issues I/O.
    pub fn connection_state(
        &self,
        machine_id: Option<&MachineId>,
        session_id: Option<&SessionId>,
    ) -> ConnectionState {
        let socket = self.inner.snapshot.socket_status();
        let mut last_verified_at: Option<Instant> = None;
        let mut note_verified = |at: Instant| {
            last_verified_at = Some(last_verified_at.map_or(at, |prev| prev.max(at)));
        };

        let machine = match machine_id {
            None => MachineHealth::Unknown,
            Some(id) => {
                if let Some(result) = self.inner.cache.peek(&ProbeKey::Machine(id.clone())) {
                    note_verified(result.observed_at);
                    if result.success {
                        MachineHealth::Online
                    } else {
                        MachineHealth::Offline
                    }
                } else {
                    match self.inner.snapshot.machine_by_id(id) {
                        Some(snap) => {
                            let recent = snap.active
                                && snap.active_at.is_some_and(|at| {
                                    at.elapsed() < self.inner.config.machine_activity_window
                                });
                            if recent {
                                MachineHealth::Online
                            } else {
                                MachineHealth::Offline
                            }
                        }
                        None => MachineHealth::Unknown,
                    }
                }
            }
        };

        let session = match session_id {
            None => SessionHealth::Unknown,
            Some(id) => {
                if let Some(result) = self.inner.cache.peek(&ProbeKey::Session(id.clone())) {
                    note_verified(result.observed_at);
                    if result.success {
                        SessionHealth::Active
                    } else {
                        SessionHealth::Inactive
                    }
                } else {
                    match self.inner.snapshot.session_by_id(id) {
                        Some(snap) => {
                            let recent = snap.active
                                && snap.active_at.is_some_and(|at| {
                                    at.elapsed() < self.inner.config.session_activity_window
                                });
                            if recent {
                                SessionHealth::Active
                            } else {
                                SessionHealth::Inactive
                            }
                        }
                        None => SessionHealth::Unknown,
                    }
                }
            }
        };

        ConnectionState {
            socket,
            machine,
            session,
            last_verified_at,
        }
    }

    /// Ordered pre-send chain validation: session resolution, then socket,
    /// then machine probe, then session probe. Cheap local checks run before
    /// any RPC, and the first failure short-circuits.
    pub async fn can_send(&self, session_id: &SessionId) -> SendReadiness {
        let Some(session) = self.inner.snapshot.session_by_id(session_id) else {
            return SendReadiness::blocked("session or machine not found");
        };
        let machine_id = session.machine_id;
        if self.inner.snapshot.machine_by_id(&machine_id).is_none() {
            return SendReadiness::blocked("session or machine not found");
        }

        if self.inner.snapshot.socket_status() != SocketStatus::Connected {
            return SendReadiness::blocked("not connected to server");
        }

        let machine = self.verify_machine(&machine_id).await;
        if !machine.success {
            return SendReadiness::blocked(format!(
                "machine offline: {}",
                machine.error.as_deref().unwrap_or("unreachable")
            ));
        }

        let session = self.verify_session(session_id).await;
        if !session.success {
            return SendReadiness::blocked(format!(
                "session inactive: {}",
                session.error.as_deref().unwrap_or("unresponsive")
            ));
        }

        SendReadiness::ok()
    }

    /// Invalidate the named cache entries and re-probe them immediately.
    /// With no arguments, drop everything and run a full sweep.
    pub async fn force_refresh(
        &self,
        machine_id: Option<&MachineId>,
        session_id: Option<&SessionId>,
    ) {
        if machine_id.is_none() && session_id.is_none() {
            info!("force refresh: all targets");
            self.inner.cache.invalidate_all();
            self.sweep_once().await;
            return;
        }
        if let Some(id) = machine_id {
            self.inner.cache.invalidate(&ProbeKey::Machine(id.clone()));
            self.verify_machine(id).await;
        }
        if let Some(id) = session_id {
            self.inner.cache.invalidate(&ProbeKey::Session(id.clone()));
            self.verify_session(id).await;
        }
    }

    // ── Sweep ──────────────────────────────────────────────────────────────

    /// Probe up to `sweep_max_machines` recently active machines and up to
    /// `sweep_max_sessions` recently active sessions, concurrently. Each
    /// check's wait is bounded: an overrun counts as a failed outcome but the
    /// underlying probe keeps running and still publishes its result.
    pub async fn sweep_once(&self) -> SweepSummary {
        let machines: Vec<MachineId> = self
            .inner
            .snapshot
            .machines()
            .into_iter()
            .filter(|(_, snap)| {
                snap.active
                    || snap
                        .active_at
                        .is_some_and(|at| at.elapsed() < self.inner.config.machine_activity_window)
            })
            .map(|(id, _)| id)
            .take(self.inner.config.sweep_max_machines)
            .collect();

        let sessions: Vec<SessionId> = self
            .inner
            .snapshot
            .sessions()
            .into_iter()
            .filter(|(_, snap)| {
                let recently_active = snap.active
                    || snap
                        .active_at
                        .is_some_and(|at| at.elapsed() < self.inner.config.session_activity_window);
                recently_active && self.inner.snapshot.machine_by_id(&snap.machine_id).is_some()
            })
            .map(|(id, _)| id)
            .take(self.inner.config.sweep_max_sessions)
            .collect();

        let bound = self.inner.config.sweep_probe_timeout;
        let mut checks: JoinSet<bool> = JoinSet::new();

        for id in machines {
            let monitor = self.clone();
            checks.spawn(async move {
                let probe = tokio::spawn({
                    let monitor = monitor.clone();
                    let id = id.clone();
                    async move { monitor.verify_machine(&id).await }
                });
                match timeout(bound, probe).await {
                    Ok(Ok(result)) => result.success,
                    Ok(Err(_)) => false,
                    Err(_) => {
                        warn!(machine = %id, bound = ?bound, "sweep check exceeded bound");
                        false
                    }
                }
            });
        }
        for id in sessions {
            let monitor = self.clone();
            checks.spawn(async move {
                let probe = tokio::spawn({
                    let monitor = monitor.clone();
                    let id = id.clone();
                    async move { monitor.verify_session(&id).await }
                });
                match timeout(bound, probe).await {
                    Ok(Ok(result)) => result.success,
                    Ok(Err(_)) => false,
                    Err(_) => {
                        warn!(session = %id, bound = ?bound, "sweep check exceeded bound");
                        false
                    }
                }
            });
        }

        let mut summary = SweepSummary {
            probed: 0,
            failed: 0,
        };
        while let Some(outcome) = checks.join_next().await {
            summary.probed += 1;
            if !outcome.unwrap_or(false) {
                summary.failed += 1;
            }
        }

        debug!(
            probed = summary.probed,
            failed = summary.failed,
            "sweep completed"
        );
        self.inner.events.emit(TetherEvent::SweepCompleted {
            probed: summary.probed,
            failed: summary.failed,
        });
        summary
    }
}
