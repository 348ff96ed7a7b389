//! Reliable message dispatch with bounded-retry at-least-once semantics.
//!
//! A send is validated against the chain, attempted under a deadline, and on
//! transient failure parked in a retry queue with exponential backoff. The
//! queue survives reconnection: a socket transition into `connected` replays
//! every queued message immediately, in creation order. Terminal outcomes are
//! returned to the immediate caller and published on the event bus for
//! messages that outlived their original call.

use crate::events::{EventBus, TetherEvent};
use crate::monitor::HealthMonitor;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_common::config::DispatchConfig;
use tether_common::errors::{DispatchError, GatewayError, RetryableError};
use tether_common::protocol::{METHOD_MESSAGE, RpcGateway};
use tether_common::types::{SessionId, SocketStatus};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-call knobs for [`Dispatcher::send_with`].
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Validate the chain before attempting delivery. A failed validation is
    /// terminal for the call: retrying without a healthy chain is wasted work.
    pub validate_connection: bool,
    /// Override the configured retry budget.
    pub max_retries: Option<u32>,
    /// Override the configured per-attempt deadline.
    pub timeout: Option<Duration>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            validate_connection: true,
            max_retries: None,
            timeout: None,
        }
    }
}

/// Outcome of a send call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered within the call.
    Delivered { attempts: u32, latency_ms: u64 },
    /// Parked in the retry queue; the terminal outcome arrives on the event
    /// bus under this id.
    Queued { id: Uuid },
    /// Terminal failure.
    Failed { reason: String },
}

/// A message awaiting retry. Owned exclusively by the dispatcher queue.
#[derive(Debug, Clone)]
struct PendingMessage {
    id: Uuid,
    session_id: SessionId,
    payload: Value,
    /// Scheduled retries consumed so far (1 after the initial failure).
    attempt: u32,
    max_retries: u32,
    send_timeout: Duration,
    created_at: Instant,
    next_retry_at: Instant,
    expires_at: Instant,
    last_error: String,
}

/// Read-only view of a queued message, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub session_id: SessionId,
    pub attempt: u32,
    pub age_ms: u64,
    pub next_retry_in_ms: u64,
    pub expires_in_ms: u64,
}

struct RetryTask {
    shutdown: tokio::sync::watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct DispatcherInner {
    gateway: Arc<dyn RpcGateway>,
    monitor: HealthMonitor,
    config: DispatchConfig,
    events: EventBus,
    queue: Mutex<VecDeque<PendingMessage>>,
    /// Serializes flush passes so a reconnect replay and a ticker scan cannot
    /// interleave their queue rewrites.
    flush_gate: tokio::sync::Mutex<()>,
    last_socket: Mutex<Option<SocketStatus>>,
    retry_task: Mutex<Option<RetryTask>>,
}

/// Dispatcher handle. Cheap to clone; all clones share one queue and one
/// retry-ticker lifecycle.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<dyn RpcGateway>,
        monitor: HealthMonitor,
        config: DispatchConfig,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                gateway,
                monitor,
                config,
                events,
                queue: Mutex::new(VecDeque::new()),
                flush_gate: tokio::sync::Mutex::new(()),
                last_socket: Mutex::new(None),
                retry_task: Mutex::new(None),
            }),
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Start the retry ticker. Idempotent.
    pub fn start(&self) {
        let mut slot = self
            .inner
            .retry_task
            .lock()
            .expect("retry task lock poisoned");
        if let Some(task) = slot.as_ref()
            && !task.handle.is_finished()
        {
            debug!("dispatcher already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let dispatcher = self.clone();
        let tick = self.inner.config.retry_tick;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(tick);
            info!(tick = ?tick, "dispatcher retry loop started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        dispatcher.flush_queue(false).await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("dispatcher retry loop stopping");
                        break;
                    }
                }
            }
        });
        *slot = Some(RetryTask { shutdown, handle });
    }

    /// Stop the retry ticker. Queued messages are retained; they resume when
    /// `start` is called again or a reconnect replay fires.
    pub async fn stop(&self) {
        let task = self
            .inner
            .retry_task
            .lock()
            .expect("retry task lock poisoned")
            .take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            let _ = task.handle.await;
        }
    }

    // ── Sending ────────────────────────────────────────────────────────────

    /// Send with default options (validation on, configured budget).
    pub async fn send(&self, session_id: &SessionId, payload: Value) -> SendOutcome {
        self.send_with(session_id, payload, SendOptions::default())
            .await
    }

    pub async fn send_with(
        &self,
        session_id: &SessionId,
        payload: Value,
        options: SendOptions,
    ) -> SendOutcome {
        let id = Uuid::new_v4();

        if options.validate_connection {
            let readiness = self.inner.monitor.can_send(session_id).await;
            if !readiness.can_send {
                let reason = DispatchError::ChainUnhealthy(
                    readiness
                        .reason
                        .unwrap_or_else(|| "chain unhealthy".to_string()),
                )
                .to_string();
                warn!(%id, session = %session_id, %reason, "send aborted by chain validation");
                self.inner.events.emit(TetherEvent::MessageFailed {
                    id,
                    reason: reason.clone(),
                });
                return SendOutcome::Failed { reason };
            }
        }

        let send_timeout = options.timeout.unwrap_or(self.inner.config.send_timeout);
        let max_retries = options
            .max_retries
            .unwrap_or(self.inner.config.retry.max_retries);

        let start = Instant::now();
        match self.attempt(session_id, &payload, send_timeout).await {
            Ok(()) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                debug!(%id, session = %session_id, latency_ms, "message delivered");
                self.inner
                    .events
                    .emit(TetherEvent::MessageDelivered { id, attempts: 1 });
                SendOutcome::Delivered {
                    attempts: 1,
                    latency_ms,
                }
            }
            Err(err) if err.is_retryable() => {
                self.enqueue(id, session_id.clone(), payload, max_retries, send_timeout, &err)
            }
            Err(err) => {
                let reason = DispatchError::from(err).to_string();
                warn!(%id, session = %session_id, %reason, "message failed permanently");
                self.inner.events.emit(TetherEvent::MessageFailed {
                    id,
                    reason: reason.clone(),
                });
                SendOutcome::Failed { reason }
            }
        }
    }

    async fn attempt(
        &self,
        session_id: &SessionId,
        payload: &Value,
        deadline: Duration,
    ) -> Result<(), GatewayError> {
        match timeout(
            deadline,
            self.inner
                .gateway
                .call(session_id.as_str(), METHOD_MESSAGE, payload.clone()),
        )
        .await
        {
            Ok(Ok(_reply)) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(GatewayError::Timeout(deadline)),
        }
    }

    fn enqueue(
        &self,
        id: Uuid,
        session_id: SessionId,
        payload: Value,
        max_retries: u32,
        send_timeout: Duration,
        err: &GatewayError,
    ) -> SendOutcome {
        let now = Instant::now();
        let delay = self.inner.config.retry.backoff_delay(1);
        let message = PendingMessage {
            id,
            session_id: session_id.clone(),
            payload,
            attempt: 1,
            max_retries,
            send_timeout,
            created_at: now,
            next_retry_at: now + delay,
            expires_at: now + self.inner.config.message_ttl,
            last_error: err.to_string(),
        };

        info!(
            %id,
            session = %session_id,
            error = %err,
            retry_in_ms = delay.as_millis() as u64,
            "transient send failure; message queued"
        );
        self.inner
            .events
            .emit(TetherEvent::MessageQueued { id, session_id });
        self.inner.events.emit(TetherEvent::MessageRetryScheduled {
            id,
            attempt: 1,
            delay_ms: delay.as_millis() as u64,
        });

        self.inner
            .queue
            .lock()
            .expect("queue lock poisoned")
            .push_back(message);
        SendOutcome::Queued { id }
    }

    // ── Queue maintenance ──────────────────────────────────────────────────

    /// Feed socket status transitions into the dispatcher. A transition into
    /// `connected` replays every queued message immediately, in creation
    /// order, bypassing scheduled retry delays.
    pub async fn handle_socket_status(&self, status: SocketStatus) {
        let reconnected = {
            let mut last = self
                .inner
                .last_socket
                .lock()
                .expect("socket status lock poisoned");
            let prev = last.replace(status);
            status == SocketStatus::Connected && prev != Some(SocketStatus::Connected)
        };

        if reconnected {
            let queued = self.queued_len();
            if queued > 0 {
                info!(queued, "socket connected; replaying queued messages");
            }
            self.flush_queue(true).await;
        }
    }

    /// Number of messages currently awaiting retry.
    pub fn queued_len(&self) -> usize {
        self.inner.queue.lock().expect("queue lock poisoned").len()
    }

    /// Diagnostics view of the retry queue, in creation order.
    pub fn queued_snapshot(&self) -> Vec<QueuedMessage> {
        let now = Instant::now();
        self.inner
            .queue
            .lock()
            .expect("queue lock poisoned")
            .iter()
            .map(|m| QueuedMessage {
                id: m.id,
                session_id: m.session_id.clone(),
                attempt: m.attempt,
                age_ms: now.duration_since(m.created_at).as_millis() as u64,
                next_retry_in_ms: m
                    .next_retry_at
                    .saturating_duration_since(now)
                    .as_millis() as u64,
                expires_in_ms: m.expires_at.saturating_duration_since(now).as_millis() as u64,
            })
            .collect()
    }

    /// One pass over the queue: purge expired messages, attempt whatever is
    /// due (or everything, on replay), reschedule transient failures, and
    /// terminate messages that are out of budget.
    async fn flush_queue(&self, replay_all: bool) {
        let _gate = self.inner.flush_gate.lock().await;

        let batch: Vec<PendingMessage> = {
            let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
            std::mem::take(&mut *queue).into()
        };
        if batch.is_empty() {
            return;
        }

        let now = Instant::now();
        let mut survivors: VecDeque<PendingMessage> = VecDeque::new();

        for mut message in batch {
            if now >= message.expires_at {
                let reason = DispatchError::Expired {
                    age: now.duration_since(message.created_at),
                    last_error: message.last_error.clone(),
                }
                .to_string();
                warn!(id = %message.id, %reason, "queued message expired");
                self.inner.events.emit(TetherEvent::MessageFailed {
                    id: message.id,
                    reason,
                });
                continue;
            }
            if !replay_all && now < message.next_retry_at {
                survivors.push_back(message);
                continue;
            }

            debug!(
                id = %message.id,
                session = %message.session_id,
                attempt = message.attempt,
                replay = replay_all,
                "retrying queued message"
            );
            match self
                .attempt(&message.session_id, &message.payload, message.send_timeout)
                .await
            {
                Ok(()) => {
                    let attempts = message.attempt + 1;
                    info!(id = %message.id, attempts, "queued message delivered");
                    self.inner.events.emit(TetherEvent::MessageDelivered {
                        id: message.id,
                        attempts,
                    });
                }
                Err(err) if err.is_retryable() => {
                    message.last_error = err.to_string();
                    if message.attempt >= message.max_retries {
                        let reason = DispatchError::RetriesExhausted {
                            attempts: message.attempt + 1,
                            last_error: message.last_error.clone(),
                        }
                        .to_string();
                        warn!(id = %message.id, %reason, "queued message failed");
                        self.inner.events.emit(TetherEvent::MessageFailed {
                            id: message.id,
                            reason,
                        });
                    } else {
                        message.attempt += 1;
                        let delay = self.inner.config.retry.backoff_delay(message.attempt);
                        message.next_retry_at = Instant::now() + delay;
                        self.inner.events.emit(TetherEvent::MessageRetryScheduled {
                            id: message.id,
                            attempt: message.attempt,
                            delay_ms: delay.as_millis() as u64,
                        });
                        survivors.push_back(message);
                    }
                }
                Err(err) => {
                    let reason = DispatchError::from(err).to_string();
                    warn!(id = %message.id, %reason, "queued message failed permanently");
                    self.inner.events.emit(TetherEvent::MessageFailed {
                        id: message.id,
                        reason,
                    });
                }
            }
        }

        // Anything enqueued while this pass ran is newer than every survivor,
        // so appending preserves creation order.
        let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
        let newcomers = std::mem::take(&mut *queue);
        survivors.extend(newcomers);
        *queue = survivors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use serde_json::json;
    use tether_common::config::HealthConfig;
    use tether_common::mock::{MockGateway, MockSnapshot, ScriptedReply};
    use tether_common::types::{MachineSnapshot, SessionSnapshot};

    fn harness() -> (Dispatcher, MockGateway, MockSnapshot, EventBus) {
        let gateway = MockGateway::new();
        let snapshot = MockSnapshot::new();
        let events = EventBus::default();
        let monitor = HealthMonitor::new(
            Arc::new(gateway.clone()),
            Arc::new(snapshot.clone()),
            HealthConfig::default(),
            events.clone(),
        );
        let dispatcher = Dispatcher::new(
            Arc::new(gateway.clone()),
            monitor,
            DispatchConfig::default(),
            events.clone(),
        );
        (dispatcher, gateway, snapshot, events)
    }

    fn healthy_chain(snapshot: &MockSnapshot) {
        snapshot.set_socket(SocketStatus::Connected);
        snapshot.put_machine(
            "m1",
            MachineSnapshot {
                active: true,
                active_at: Some(Instant::now()),
            },
        );
        snapshot.put_session(
            "s1",
            SessionSnapshot {
                active: true,
                active_at: Some(Instant::now()),
                machine_id: tether_common::types::MachineId::new("m1"),
            },
        );
    }

    fn no_validate() -> SendOptions {
        SendOptions {
            validate_connection: false,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn validated_send_delivers_on_healthy_chain() {
        let (dispatcher, gateway, snapshot, _) = harness();
        healthy_chain(&snapshot);

        let outcome = dispatcher
            .send(&SessionId::new("s1"), json!({"body": "hello"}))
            .await;
        assert!(matches!(outcome, SendOutcome::Delivered { attempts: 1, .. }));
        assert_eq!(gateway.call_count("s1", "message"), 1);
        // Chain validation probed both hops first.
        assert_eq!(gateway.call_count("m1", "ping"), 1);
        assert_eq!(gateway.call_count("s1", "status"), 1);
    }

    #[tokio::test]
    async fn failed_validation_aborts_without_retry() {
        let (dispatcher, gateway, snapshot, _) = harness();
        snapshot.set_socket(SocketStatus::Disconnected);
        healthy_chain(&snapshot);
        snapshot.set_socket(SocketStatus::Disconnected);

        let outcome = dispatcher
            .send(&SessionId::new("s1"), json!({"body": "hello"}))
            .await;
        let SendOutcome::Failed { reason } = outcome else {
            panic!("expected terminal failure");
        };
        assert_eq!(reason, "chain unhealthy: not connected to server");
        assert_eq!(dispatcher.queued_len(), 0);
        assert_eq!(gateway.call_count("s1", "message"), 0);
    }

    #[tokio::test]
    async fn permanent_error_is_terminal_without_retry() {
        let (dispatcher, gateway, _, _) = harness();
        gateway.push_reply(
            "s1",
            "message",
            ScriptedReply::err(GatewayError::Rejected("payload too large".into())),
        );

        let outcome = dispatcher
            .send_with(&SessionId::new("s1"), json!({}), no_validate())
            .await;
        let SendOutcome::Failed { reason } = outcome else {
            panic!("expected terminal failure");
        };
        assert_eq!(reason, "request rejected: payload too large");
        assert_eq!(dispatcher.queued_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_queues_with_first_backoff() {
        let (dispatcher, gateway, _, _) = harness();
        gateway.push_reply(
            "s1",
            "message",
            ScriptedReply::err(GatewayError::Transport("relay hiccup".into())),
        );

        let outcome = dispatcher
            .send_with(&SessionId::new("s1"), json!({}), no_validate())
            .await;
        assert!(matches!(outcome, SendOutcome::Queued { .. }));

        let snapshot = dispatcher.queued_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].attempt, 1);
        assert_eq!(snapshot[0].next_retry_in_ms, 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_classifies_as_transient() {
        let (dispatcher, gateway, _, _) = harness();
        // Reply arrives after the 10s send deadline.
        gateway.push_reply(
            "s1",
            "message",
            ScriptedReply::ok(json!({"status": "ok"})).after(Duration::from_secs(30)),
        );

        let outcome = dispatcher
            .send_with(&SessionId::new("s1"), json!({}), no_validate())
            .await;
        assert!(matches!(outcome, SendOutcome::Queued { .. }));
        let queued = dispatcher.queued_snapshot();
        assert!(queued[0].id != Uuid::nil());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_schedule_doubles_then_fails_on_fourth_failure() {
        let (dispatcher, gateway, _, events) = harness();
        let mut rx = events.subscribe();
        gateway.set_default_reply(ScriptedReply::err(GatewayError::Transport(
            "still down".into(),
        )));
        dispatcher.start();

        let outcome = dispatcher
            .send_with(&SessionId::new("s1"), json!({}), no_validate())
            .await;
        assert!(matches!(outcome, SendOutcome::Queued { .. }));
        assert_eq!(gateway.call_count("s1", "message"), 1);

        // Retry 1 at ~+2s.
        tokio::time::sleep(Duration::from_millis(2300)).await;
        assert_eq!(gateway.call_count("s1", "message"), 2);

        // Retry 2 at ~+4s after that.
        tokio::time::sleep(Duration::from_millis(4300)).await;
        assert_eq!(gateway.call_count("s1", "message"), 3);

        // Retry 3 at ~+8s after that; budget exhausted on its failure.
        tokio::time::sleep(Duration::from_millis(8300)).await;
        assert_eq!(gateway.call_count("s1", "message"), 4);
        assert_eq!(dispatcher.queued_len(), 0);

        let mut failed_reason = None;
        while let Ok(envelope) = rx.try_recv() {
            if let TetherEvent::MessageFailed { reason, .. } = envelope.event {
                failed_reason = Some(reason);
            }
        }
        let reason = failed_reason.expect("terminal failure event");
        assert!(reason.contains("retries exhausted after 4 attempts"));
        assert!(reason.contains("still down"));

        dispatcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn expired_message_is_purged_with_budget_remaining() {
        let (dispatcher, gateway, _, events) = harness();
        let mut rx = events.subscribe();
        gateway.set_default_reply(ScriptedReply::err(GatewayError::Transport(
            "long outage".into(),
        )));
        dispatcher.start();

        let outcome = dispatcher
            .send_with(
                &SessionId::new("s1"),
                json!({}),
                SendOptions {
                    validate_connection: false,
                    max_retries: Some(100),
                    timeout: None,
                },
            )
            .await;
        assert!(matches!(outcome, SendOutcome::Queued { .. }));

        // Well past the 5 minute expiry; retries alone would not have
        // exhausted a budget of 100.
        tokio::time::sleep(Duration::from_secs(310)).await;
        assert_eq!(dispatcher.queued_len(), 0);

        let mut failed_reason = None;
        while let Ok(envelope) = rx.try_recv() {
            if let TetherEvent::MessageFailed { reason, .. } = envelope.event {
                failed_reason = Some(reason);
            }
        }
        let reason = failed_reason.expect("terminal failure event");
        assert!(reason.contains("message expired"));

        dispatcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replays_in_creation_order_without_waiting() {
        let (dispatcher, gateway, _, _) = harness();
        dispatcher
            .handle_socket_status(SocketStatus::Disconnected)
            .await;

        gateway.push_reply(
            "s1",
            "message",
            ScriptedReply::err(GatewayError::Transport("down".into())),
        );
        gateway.push_reply(
            "s2",
            "message",
            ScriptedReply::err(GatewayError::Transport("down".into())),
        );

        dispatcher
            .send_with(&SessionId::new("s1"), json!({"n": 1}), no_validate())
            .await;
        dispatcher
            .send_with(&SessionId::new("s2"), json!({"n": 2}), no_validate())
            .await;
        assert_eq!(dispatcher.queued_len(), 2);

        // Transport recovers; both scripted queues are dry so the default
        // {"status":"ok"} reply applies. No time has passed: the scheduled
        // 2s waits are still pending, and the replay must bypass them.
        dispatcher
            .handle_socket_status(SocketStatus::Connected)
            .await;
        assert_eq!(dispatcher.queued_len(), 0);

        let replays: Vec<String> = gateway
            .calls()
            .iter()
            .filter(|c| c.method == "message")
            .skip(2)
            .map(|c| c.target.clone())
            .collect();
        assert_eq!(replays, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connected_status_does_not_replay_again() {
        let (dispatcher, gateway, _, _) = harness();
        dispatcher
            .handle_socket_status(SocketStatus::Disconnected)
            .await;
        gateway.push_reply(
            "s1",
            "message",
            ScriptedReply::err(GatewayError::Transport("down".into())),
        );
        gateway.set_default_reply(ScriptedReply::err(GatewayError::Transport(
            "still down".into(),
        )));

        dispatcher
            .send_with(&SessionId::new("s1"), json!({}), no_validate())
            .await;

        dispatcher
            .handle_socket_status(SocketStatus::Connected)
            .await;
        let after_replay = gateway.call_count("s1", "message");
        assert_eq!(after_replay, 2);

        // Still connected: no transition, no replay.
        dispatcher
            .handle_socket_status(SocketStatus::Connected)
            .await;
        assert_eq!(gateway.call_count("s1", "message"), after_replay);
    }

    #[tokio::test(start_paused = true)]
    async fn delivered_event_reports_total_attempts() {
        let (dispatcher, gateway, _, events) = harness();
        let mut rx = events.subscribe();
        gateway.push_reply(
            "s1",
            "message",
            ScriptedReply::err(GatewayError::Transport("blip".into())),
        );
        dispatcher.start();

        dispatcher
            .send_with(&SessionId::new("s1"), json!({}), no_validate())
            .await;
        // Default reply succeeds on the first retry.
        tokio::time::sleep(Duration::from_millis(2300)).await;
        assert_eq!(dispatcher.queued_len(), 0);

        let mut delivered = None;
        while let Ok(envelope) = rx.try_recv() {
            if let TetherEvent::MessageDelivered { attempts, .. } = envelope.event {
                delivered = Some(attempts);
            }
        }
        assert_eq!(delivered, Some(2));

        dispatcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_keeps_queue() {
        let (dispatcher, gateway, _, _) = harness();
        gateway.set_default_reply(ScriptedReply::err(GatewayError::Transport(
            "down".into(),
        )));
        dispatcher.start();
        dispatcher.start();

        dispatcher
            .send_with(&SessionId::new("s1"), json!({}), no_validate())
            .await;
        dispatcher.stop().await;
        assert_eq!(dispatcher.queued_len(), 1);

        // Ticker stopped: the 2s retry never fires.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(gateway.call_count("s1", "message"), 1);
    }
}
