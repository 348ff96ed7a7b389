//! Event broadcast for probe and dispatch lifecycle updates.
//!
//! UI layers subscribe to observe terminal delivery outcomes and health
//! transitions without polling. Lagging subscribers lose the oldest events
//! (`tokio::sync::broadcast` semantics).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_common::types::{ProbeKey, SessionId};
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_BUFFER: usize = 256;

/// Lifecycle events emitted by the monitor and dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TetherEvent {
    /// A probe finished and its result was cached.
    ProbeCompleted {
        key: ProbeKey,
        success: bool,
        latency_ms: Option<u64>,
    },
    /// A periodic or forced sweep finished.
    SweepCompleted { probed: usize, failed: usize },
    /// A message failed transiently and entered the retry queue.
    MessageQueued { id: Uuid, session_id: SessionId },
    /// A queued message was scheduled for another attempt.
    MessageRetryScheduled {
        id: Uuid,
        attempt: u32,
        delay_ms: u64,
    },
    /// Terminal success.
    MessageDelivered { id: Uuid, attempts: u32 },
    /// Terminal failure; the reason derives from the last classified error.
    MessageFailed { id: Uuid, reason: String },
}

/// An event plus the wall-clock instant it was emitted.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TetherEvent,
}

/// Broadcast channel for core events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the provided buffer size.
    ///
    /// Note: the effective buffer is clamped to at least `DEFAULT_BUFFER` to
    /// avoid frequent lag/drop behavior for bursty event streams.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1).max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Emit an event; dropped silently when nobody subscribes.
    pub fn emit(&self, event: TetherEvent) {
        let _ = self.sender.send(EventEnvelope {
            timestamp: Utc::now(),
            event,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}
