//! Deterministic in-memory mocks for the gateway and snapshot seams.
//!
//! No sockets are opened; replies are scripted FIFO per (target, method) and
//! every call is recorded for assertions. Artificial latency is expressed via
//! `tokio::time::sleep`, so paused-clock tests advance it deterministically.

use crate::errors::GatewayError;
use crate::protocol::{RpcGateway, StateSnapshot};
use crate::types::{
    MachineId, MachineSnapshot, SessionId, SessionSnapshot, SocketStatus,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded gateway call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub target: String,
    pub method: String,
    pub args: Value,
}

/// A scripted gateway reply, optionally delayed.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub result: Result<Value, GatewayError>,
    pub delay: Option<Duration>,
}

impl ScriptedReply {
    pub fn ok(value: Value) -> Self {
        Self {
            result: Ok(value),
            delay: None,
        }
    }

    pub fn err(error: GatewayError) -> Self {
        Self {
            result: Err(error),
            delay: None,
        }
    }

    #[must_use]
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Default)]
struct MockGatewayInner {
    /// Scripted replies, consumed FIFO per (target, method).
    scripted: Mutex<HashMap<(String, String), VecDeque<ScriptedReply>>>,
    /// Fallback reply when no script matches.
    default_reply: Mutex<ScriptedReplyOrStatusOk>,
    /// Every call received, in order.
    calls: Mutex<Vec<RecordedCall>>,
}

/// Default behavior is a bare `{"status": "ok"}` unless overridden.
enum ScriptedReplyOrStatusOk {
    StatusOk,
    Fixed(ScriptedReply),
}

impl Default for ScriptedReplyOrStatusOk {
    fn default() -> Self {
        Self::StatusOk
    }
}

/// Deterministic scripted mock for [`RpcGateway`].
#[derive(Clone, Default)]
pub struct MockGateway {
    inner: Arc<MockGatewayInner>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scripted reply for (target, method). Replies are consumed
    /// FIFO; when the script runs dry, the default reply applies.
    pub fn push_reply(&self, target: &str, method: &str, reply: ScriptedReply) {
        let mut scripted = self
            .inner
            .scripted
            .lock()
            .expect("scripted mutex poisoned");
        scripted
            .entry((target.to_string(), method.to_string()))
            .or_default()
            .push_back(reply);
    }

    /// Replace the fallback reply used when no script matches.
    pub fn set_default_reply(&self, reply: ScriptedReply) {
        *self
            .inner
            .default_reply
            .lock()
            .expect("default_reply mutex poisoned") = ScriptedReplyOrStatusOk::Fixed(reply);
    }

    /// Snapshot of all calls received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.calls.lock().expect("calls mutex poisoned").clone()
    }

    /// Number of calls received for (target, method).
    pub fn call_count(&self, target: &str, method: &str) -> usize {
        self.inner
            .calls
            .lock()
            .expect("calls mutex poisoned")
            .iter()
            .filter(|c| c.target == target && c.method == method)
            .count()
    }

    fn next_reply(&self, target: &str, method: &str) -> ScriptedReply {
        let mut scripted = self
            .inner
            .scripted
            .lock()
            .expect("scripted mutex poisoned");
        if let Some(queue) = scripted.get_mut(&(target.to_string(), method.to_string()))
            && let Some(reply) = queue.pop_front()
        {
            return reply;
        }
        match &*self
            .inner
            .default_reply
            .lock()
            .expect("default_reply mutex poisoned")
        {
            ScriptedReplyOrStatusOk::StatusOk => ScriptedReply::ok(json!({"status": "ok"})),
            ScriptedReplyOrStatusOk::Fixed(reply) => reply.clone(),
        }
    }
}

#[async_trait]
impl RpcGateway for MockGateway {
    async fn call(&self, target: &str, method: &str, args: Value) -> Result<Value, GatewayError> {
        self.inner
            .calls
            .lock()
            .expect("calls mutex poisoned")
            .push(RecordedCall {
                target: target.to_string(),
                method: method.to_string(),
                args,
            });

        let reply = self.next_reply(target, method);
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.result
    }
}

#[derive(Default)]
struct MockSnapshotState {
    socket: Option<SocketStatus>,
    machines: Vec<(MachineId, MachineSnapshot)>,
    sessions: Vec<(SessionId, SessionSnapshot)>,
}

/// Mutable in-memory stand-in for [`StateSnapshot`].
#[derive(Clone, Default)]
pub struct MockSnapshot {
    state: Arc<Mutex<MockSnapshotState>>,
}

impl MockSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_socket(&self, status: SocketStatus) {
        self.state.lock().expect("snapshot mutex poisoned").socket = Some(status);
    }

    /// Insert or replace a machine entry.
    pub fn put_machine(&self, id: impl Into<String>, snapshot: MachineSnapshot) {
        let id = MachineId::new(id);
        let mut state = self.state.lock().expect("snapshot mutex poisoned");
        state.machines.retain(|(existing, _)| *existing != id);
        state.machines.push((id, snapshot));
    }

    /// Insert or replace a session entry.
    pub fn put_session(&self, id: impl Into<String>, snapshot: SessionSnapshot) {
        let id = SessionId::new(id);
        let mut state = self.state.lock().expect("snapshot mutex poisoned");
        state.sessions.retain(|(existing, _)| *existing != id);
        state.sessions.push((id, snapshot));
    }

    pub fn remove_session(&self, id: &str) {
        let mut state = self.state.lock().expect("snapshot mutex poisoned");
        state.sessions.retain(|(existing, _)| existing.as_str() != id);
    }
}

impl StateSnapshot for MockSnapshot {
    fn socket_status(&self) -> SocketStatus {
        self.state
            .lock()
            .expect("snapshot mutex poisoned")
            .socket
            .unwrap_or(SocketStatus::Disconnected)
    }

    fn machine_by_id(&self, id: &MachineId) -> Option<MachineSnapshot> {
        self.state
            .lock()
            .expect("snapshot mutex poisoned")
            .machines
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, snapshot)| snapshot.clone())
    }

    fn session_by_id(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.state
            .lock()
            .expect("snapshot mutex poisoned")
            .sessions
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, snapshot)| snapshot.clone())
    }

    fn machines(&self) -> Vec<(MachineId, MachineSnapshot)> {
        self.state
            .lock()
            .expect("snapshot mutex poisoned")
            .machines
            .clone()
    }

    fn sessions(&self) -> Vec<(SessionId, SessionSnapshot)> {
        self.state
            .lock()
            .expect("snapshot mutex poisoned")
            .sessions
            .clone()
    }
}
