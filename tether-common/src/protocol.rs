//! Trait seams and wire shapes for the hops the core cannot own.
//!
//! The RPC transport and the state store are external collaborators. The core
//! consumes them through [`RpcGateway`] and [`StateSnapshot`] so deterministic
//! mocks can stand in during tests.

use crate::errors::GatewayError;
use crate::types::{MachineId, MachineSnapshot, SessionId, SessionSnapshot, SocketStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Daemon liveness probe method.
pub const METHOD_PING: &str = "ping";
/// Agent/session liveness probe method.
pub const METHOD_STATUS: &str = "status";
/// Message delivery method consumed by the dispatcher.
pub const METHOD_MESSAGE: &str = "message";

/// RPC primitive exposed by the transport layer.
///
/// One generic `call` covers both the daemon hop and the agent/session hop;
/// the target id addresses whichever end the method is meant for. The gateway
/// owns its own deadlines and reports overruns as [`GatewayError::Timeout`].
#[async_trait]
pub trait RpcGateway: Send + Sync {
    async fn call(&self, target: &str, method: &str, args: Value) -> Result<Value, GatewayError>;
}

/// Synchronous read access to socket status and known machine/session
/// activity. Backed by whatever state store the application uses; the core
/// never mutates it.
pub trait StateSnapshot: Send + Sync {
    fn socket_status(&self) -> SocketStatus;

    fn machine_by_id(&self, id: &MachineId) -> Option<MachineSnapshot>;

    fn session_by_id(&self, id: &SessionId) -> Option<SessionSnapshot>;

    /// All machines the state store currently knows about.
    fn machines(&self) -> Vec<(MachineId, MachineSnapshot)>;

    /// All sessions the state store currently knows about.
    fn sessions(&self) -> Vec<(SessionId, SessionSnapshot)>;
}

/// Reply to `call(machine_id, "ping", {})`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
}

impl PingResponse {
    /// A daemon is healthy only on an exact `"ok"`.
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }

    pub fn parse(value: Value) -> Result<Self, GatewayError> {
        serde_json::from_value(value).map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}

/// Reply to `call(session_id, "status", {})`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    /// Sessions report `"ok"` while busy and `"ready"` while idle; both count
    /// as healthy.
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "ready")
    }

    pub fn parse(value: Value) -> Result<Self, GatewayError> {
        serde_json::from_value(value).map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}
