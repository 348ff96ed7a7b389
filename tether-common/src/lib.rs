//! Shared vocabulary for the Tether chain-health core.
//!
//! The chain under observation is mobile client → relay server → machine
//! daemon → CLI agent. Only the first hop (the relay socket) is directly
//! observable, so everything downstream is verified by active probes issued
//! through the [`protocol::RpcGateway`] seam. This crate holds the types,
//! trait seams, error taxonomy, and configuration shared by the core crate,
//! plus deterministic mocks for tests.

pub mod config;
pub mod errors;
pub mod mock;
pub mod protocol;
pub mod testing;
pub mod types;

pub use config::{ConfigError, ConfigWarning, DispatchConfig, HealthConfig, RetryPolicy, TetherConfig};
pub use errors::{DispatchError, GatewayError, RetryableError};
pub use protocol::{METHOD_MESSAGE, METHOD_PING, METHOD_STATUS, RpcGateway, StateSnapshot};
pub use types::{
    ConnectionState, HealthCheckResult, MachineHealth, MachineId, MachineSnapshot, ProbeKey,
    SendReadiness, SessionHealth, SessionId, SessionSnapshot, SocketStatus,
};
