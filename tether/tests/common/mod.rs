//! Shared fixtures for integration tests.

#![allow(dead_code)] // Each test binary uses a subset of the fixtures.

use std::sync::Arc;
use tether::{Dispatcher, EventBus, HealthMonitor};
use tether_common::config::{DispatchConfig, HealthConfig};
use tether_common::mock::{MockGateway, MockSnapshot};
use tether_common::testing::init_test_logging;
use tether_common::types::{MachineId, MachineSnapshot, SessionSnapshot, SocketStatus};
use tokio::time::Instant;

#[ctor::ctor]
fn setup() {
    init_test_logging();
}

pub struct Harness {
    pub gateway: MockGateway,
    pub snapshot: MockSnapshot,
    pub events: EventBus,
    pub monitor: HealthMonitor,
    pub dispatcher: Dispatcher,
}

pub fn harness() -> Harness {
    harness_with(HealthConfig::default(), DispatchConfig::default())
}

pub fn harness_with(health: HealthConfig, dispatch: DispatchConfig) -> Harness {
    let gateway = MockGateway::new();
    let snapshot = MockSnapshot::new();
    let events = EventBus::default();
    let monitor = HealthMonitor::new(
        Arc::new(gateway.clone()),
        Arc::new(snapshot.clone()),
        health,
        events.clone(),
    );
    let dispatcher = Dispatcher::new(
        Arc::new(gateway.clone()),
        monitor.clone(),
        dispatch,
        events.clone(),
    );
    Harness {
        gateway,
        snapshot,
        events,
        monitor,
        dispatcher,
    }
}

/// Known machine + session with the socket connected: every chain check
/// that relies only on snapshots passes.
pub fn seed_healthy_chain(harness: &Harness, machine: &str, session: &str) {
    harness.snapshot.set_socket(SocketStatus::Connected);
    harness.snapshot.put_machine(
        machine,
        MachineSnapshot {
            active: true,
            active_at: Some(Instant::now()),
        },
    );
    harness.snapshot.put_session(
        session,
        SessionSnapshot {
            active: true,
            active_at: Some(Instant::now()),
            machine_id: MachineId::new(machine),
        },
    );
}
