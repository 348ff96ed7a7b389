//! Tether — chain-health inference and reliable message dispatch.
//!
//! A mobile client reaches its command-execution agent through two
//! intermediary hops: a relay server and a machine-resident daemon that
//! supervises the agent process. Only the relay socket is directly
//! observable, so the [`HealthMonitor`] actively probes the downstream hops,
//! caches and deduplicates results, and derives a tri-state connectivity
//! verdict. The [`Dispatcher`] builds at-least-once delivery on top of it:
//! pre-send chain validation, bounded retries with exponential backoff, and
//! immediate replay of the queue when the socket reconnects.
//!
//! Wiring happens at the application's composition root; there is no global
//! instance:
//!
//! ```ignore
//! let events = EventBus::default();
//! let monitor = HealthMonitor::new(gateway.clone(), snapshot, config.health, events.clone());
//! let dispatcher = Dispatcher::new(gateway, monitor.clone(), config.dispatch, events.clone());
//! monitor.start();
//! dispatcher.start();
//! // feed transport status changes: dispatcher.handle_socket_status(status).await
//! ```

pub mod cache;
pub mod dispatcher;
pub mod events;
pub mod metrics;
pub mod monitor;

pub use cache::ProbeCache;
pub use dispatcher::{Dispatcher, QueuedMessage, SendOptions, SendOutcome};
pub use events::{EventBus, EventEnvelope, TetherEvent};
pub use metrics::{HealthMetrics, RecentCheck};
pub use monitor::{HealthMonitor, SweepSummary};

pub use tether_common as common;
