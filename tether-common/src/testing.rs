//! Test logging helpers.
//!
//! Call [`init_test_logging`] once per test binary (typically from a
//! `#[ctor::ctor]` setup function) to get tracing output captured by the
//! test harness. Safe to call multiple times; initialization happens once.
//!
//! # Environment Variables
//!
//! - `TETHER_TEST_LOG_LEVEL`: level filter for tether crates (default: `info`)

use std::sync::Once;
use tracing_subscriber::prelude::*;

static LOGGING_INIT: Once = Once::new();

/// Install a test-writer tracing subscriber for the whole test binary.
pub fn init_test_logging() {
    LOGGING_INIT.call_once(|| {
        let level =
            std::env::var("TETHER_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "tether={level},tether_common={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let subscriber = tracing_subscriber::registry().with(filter).with(stderr_layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
