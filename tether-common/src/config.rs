//! Configuration for the health monitor and dispatcher.
//!
//! Defaults mirror the behavior of the deployed system; a TOML file and a
//! small set of environment variables can override them. Validation produces
//! warnings rather than hard failures so a misconfigured client still starts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Machine probe results stay fresh for this long.
const DEFAULT_MACHINE_TTL: Duration = Duration::from_secs(10);

/// Session probe results stay fresh for this long.
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15);

/// Interval between periodic sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Per-check wait bound inside a sweep. An overrun counts as a failed sweep
/// outcome but does not cancel the underlying RPC.
const DEFAULT_SWEEP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot activity window within which a machine counts as recently active.
const DEFAULT_MACHINE_ACTIVITY_WINDOW: Duration = Duration::from_secs(60);

/// Snapshot activity window within which a session counts as recently active.
const DEFAULT_SESSION_ACTIVITY_WINDOW: Duration = Duration::from_secs(120);

/// Upper bound on machines probed per sweep.
const DEFAULT_SWEEP_MAX_MACHINES: usize = 3;

/// Upper bound on sessions probed per sweep.
const DEFAULT_SWEEP_MAX_SESSIONS: usize = 3;

/// Deadline for a single send attempt.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Queued messages expire this long after creation.
const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(300);

/// How often the dispatcher scans the queue for due retries.
const DEFAULT_RETRY_TICK: Duration = Duration::from_millis(250);

/// Maximum scheduled retries per message.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// First retry delay; doubles per attempt (2s, 4s, 8s, ...).
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Cap on the doubling retry delay.
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

/// Health monitor configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Freshness window for cached machine probe results.
    pub machine_ttl: Duration,
    /// Freshness window for cached session probe results.
    pub session_ttl: Duration,
    /// Interval between periodic sweeps.
    pub sweep_interval: Duration,
    /// Per-check wait bound inside a sweep.
    pub sweep_probe_timeout: Duration,
    /// Activity window for the machine snapshot fallback heuristic.
    pub machine_activity_window: Duration,
    /// Activity window for the session snapshot fallback heuristic.
    pub session_activity_window: Duration,
    /// Machines probed per sweep, at most.
    pub sweep_max_machines: usize,
    /// Sessions probed per sweep, at most.
    pub sweep_max_sessions: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            machine_ttl: DEFAULT_MACHINE_TTL,
            session_ttl: DEFAULT_SESSION_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_probe_timeout: DEFAULT_SWEEP_PROBE_TIMEOUT,
            machine_activity_window: DEFAULT_MACHINE_ACTIVITY_WINDOW,
            session_activity_window: DEFAULT_SESSION_ACTIVITY_WINDOW,
            sweep_max_machines: DEFAULT_SWEEP_MAX_MACHINES,
            sweep_max_sessions: DEFAULT_SWEEP_MAX_SESSIONS,
        }
    }
}

/// Retry policy with exponential backoff and optional jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum scheduled retries per message.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Cap on the doubling delay.
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) applied to the delay. Zero keeps the
    /// documented 2s/4s/8s schedule exact.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay for a given retry attempt (1-based): `base * 2^(n-1)`,
    /// capped at `max_delay`, with optional jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_secs = self.base_delay.as_secs_f64();
        let max_secs = self.max_delay.as_secs_f64().max(0.0);

        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1)) as f64;
        let mut delay = (base_secs * multiplier).min(max_secs);

        if self.jitter > 0.0 && delay > 0.0 {
            let jitter = (rand::random::<f64>() * 2.0 - 1.0) * self.jitter;
            delay = (delay * (1.0 + jitter)).max(0.0);
        }

        Duration::from_secs_f64(delay)
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Deadline for a single send attempt.
    pub send_timeout: Duration,
    /// Queued messages expire this long after creation.
    pub message_ttl: Duration,
    /// Queue scan interval for due retries.
    pub retry_tick: Duration,
    /// Retry/backoff policy.
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
            message_ttl: DEFAULT_MESSAGE_TTL,
            retry_tick: DEFAULT_RETRY_TICK,
            retry: RetryPolicy::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct TetherConfig {
    pub health: HealthConfig,
    pub dispatch: DispatchConfig,
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: {message}")]
    Env { var: String, message: String },
}

/// A non-fatal configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

impl TetherConfig {
    /// Load configuration: file (explicit path, or the default location if it
    /// exists), then environment overrides. Missing files fall back to
    /// defaults; a present-but-broken file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(file.into_config())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(d) = env_duration("TETHER_SWEEP_INTERVAL")? {
            self.health.sweep_interval = d;
        }
        if let Some(d) = env_duration("TETHER_SEND_TIMEOUT")? {
            self.dispatch.send_timeout = d;
        }
        if let Some(d) = env_duration("TETHER_MESSAGE_TTL")? {
            self.dispatch.message_ttl = d;
        }
        if let Some(raw) = std::env::var_os("TETHER_MAX_RETRIES") {
            let raw = raw.to_string_lossy();
            let parsed = raw.parse::<u32>().map_err(|e| ConfigError::Env {
                var: "TETHER_MAX_RETRIES".into(),
                message: e.to_string(),
            })?;
            self.dispatch.retry.max_retries = parsed;
        }
        Ok(())
    }

    /// Sanity-check the configuration, logging and returning warnings.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |field: &str, message: String| {
            warn!(field, %message, "config warning");
            warnings.push(ConfigWarning {
                field: field.to_string(),
                message,
            });
        };

        if self.health.sweep_interval < Duration::from_secs(5) {
            push(
                "health.sweep_interval",
                format!(
                    "sweep interval {:?} is aggressive; every sweep issues up to {} probes",
                    self.health.sweep_interval,
                    self.health.sweep_max_machines + self.health.sweep_max_sessions
                ),
            );
        }
        if self.health.machine_ttl >= self.health.machine_activity_window {
            push(
                "health.machine_ttl",
                "machine TTL is not shorter than the activity window; cached verdicts will mask snapshot staleness".into(),
            );
        }
        if !(0.0..=1.0).contains(&self.dispatch.retry.jitter) {
            push(
                "dispatch.retry.jitter",
                format!("jitter {} outside 0.0-1.0", self.dispatch.retry.jitter),
            );
        }
        if self.dispatch.retry.base_delay > self.dispatch.message_ttl {
            push(
                "dispatch.retry.base_delay",
                "first retry is scheduled past message expiry; nothing will ever be retried".into(),
            );
        }
        if self.dispatch.retry_tick > self.dispatch.retry.base_delay {
            push(
                "dispatch.retry_tick",
                "queue scan interval exceeds the first retry delay; retries will fire late".into(),
            );
        }
        warnings
    }
}

fn env_duration(var: &str) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => humantime::parse_duration(raw.trim())
            .map(Some)
            .map_err(|e| ConfigError::Env {
                var: var.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// Default config location: `<config dir>/tether/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tether").join("config.toml"))
}

// ── File model ─────────────────────────────────────────────────────────────
//
// Durations are plain seconds/milliseconds in the file, converted on load.

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    health: HealthSection,
    #[serde(default)]
    dispatch: DispatchSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HealthSection {
    machine_ttl_secs: Option<u64>,
    session_ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    sweep_probe_timeout_secs: Option<u64>,
    machine_activity_window_secs: Option<u64>,
    session_activity_window_secs: Option<u64>,
    sweep_max_machines: Option<usize>,
    sweep_max_sessions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DispatchSection {
    send_timeout_secs: Option<u64>,
    message_ttl_secs: Option<u64>,
    retry_tick_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_secs: Option<u64>,
    retry_jitter: Option<f64>,
}

impl ConfigFile {
    fn into_config(self) -> TetherConfig {
        let mut config = TetherConfig::default();
        let h = self.health;
        if let Some(v) = h.machine_ttl_secs {
            config.health.machine_ttl = Duration::from_secs(v);
        }
        if let Some(v) = h.session_ttl_secs {
            config.health.session_ttl = Duration::from_secs(v);
        }
        if let Some(v) = h.sweep_interval_secs {
            config.health.sweep_interval = Duration::from_secs(v);
        }
        if let Some(v) = h.sweep_probe_timeout_secs {
            config.health.sweep_probe_timeout = Duration::from_secs(v);
        }
        if let Some(v) = h.machine_activity_window_secs {
            config.health.machine_activity_window = Duration::from_secs(v);
        }
        if let Some(v) = h.session_activity_window_secs {
            config.health.session_activity_window = Duration::from_secs(v);
        }
        if let Some(v) = h.sweep_max_machines {
            config.health.sweep_max_machines = v;
        }
        if let Some(v) = h.sweep_max_sessions {
            config.health.sweep_max_sessions = v;
        }

        let d = self.dispatch;
        if let Some(v) = d.send_timeout_secs {
            config.dispatch.send_timeout = Duration::from_secs(v);
        }
        if let Some(v) = d.message_ttl_secs {
            config.dispatch.message_ttl = Duration::from_secs(v);
        }
        if let Some(v) = d.retry_tick_ms {
            config.dispatch.retry_tick = Duration::from_millis(v);
        }
        if let Some(v) = d.max_retries {
            config.dispatch.retry.max_retries = v;
        }
        if let Some(v) = d.retry_base_delay_ms {
            config.dispatch.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = d.retry_max_delay_secs {
            config.dispatch.retry.max_delay = Duration::from_secs(v);
        }
        if let Some(v) = d.retry_jitter {
            config.dispatch.retry.jitter = v;
        }
        config
    }
}
