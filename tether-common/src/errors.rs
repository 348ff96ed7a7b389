//! Error taxonomy for gateway calls and message dispatch.
//!
//! Classification drives retry behavior: transient network/timeout errors are
//! retryable with exponential backoff, protocol rejections and malformed
//! payloads are permanent, and failed pre-send chain validation is permanent
//! for that attempt (retrying without a healthy chain is wasted work).

use std::time::Duration;
use thiserror::Error;

/// Errors that can be retried.
pub trait RetryableError {
    /// Whether this error should be retried after backoff.
    fn is_retryable(&self) -> bool;
}

/// Failure surfaced by the RPC gateway for a single call.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The call did not complete within its deadline. The underlying RPC may
    /// still be in flight; callers treat this like a transport error.
    #[error("rpc timed out after {0:?}")]
    Timeout(Duration),

    /// Network-level failure (socket drop, relay unreachable, daemon gone).
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote end explicitly rejected the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The reply arrived but did not match the expected wire shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RetryableError for GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Rejected(_) | Self::Malformed(_) => false,
        }
    }
}

/// Terminal failure of a dispatched message.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Pre-send chain validation failed; the reason names the broken hop.
    #[error("chain unhealthy: {0}")]
    ChainUnhealthy(String),

    /// The last send attempt failed with a gateway error.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Retry budget exhausted; carries the last classified error.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The message sat in the queue past its expiry deadline.
    #[error("message expired after {age:?}: {last_error}")]
    Expired { age: Duration, last_error: String },
}

impl RetryableError for DispatchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(err) => err.is_retryable(),
            Self::ChainUnhealthy(_) | Self::RetriesExhausted { .. } | Self::Expired { .. } => false,
        }
    }
}
