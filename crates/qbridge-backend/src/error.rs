//! Error types for the backend façade.

use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors surfaced by the backend façade.
///
/// Validation errors (`Invalid*`, `Unknown*`, `Unsupported*`) are never
/// retried; they indicate bad caller input. `NotConnected` and
/// `MalformedEndpoint` are usage errors. Scheduler and transport failures
/// are wrapped from the lower layers unchanged.
#[derive(Error, Debug)]
pub enum BackendError {
    /// An operation needing a live connection was called while
    /// disconnected.
    #[error("not connected to the server")]
    NotConnected,

    /// The runtime service was asked for a backend it does not provide.
    #[error("backend unknown: {0}")]
    UnknownBackend(String),

    /// The configured or resolved endpoint does not parse as
    /// `tcp://<ipv4>:<port>`.
    #[error("no ip:port recovered from endpoint '{0}'")]
    MalformedEndpoint(String),

    /// Optimization level outside `{0, 1, 2}`.
    #[error("{0}: not a valid optimization level (expected 0, 1 or 2)")]
    InvalidOptimizationLevel(u8),

    /// Optimization backend other than the supported default.
    #[error("{0}: not a valid optimization backend")]
    UnsupportedOptimizer(String),

    /// Result format outside the four named values.
    #[error(
        "{0}: not a valid result format (expected raw, binary, binary_count \
         or squash_binary_result_arrays)"
    )]
    UnknownResultFormat(String),

    /// Shot count of zero.
    #[error("shots must be a positive integer")]
    InvalidShots,

    /// Non-positive repetition period.
    #[error("repetition period must be positive, got {0}")]
    InvalidRepetitionPeriod(f64),

    /// Tunnel allocation failure.
    #[error(transparent)]
    Sched(#[from] qbridge_sched::SchedError),

    /// Transport failure.
    #[error(transparent)]
    Rpc(#[from] qbridge_rpc::RpcError),
}
