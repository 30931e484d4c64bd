//! Backend façade for remote QPU execution over a scheduler tunnel.
//!
//! The public entry point of the client stack. A [`QpuBackend`] composes
//! the tunnel allocation client (`qbridge-sched`) and the request-reply
//! client (`qbridge-rpc`) into a connect → run → disconnect lifecycle,
//! recovering transparently when the tunnel allocation dies between
//! calls.
//!
//! ```no_run
//! use qbridge_backend::{RunOptions, RuntimeService};
//!
//! # async fn demo(circuit: &str) -> Result<(), qbridge_backend::BackendError> {
//! let service = RuntimeService::new();
//! let mut backend = service.backend("qpu")?;
//!
//! backend.connect().await?;
//! let options = RunOptions::new(100).with_repetition_period(500e-6);
//! let results = backend.run(circuit, &options).await?;
//! backend.disconnect().await;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod service;

pub use backend::{BackendSettings, QpuBackend};
pub use config::{DEFAULT_OPTIMIZER, ResultFormat, RunOptions, build_config};
pub use error::{BackendError, BackendResult};
pub use service::RuntimeService;
