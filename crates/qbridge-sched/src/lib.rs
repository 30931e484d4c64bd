//! Tunnel allocation client for batch-scheduled QPU access.
//!
//! Remote quantum devices on HPC clusters sit behind a batch scheduler.
//! Talking to one from a login node means first acquiring a *tunnel job*:
//! a scheduler-granted, time-bounded allocation whose batch script runs a
//! small relay exposing the device's control server on a network port.
//!
//! This crate owns that resource lifecycle:
//!
//! 1. **Submission**: build and run the `sbatch` command for the backend
//!    partition's startup script, parameterized by an endpoint-port.
//! 2. **Waiting**: poll the job state (polling is the only observation
//!    mechanism SLURM offers) with a bounded retry count.
//! 3. **Resolution**: derive the backend node's address from the
//!    scheduler's partition description.
//! 4. **Teardown**: cancel the job to release the node.
//!
//! External commands run behind the [`CommandRunner`] seam so the whole
//! lifecycle is testable without a cluster.

pub mod command;
pub mod error;
pub mod slurm;
pub mod timefmt;

pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use error::{SchedError, SchedResult};
pub use slurm::{AllocationStatus, TunnelClient, TunnelConfig};
