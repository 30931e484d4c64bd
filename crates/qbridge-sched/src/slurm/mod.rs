//! SLURM integration for tunnel allocations.

mod client;
mod parser;

pub use client::{AllocationStatus, TunnelClient, TunnelConfig};
