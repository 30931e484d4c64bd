//! SLURM tunnel allocation client.
//!
//! A tunnel job is a scheduler-granted, time-bounded allocation whose batch
//! script starts a small relay process on the backend node, exposing the
//! control server on a client-chosen endpoint-port. The only observation
//! mechanism SLURM offers is polling, so [`TunnelClient::submit_and_wait`]
//! submits, polls the job state with a bounded retry count, and resolves the
//! backend node address once the job runs.

use std::future::Future;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::command::{CommandRunner, render_command};
use crate::error::{SchedError, SchedResult};
use crate::slurm::parser;
use crate::timefmt;

/// Last-observed state of a tunnel allocation.
///
/// Modelled explicitly instead of signalling "job died" through a failure
/// from a downstream call: callers check the state before reusing an
/// allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStatus {
    /// No job recorded, or the scheduler could not be queried.
    Unknown,
    /// The scheduler last reported the job as running.
    Running,
    /// The job is known to the scheduler but no longer running.
    NotRunning,
}

/// Configuration for the tunnel client.
///
/// Explicit per-instance configuration; there are no module-level defaults.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Directory holding the per-partition startup scripts
    /// (`<partition>.sh`).
    pub script_dir: PathBuf,

    /// Time limit used when the caller does not supply one.
    pub default_time_limit: String,

    /// System-wide maximum tunnel time limit.
    pub max_time_limit: String,

    /// Optional scheduler reservation to bind submissions to.
    pub reservation: Option<String>,

    /// Pause between job-state polls.
    pub poll_interval: Duration,

    /// Maximum number of job-state polls before giving up.
    /// 288_000 polls at 100 ms bounds the wait to eight hours.
    pub max_polls: u32,

    /// Range the endpoint-port is drawn from when none is supplied.
    /// Collisions are rare at this scale and rejected by the scheduler.
    pub port_range: RangeInclusive<u16>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            script_dir: PathBuf::from("/opt/qbridge/slurm_scripts"),
            default_time_limit: "02:00:00".to_string(),
            max_time_limit: "08:00:00".to_string(),
            reservation: None,
            poll_interval: Duration::from_millis(100),
            max_polls: 288_000,
            port_range: 600..=699,
        }
    }
}

impl TunnelConfig {
    /// Set the reservation name.
    pub fn with_reservation(mut self, name: impl Into<String>) -> Self {
        self.reservation = Some(name.into());
        self
    }

    /// Set the startup-script directory.
    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = dir.into();
        self
    }
}

/// Client for one scheduler-managed tunnel allocation.
///
/// Lifecycle of the recorded state: empty at construction, `job_id` set on
/// successful submission, cleared again on cancellation or user interrupt.
/// The endpoint address returned by [`TunnelClient::submit_and_wait`] is
/// only meaningful while the job was last observed running.
pub struct TunnelClient {
    runner: Arc<dyn CommandRunner>,
    config: TunnelConfig,
    job_id: Option<String>,
    endpoint_port: Option<u16>,
}

impl TunnelClient {
    /// Create a tunnel client. Fails if the configured time limits are not
    /// valid `HH:MM:SS` strings or the default exceeds the maximum.
    pub fn new(runner: Arc<dyn CommandRunner>, config: TunnelConfig) -> SchedResult<Self> {
        timefmt::time_to_seconds(&config.max_time_limit)?;
        timefmt::check_within_limit(Some(&config.default_time_limit), &config.max_time_limit)?;

        Ok(Self {
            runner,
            config,
            job_id: None,
            endpoint_port: None,
        })
    }

    /// The job id of the current allocation, if one is recorded.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Forget the recorded allocation state.
    pub fn clear(&mut self) {
        self.job_id = None;
        self.endpoint_port = None;
    }

    /// Submit a tunnel job and block until it runs.
    ///
    /// Picks a random endpoint-port from the configured range when
    /// `endpoint_port` is `None`, submits the per-partition startup script,
    /// polls the job state (bounded), then resolves the backend node and
    /// returns `(job_id, "tcp://<ip>:<port>")`.
    ///
    /// A Ctrl-C while waiting triggers best-effort cancellation of the
    /// partially-submitted job; the recorded state is cleared and
    /// [`SchedError::Cancelled`] is returned.
    pub async fn submit_and_wait(
        &mut self,
        partition: &str,
        endpoint_port: Option<u16>,
        time_limit: Option<&str>,
    ) -> SchedResult<(String, String)> {
        let interrupt = async {
            // A failed signal registration must not masquerade as Ctrl-C.
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        self.submit_and_wait_interruptible(partition, endpoint_port, time_limit, interrupt)
            .await
    }

    /// [`TunnelClient::submit_and_wait`] with the interrupt source supplied
    /// by the caller.
    async fn submit_and_wait_interruptible(
        &mut self,
        partition: &str,
        endpoint_port: Option<u16>,
        time_limit: Option<&str>,
        interrupt: impl Future<Output = ()>,
    ) -> SchedResult<(String, String)> {
        if partition.is_empty() {
            return Err(SchedError::MissingPartition);
        }
        timefmt::check_within_limit(time_limit, &self.config.max_time_limit)?;

        let port = match endpoint_port.or(self.endpoint_port) {
            Some(port) => port,
            None => rand::thread_rng().gen_range(self.config.port_range.clone()),
        };
        self.endpoint_port = Some(port);

        let limit = time_limit.unwrap_or(&self.config.default_time_limit);
        let script = self.config.script_dir.join(format!("{partition}.sh"));

        let mut args: Vec<String> = Vec::new();
        if let Some(reservation) = &self.config.reservation {
            args.push(format!("--reservation={reservation}"));
        }
        args.push(format!("--time={limit}"));
        args.push(script.display().to_string());
        args.push(port.to_string());

        debug!("submission command: {}", render_command("sbatch", &args));
        let output = self.runner.run("sbatch", &args).await?;

        let job_id = parser::parse_submission_ack(&output.stdout)?;
        self.job_id = Some(job_id.clone());
        info!("tunnel job {job_id} submitted to slurm");

        let waited = tokio::select! {
            res = self.wait_until_running(&job_id) => res,
            () = interrupt => {
                warn!("interrupted while waiting for tunnel job {job_id}");
                if let Err(e) = self.cancel(Some(&job_id)).await {
                    warn!("best-effort cancellation of job {job_id} failed: {e}");
                }
                Err(SchedError::Cancelled(format!(
                    "tunnel job {job_id} cancelled by user interrupt"
                )))
            }
        };

        if let Err(e) = waited {
            if matches!(e, SchedError::Cancelled(_)) {
                self.clear();
            }
            return Err(e);
        }

        let node_ip = self.resolve_backend_node(partition).await?;
        let endpoint = format!("tcp://{node_ip}:{port}");
        info!("tunnel job {job_id} running, endpoint {endpoint}");

        Ok((job_id, endpoint))
    }

    /// Poll the job state until it runs, up to the configured bound.
    async fn wait_until_running(&self, job_id: &str) -> SchedResult<()> {
        for attempt in 0..self.config.max_polls {
            if self.is_job_running(Some(job_id)).await? {
                debug!("job {job_id} running after {} status checks", attempt + 1);
                return Ok(());
            }
            sleep(self.config.poll_interval).await;
        }

        Err(SchedError::Timeout(format!(
            "tunnel job {job_id} did not start within the allotted window"
        )))
    }

    /// Query the scheduler for the allocation state.
    ///
    /// Defaults to the recorded job id; with neither, the state is
    /// [`AllocationStatus::Unknown`] without any system call.
    pub async fn status(&self, job_id: Option<&str>) -> SchedResult<AllocationStatus> {
        let Some(job_id) = job_id.or(self.job_id.as_deref()) else {
            return Ok(AllocationStatus::Unknown);
        };

        let args = vec!["show".to_string(), "job".to_string(), job_id.to_string()];
        let output = self.runner.run("scontrol", &args).await?;

        if parser::job_is_running(&output.stdout) {
            Ok(AllocationStatus::Running)
        } else {
            Ok(AllocationStatus::NotRunning)
        }
    }

    /// Check whether the job is currently running.
    pub async fn is_job_running(&self, job_id: Option<&str>) -> SchedResult<bool> {
        if job_id.or(self.job_id.as_deref()).is_none() {
            return Err(SchedError::NoActiveJob);
        }
        Ok(self.status(job_id).await? == AllocationStatus::Running)
    }

    /// Cancel the allocation to release the backend node.
    ///
    /// Defaults to the recorded job id. Repeated cancellation of an
    /// already-gone job is tolerated by SLURM, so callers may treat this
    /// as idempotent.
    pub async fn cancel(&self, job_id: Option<&str>) -> SchedResult<()> {
        let Some(job_id) = job_id.or(self.job_id.as_deref()) else {
            return Err(SchedError::NoActiveJob);
        };

        self.runner.run("scancel", &[job_id.to_string()]).await?;
        info!("cancellation issued for tunnel job {job_id}");
        Ok(())
    }

    /// Resolve the backend partition's node IP from the scheduler's
    /// partition description.
    pub async fn resolve_backend_node(&self, partition: &str) -> SchedResult<String> {
        if partition.is_empty() {
            return Err(SchedError::MissingPartition);
        }

        let args = vec![
            "show".to_string(),
            "partition".to_string(),
            partition.to_string(),
        ];
        let output = self.runner.run("scontrol", &args).await?;

        let (rack, node) = parser::parse_partition_node(&output.stdout)?;
        let ip = parser::node_ip(rack, node);
        debug!("partition {partition} resolves to node {ip}");
        Ok(ip)
    }
}
