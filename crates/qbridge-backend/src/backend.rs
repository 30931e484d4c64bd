//! QPU backend façade.
//!
//! Composes the tunnel allocation client and the RPC client into one
//! connect → run → disconnect lifecycle:
//!
//! ```text
//!   Disconnected ──connect()──▶ [TunnelPending] ──▶ Connected
//!        ▲                                             │
//!        └───────────────── disconnect() ◀─────────────┘
//! ```
//!
//! With no fixed address configured the backend runs off-cluster and must
//! first acquire a tunnel allocation (the bracketed state). A recorded
//! allocation that died between calls is detected before reuse and
//! recovered by a full disconnect + connect ("flush") inside
//! [`QpuBackend::run`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use qbridge_rpc::{JobRequest, RpcClient, parse_endpoint};
use qbridge_sched::{
    AllocationStatus, CommandRunner, SystemRunner, TunnelClient, TunnelConfig, timefmt,
};

use crate::config::{RunOptions, build_config};
use crate::error::{BackendError, BackendResult};

/// Pause after the tunnel job starts, giving the relay time to bind its
/// port before the connectivity probe.
const RELAY_SETTLE: Duration = Duration::from_millis(300);

/// Pause between cancellation attempts during teardown.
const CANCEL_PAUSE: Duration = Duration::from_millis(500);

/// Settings for a backend instance.
///
/// All knobs are explicit and per-instance; there are no process-wide
/// defaults.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Scheduler partition hosting the device; also selects the tunnel
    /// startup script.
    pub partition: String,

    /// Fixed control-server address (`tcp://<ipv4>:<port>`). When set, no
    /// tunnel is acquired — the process is assumed to run on-cluster.
    pub address: Option<String>,

    /// Time limit for tunnel jobs, `HH:MM:SS`. Validated against the
    /// system maximum at construction.
    pub tunnel_time_limit: Option<String>,

    /// Scheduler reservation to bind tunnel jobs to.
    pub reservation: Option<String>,

    /// Directory holding the per-partition tunnel startup scripts.
    pub script_dir: PathBuf,
}

impl Default for BackendSettings {
    fn default() -> Self {
        let tunnel = TunnelConfig::default();
        Self {
            partition: "qpu".to_string(),
            address: None,
            tunnel_time_limit: None,
            reservation: None,
            script_dir: tunnel.script_dir,
        }
    }
}

impl BackendSettings {
    /// Set a fixed control-server address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the tunnel time limit.
    pub fn with_tunnel_time_limit(mut self, limit: impl Into<String>) -> Self {
        self.tunnel_time_limit = Some(limit.into());
        self
    }

    /// Set the reservation name.
    pub fn with_reservation(mut self, name: impl Into<String>) -> Self {
        self.reservation = Some(name.into());
        self
    }
}

/// Façade over one remote QPU.
///
/// Owns at most one RPC connection and at most one tunnel allocation at a
/// time. `&mut self` receivers enforce the single-caller, one-request-
/// in-flight discipline at compile time.
pub struct QpuBackend {
    settings: BackendSettings,
    runner: Arc<dyn CommandRunner>,
    tunnel: TunnelClient,
    client: Option<RpcClient>,
    endpoint: Option<String>,
    job_id: Option<String>,
}

impl QpuBackend {
    /// Create a backend using the system command runner.
    pub fn new(settings: BackendSettings) -> BackendResult<Self> {
        Self::with_runner(Arc::new(SystemRunner), settings)
    }

    /// Create a backend with an explicit command runner.
    pub fn with_runner(
        runner: Arc<dyn CommandRunner>,
        settings: BackendSettings,
    ) -> BackendResult<Self> {
        let mut tunnel_config = TunnelConfig::default()
            .with_script_dir(settings.script_dir.clone());
        tunnel_config.reservation = settings.reservation.clone();

        timefmt::check_within_limit(
            settings.tunnel_time_limit.as_deref(),
            &tunnel_config.max_time_limit,
        )?;

        let tunnel = TunnelClient::new(runner.clone(), tunnel_config)?;
        let endpoint = settings.address.clone();

        Ok(Self {
            settings,
            runner,
            tunnel,
            client: None,
            endpoint,
            job_id: None,
        })
    }

    /// Whether an RPC connection currently exists.
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// The job id of the current tunnel allocation, if any.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// The endpoint the backend is (or will be) bound to.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Establish the connection.
    ///
    /// Without a fixed address this acquires a tunnel allocation first.
    /// Reachability is probed before the RPC client is created. Calling
    /// `connect` while a client already exists does not create a second
    /// one.
    pub async fn connect(&mut self) -> BackendResult<()> {
        if self.endpoint.is_none() {
            info!(
                "no fixed address configured; acquiring a tunnel on partition '{}'",
                self.settings.partition
            );

            let (job_id, endpoint) = self
                .tunnel
                .submit_and_wait(
                    &self.settings.partition,
                    None,
                    self.settings.tunnel_time_limit.as_deref(),
                )
                .await?;

            debug!("tunnel up: job {job_id}, endpoint {endpoint}");
            self.job_id = Some(job_id);
            self.endpoint = Some(endpoint);
            sleep(RELAY_SETTLE).await;
        }

        self.verify_connection().await?;

        if self.client.is_none() {
            let endpoint = self.endpoint.clone().ok_or(BackendError::NotConnected)?;
            self.client = Some(RpcClient::new(endpoint)?);
        }
        info!("connection established");
        Ok(())
    }

    /// Tear the connection down.
    ///
    /// Cancels the tunnel allocation while the scheduler still reports it
    /// running (individual cancellation failures are logged, not fatal),
    /// clears the allocation state, and closes the RPC client. Safe to
    /// call when nothing is connected.
    pub async fn disconnect(&mut self) {
        if let Some(job_id) = self.job_id.clone() {
            loop {
                match self.tunnel.status(Some(&job_id)).await {
                    Ok(AllocationStatus::Running) => {
                        debug!("sending cancellation to tunnel job {job_id}");
                        if let Err(e) = self.tunnel.cancel(Some(&job_id)).await {
                            debug!("error cancelling tunnel job {job_id}: {e}");
                        }
                        sleep(CANCEL_PAUSE).await;
                    }
                    Ok(_) => break,
                    Err(e) => {
                        warn!("could not query tunnel job {job_id} during teardown: {e}");
                        break;
                    }
                }
            }

            self.job_id = None;
            self.tunnel.clear();
            self.endpoint = self.settings.address.clone();
        }

        if let Some(mut client) = self.client.take() {
            client.close();
        }
        info!("disconnected");
    }

    /// Execute a circuit payload and return the server's reply unmodified.
    ///
    /// Fails fast when disconnected, with no scheduler or network call.
    /// When the recorded allocation is observed no longer running, one
    /// disconnect + connect cycle recovers the state before the request
    /// is sent.
    pub async fn run(
        &mut self,
        circuit: &str,
        options: &RunOptions,
    ) -> BackendResult<serde_json::Value> {
        if self.client.is_none() {
            return Err(BackendError::NotConnected);
        }

        if self.job_id.is_some()
            && self.tunnel.status(self.job_id.as_deref()).await? == AllocationStatus::NotRunning
        {
            info!("tunnel allocation ended unexpectedly; flushing connection state");
            self.disconnect().await;
            self.connect().await?;
        }

        let config = build_config(options)?;
        let request = JobRequest(circuit.to_string(), config);

        let Some(client) = self.client.as_mut() else {
            return Err(BackendError::NotConnected);
        };
        client.send(&request).await?;
        let reply = client.await_reply().await?;
        Ok(reply)
    }

    /// Scoped use: connect, hand the backend to `f`, and disconnect
    /// regardless of how `f` exits.
    pub async fn with_session<T, F>(&mut self, f: F) -> BackendResult<T>
    where
        F: for<'a> FnOnce(&'a mut QpuBackend) -> BoxFuture<'a, BackendResult<T>>,
    {
        self.connect().await?;
        let result = f(self).await;
        self.disconnect().await;
        result
    }

    /// Probe reachability of the endpoint before any request is sent.
    ///
    /// The host and port are extracted from the address; an address that
    /// does not parse is a usage error, surfaced before any system call.
    async fn verify_connection(&self) -> BackendResult<()> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Err(BackendError::NotConnected);
        };

        let (host, port) = parse_endpoint(endpoint)
            .map_err(|_| BackendError::MalformedEndpoint(endpoint.to_string()))?;

        let args = vec!["-zv".to_string(), host.to_string(), port.to_string()];
        self.runner.run("nc", &args).await?;
        debug!("connectivity to {endpoint} verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qbridge_sched::{CommandOutput, SchedResult};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    struct ScriptedRunner {
        outputs: Mutex<VecDeque<SchedResult<CommandOutput>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<SchedResult<CommandOutput>>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> SchedResult<CommandOutput> {
            let rendered = if args.is_empty() {
                program.to_string()
            } else {
                format!("{} {}", program, args.join(" "))
            };
            self.calls.lock().unwrap().push(rendered);
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted runner ran out of outputs")
        }
    }

    fn ok(stdout: &str) -> SchedResult<CommandOutput> {
        Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    /// Serve `replies` request-reply exchanges, one connection each.
    async fn spawn_server(replies: usize, reply: serde_json::Value) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            for _ in 0..replies {
                let (mut stream, _) = listener.accept().await.unwrap();
                let _request = qbridge_rpc::wire::read_frame(&mut stream).await.unwrap();
                let body = serde_json::to_vec(&reply).unwrap();
                qbridge_rpc::wire::write_frame(&mut stream, &body)
                    .await
                    .unwrap();
            }
        });
        format!("tcp://127.0.0.1:{port}")
    }

    #[tokio::test]
    async fn test_run_when_disconnected_makes_no_calls() {
        let runner = ScriptedRunner::new(vec![]);
        let settings = BackendSettings::default().with_address("tcp://127.0.0.1:650");
        let mut backend = QpuBackend::with_runner(runner.clone(), settings).unwrap();

        let err = backend.run("circuit", &RunOptions::new(10)).await.unwrap_err();

        assert!(matches!(err, BackendError::NotConnected));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_in_effect() {
        let address = spawn_server(1, json!(null)).await;
        let runner = ScriptedRunner::new(vec![ok(""), ok("")]);
        let settings = BackendSettings::default().with_address(&address);
        let mut backend = QpuBackend::with_runner(runner, settings).unwrap();

        backend.connect().await.unwrap();
        assert!(backend.is_connected());
        backend.connect().await.unwrap();
        // Still exactly one client; the second connect only re-probed.
        assert!(backend.is_connected());
    }

    #[tokio::test]
    async fn test_malformed_fixed_address_is_a_usage_error() {
        let runner = ScriptedRunner::new(vec![]);
        let settings = BackendSettings::default().with_address("tcp://control-server:650");
        let mut backend = QpuBackend::with_runner(runner.clone(), settings).unwrap();

        let err = backend.connect().await.unwrap_err();

        assert!(matches!(err, BackendError::MalformedEndpoint(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dead_allocation_triggers_exactly_one_flush() {
        let address = spawn_server(1, json!({"results": "ok"})).await;
        let runner = ScriptedRunner::new(vec![
            // connect: probe
            ok(""),
            // run: allocation check -> not running
            ok("JobId=42 JobState=FAILED"),
            // disconnect: teardown check -> already gone, no scancel
            ok("JobId=42 JobState=FAILED"),
            // reconnect: probe
            ok(""),
        ]);
        let settings = BackendSettings::default().with_address(&address);
        let mut backend = QpuBackend::with_runner(runner.clone(), settings).unwrap();

        backend.connect().await.unwrap();
        // Pretend the connection came from a tunnel allocation.
        backend.job_id = Some("42".to_string());

        let reply = backend.run("circuit", &RunOptions::new(10)).await.unwrap();

        assert_eq!(reply, json!({"results": "ok"}));
        assert_eq!(
            runner.calls(),
            vec![
                "nc -zv 127.0.0.1 ".to_string() + address.rsplit(':').next().unwrap(),
                "scontrol show job 42".to_string(),
                "scontrol show job 42".to_string(),
                "nc -zv 127.0.0.1 ".to_string() + address.rsplit(':').next().unwrap(),
            ]
        );
        // The flush cleared the allocation state.
        assert!(backend.job_id().is_none());
    }

    #[tokio::test]
    async fn test_running_allocation_is_not_flushed() {
        let address = spawn_server(1, json!(null)).await;
        let runner = ScriptedRunner::new(vec![
            ok(""),
            ok("JobId=42 JobState=RUNNING"),
        ]);
        let settings = BackendSettings::default().with_address(&address);
        let mut backend = QpuBackend::with_runner(runner.clone(), settings).unwrap();

        backend.connect().await.unwrap();
        backend.job_id = Some("42".to_string());

        backend.run("circuit", &RunOptions::new(10)).await.unwrap();

        // One probe, one status check, no second probe.
        assert_eq!(runner.calls().len(), 2);
        assert_eq!(backend.job_id(), Some("42"));
    }

    #[tokio::test]
    async fn test_disconnect_with_nothing_connected_is_a_noop() {
        let runner = ScriptedRunner::new(vec![]);
        let settings = BackendSettings::default().with_address("tcp://127.0.0.1:650");
        let mut backend = QpuBackend::with_runner(runner.clone(), settings).unwrap();

        backend.disconnect().await;
        backend.disconnect().await;

        assert!(runner.calls().is_empty());
        assert!(!backend.is_connected());
    }

    #[tokio::test]
    async fn test_invalid_tunnel_time_limit_rejected_at_construction() {
        let runner = ScriptedRunner::new(vec![]);
        let settings = BackendSettings::default().with_tunnel_time_limit("25:00:00");
        assert!(QpuBackend::with_runner(runner, settings).is_err());
    }
}
