//! External command execution.
//!
//! Everything the allocation client does goes through one external
//! scheduler command or another, so command execution sits behind the
//! [`CommandRunner`] trait. Production code uses [`SystemRunner`];
//! tests script the outputs without touching a cluster.

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{SchedError, SchedResult};

/// Marker SLURM prints on stderr when a submission names a reservation
/// it cannot satisfy.
const RESERVATION_INVALID_MARKER: &str = "reservation is invalid";

/// Captured output of a finished external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Seam for running external scheduler commands.
///
/// Implementations MUST NOT retry: retry policy belongs to callers.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning captured stdout/stderr on a
    /// zero exit status and a classified [`SchedError`] otherwise.
    async fn run(&self, program: &str, args: &[String]) -> SchedResult<CommandOutput>;
}

/// Runner that spawns real processes via tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> SchedResult<CommandOutput> {
        let rendered = render_command(program, args);
        debug!("executing command: {rendered}");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    SchedError::CommandNotFound {
                        command: rendered.clone(),
                    }
                } else {
                    SchedError::Io(e)
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!("command failed: {rendered} | exit code {code}");
            return Err(classify_failure(rendered, code, stderr));
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

/// Map a non-zero exit into the command-error taxonomy.
fn classify_failure(command: String, code: i32, stderr: String) -> SchedError {
    if code == 127 {
        SchedError::CommandNotFound { command }
    } else if stderr.contains(RESERVATION_INVALID_MARKER) {
        SchedError::ReservationInvalid { command, stderr }
    } else {
        SchedError::CommandFailed {
            command,
            code,
            stderr,
        }
    }
}

/// Render a program and its arguments as one command line for logs and
/// error messages.
pub fn render_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
