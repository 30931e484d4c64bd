//! Error handling for the tunnel allocation client.

use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur while managing tunnel allocations.
///
/// The system-command variants carry the rendered command line, the exit
/// code and the captured stderr, plus a remediation hint in the display
/// message, so failures can be diagnosed without re-running at a higher
/// log level.
#[derive(Error, Debug)]
pub enum SchedError {
    /// The external command does not exist on this host.
    #[error(
        "command not found: `{command}`\n\
         Hint: ensure the required scheduler tools are installed and available in your PATH"
    )]
    CommandNotFound { command: String },

    /// The scheduler rejected the reservation the submission was bound to.
    #[error(
        "reservation rejected by the scheduler: `{command}`\n{stderr}\n\
         Hint: check active reservations with `scontrol show reservations`, \
         or verify that your reservation parameters are correct"
    )]
    ReservationInvalid { command: String, stderr: String },

    /// Any other non-zero exit from an external command.
    #[error(
        "command `{command}` failed with exit code {code}:\n{stderr}\n\
         Hint: review the system configuration and logs for more details"
    )]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Scheduler output did not match an expected pattern. Treated as a
    /// hard fault (environment or scheduler version mismatch), never retried.
    #[error("{message}\nOutput: {output}\nHint: {hint}")]
    OutputParsing {
        message: String,
        output: String,
        hint: String,
    },

    /// No backend partition name was supplied.
    #[error("no backend partition specified")]
    MissingPartition,

    /// An operation that needs a job id was called with none given and
    /// no tunnel job recorded on the client.
    #[error("no job id given and no tunnel job is recorded on this client")]
    NoActiveJob,

    /// Time limit string is not valid `HH:MM:SS`.
    #[error("invalid time limit '{0}': must be HH:MM:SS with in-range fields")]
    InvalidTimeLimit(String),

    /// Time limit exceeds the system-wide maximum.
    #[error("time limit '{requested}' exceeds the maximum allowed '{max}'")]
    TimeLimitExceeded { requested: String, max: String },

    /// The allocation never reached the running state within the bounded
    /// poll count.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The wait was interrupted by the user; best-effort cancellation was
    /// already attempted.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// IO error spawning or talking to an external process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_errors_carry_context() {
        let err = SchedError::CommandFailed {
            command: "sbatch --time=01:00:00 qpu.sh 650".to_string(),
            code: 2,
            stderr: "sbatch: error: invalid partition".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("sbatch --time=01:00:00 qpu.sh 650"));
        assert!(msg.contains("exit code 2"));
        assert!(msg.contains("invalid partition"));
        assert!(msg.contains("Hint:"));
    }

    #[test]
    fn test_reservation_error_hint() {
        let err = SchedError::ReservationInvalid {
            command: "sbatch --reservation=qc1 qpu.sh 610".to_string(),
            stderr: "sbatch: error: reservation is invalid".to_string(),
        };
        assert!(err.to_string().contains("scontrol show reservations"));
    }

    #[test]
    fn test_output_parsing_carries_raw_output() {
        let err = SchedError::OutputParsing {
            message: "failed to find a job id".to_string(),
            output: "sbatch: unexpected banner".to_string(),
            hint: "check the sbatch version".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("unexpected banner"));
        assert!(msg.contains("Hint: check the sbatch version"));
    }
}
