//! Parsers for SLURM command output.

use crate::error::{SchedError, SchedResult};

/// Prefix of the sbatch submission acknowledgment.
const ACK_MARKER: &str = "Submitted batch job ";

/// Marker present in `scontrol show job` output while the job runs.
const RUNNING_MARKER: &str = "RUNNING";

/// Prefix of the node list in `scontrol show partition` output.
const NODES_MARKER: &str = "Nodes=c";

/// Extract the job id from the sbatch acknowledgment.
///
/// Expected somewhere in the output: `Submitted batch job <id>`.
pub fn parse_submission_ack(output: &str) -> SchedResult<String> {
    if let Some(idx) = output.find(ACK_MARKER) {
        let rest = &output[idx + ACK_MARKER.len()..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if !digits.is_empty() {
            return Ok(digits);
        }
    }

    Err(SchedError::OutputParsing {
        message: "failed to find a job id in the sbatch acknowledgment".to_string(),
        output: output.trim().to_string(),
        hint: "expected 'Submitted batch job <id>'; check the sbatch version on this host"
            .to_string(),
    })
}

/// Check whether a `scontrol show job` dump reports the job as running.
pub fn job_is_running(status_output: &str) -> bool {
    status_output.contains(RUNNING_MARKER)
}

/// Extract the (rack, node) pair from `scontrol show partition` output.
///
/// Node names follow the `c<rack>-<node>` convention, e.g. `Nodes=c1-10`.
pub fn parse_partition_node(output: &str) -> SchedResult<(u32, u32)> {
    if let Some(idx) = output.find(NODES_MARKER) {
        let rest = &output[idx + NODES_MARKER.len()..];
        let rack: String = rest.chars().take_while(char::is_ascii_digit).collect();
        let after_rack = &rest[rack.len()..];
        if !rack.is_empty() && after_rack.starts_with('-') {
            let node: String = after_rack[1..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if !node.is_empty() {
                // Lengths are bounded by the digit scan, so these cannot overflow a u32
                // for any node name SLURM will produce; reject absurd values anyway.
                if let (Ok(rack), Ok(node)) = (rack.parse(), node.parse()) {
                    return Ok((rack, node));
                }
            }
        }
    }

    Err(SchedError::OutputParsing {
        message: "partition description does not name a backend node".to_string(),
        output: output.trim().to_string(),
        hint: "expected 'Nodes=c<rack>-<node>' in the scontrol partition dump".to_string(),
    })
}

/// Build the backend node address from the rack/node pair.
pub fn node_ip(rack: u32, node: u32) -> String {
    format!("10.120.{rack}.{node}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submission_ack() {
        assert_eq!(
            parse_submission_ack("Submitted batch job 12345\n").unwrap(),
            "12345"
        );
        // Some sites prepend banners.
        assert_eq!(
            parse_submission_ack("== cluster motd ==\nSubmitted batch job 7\n").unwrap(),
            "7"
        );
    }

    #[test]
    fn test_parse_submission_ack_error() {
        let err = parse_submission_ack("sbatch: error: something went wrong").unwrap_err();
        match err {
            SchedError::OutputParsing { output, .. } => {
                assert!(output.contains("something went wrong"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(parse_submission_ack("Submitted batch job \n").is_err());
        assert!(parse_submission_ack("").is_err());
    }

    #[test]
    fn test_job_is_running() {
        assert!(job_is_running(
            "JobId=99 JobName=tunnel\n   JobState=RUNNING Reason=None\n"
        ));
        assert!(!job_is_running(
            "JobId=99 JobName=tunnel\n   JobState=PENDING Reason=Resources\n"
        ));
        assert!(!job_is_running(""));
    }

    #[test]
    fn test_parse_partition_node() {
        let output = "PartitionName=b1 State=UP\n   Nodes=c1-10 TotalNodes=1\n";
        assert_eq!(parse_partition_node(output).unwrap(), (1, 10));

        let output = "Nodes=c12-3";
        assert_eq!(parse_partition_node(output).unwrap(), (12, 3));
    }

    #[test]
    fn test_parse_partition_node_error() {
        for bad in [
            "",
            "PartitionName=b1 State=UP",
            "Nodes=gpu7-1",
            "Nodes=c-10",
            "Nodes=c7-",
        ] {
            assert!(
                matches!(
                    parse_partition_node(bad),
                    Err(SchedError::OutputParsing { .. })
                ),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_node_ip() {
        assert_eq!(node_ip(1, 10), "10.120.1.10");
        assert_eq!(node_ip(7, 23), "10.120.7.23");
    }
}
