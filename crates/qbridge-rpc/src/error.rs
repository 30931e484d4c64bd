//! Error types for the RPC client.

use thiserror::Error;

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors that can occur on the request-reply channel.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Address does not match `tcp://<ipv4>:<port>`.
    #[error("invalid endpoint address '{0}': expected tcp://<ipv4>:<port>")]
    InvalidAddress(String),

    /// A reply was awaited with no request in flight.
    #[error("no connection is open; send a request first")]
    NotConnected,

    /// The request could not be handed to the transport within the
    /// send timeout.
    #[error("sending {request} on {address} timed out")]
    SendTimeout { address: String, request: String },

    /// The optional reply deadline elapsed.
    #[error("no reply from {0} within the configured deadline")]
    ReplyTimeout(String),

    /// A frame exceeded the maximum allowed size.
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    /// Transport-level IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The envelope or reply could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    /// Whether a send attempt hitting this error may succeed on retry.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, RpcError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_timeout_names_request_and_address() {
        let err = RpcError::SendTimeout {
            address: "tcp://10.120.1.10:650".to_string(),
            request: "[\"OPENQASM 3.0;…\", …]".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tcp://10.120.1.10:650"));
        assert!(msg.contains("OPENQASM"));
    }

    #[test]
    fn test_only_io_is_transient() {
        assert!(RpcError::Io(std::io::Error::other("refused")).is_transient());
        assert!(!RpcError::FrameTooLarge(1).is_transient());
        assert!(!RpcError::NotConnected.is_transient());
    }
}
