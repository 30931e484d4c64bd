//! Wire format: endpoint addresses and frame encoding.
//!
//! Frames are a 4-byte big-endian length followed by a JSON body. The
//! request body is the two-element `(payload, configuration)` envelope;
//! the reply body is an arbitrary JSON document owned by the server.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RpcError, RpcResult};

/// Upper bound on a single frame. Results for large shot counts are a few
/// megabytes at most; anything bigger indicates a corrupt length prefix.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Request envelope sent to the control server: the opaque circuit payload
/// and its pre-serialized execution configuration, as a two-element tuple.
///
/// No part of the client inspects the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest(pub String, pub String);

impl JobRequest {
    /// The circuit payload.
    pub fn payload(&self) -> &str {
        &self.0
    }

    /// The serialized configuration document.
    pub fn config(&self) -> &str {
        &self.1
    }
}

/// Split a `tcp://<ipv4>:<port>` address into its host and port.
///
/// Anything not matching that shape is rejected before any connection
/// attempt.
pub fn parse_endpoint(address: &str) -> RpcResult<(Ipv4Addr, u16)> {
    let invalid = || RpcError::InvalidAddress(address.to_string());

    let rest = address.strip_prefix("tcp://").ok_or_else(invalid)?;
    let (host, port) = rest.split_once(':').ok_or_else(invalid)?;
    let host: Ipv4Addr = host.parse().map_err(|_| invalid())?;
    let port: u16 = port.parse().map_err(|_| invalid())?;
    Ok((host, port))
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> RpcResult<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(RpcError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
pub async fn read_frame<R>(reader: &mut R) -> RpcResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(RpcError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}
