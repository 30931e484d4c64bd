//! Request-reply client.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info};

use crate::error::{RpcError, RpcResult};
use crate::wire::{self, JobRequest};

/// Default wall-clock bound on handing a request to the transport.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between send attempts.
const SEND_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Length of the request preview embedded in send-timeout errors.
const REQUEST_PREVIEW_LEN: usize = 120;

/// Client side of one request-reply session with the control server.
///
/// The protocol is strict request-reply: exactly one outstanding request
/// at a time, a reply consumed before the next send. The façade layer
/// upholds that discipline; this client does not police it.
///
/// Construction does not block waiting for a peer: the connection is
/// established lazily by the first [`RpcClient::send`].
pub struct RpcClient {
    address: String,
    host: Ipv4Addr,
    port: u16,
    stream: Option<TcpStream>,
    send_timeout: Duration,
    reply_deadline: Option<Duration>,
}

impl RpcClient {
    /// Create a client for `tcp://<ipv4>:<port>`. The address is validated
    /// here; no connection attempt is made.
    pub fn new(address: impl Into<String>) -> RpcResult<Self> {
        let address = address.into();
        let (host, port) = wire::parse_endpoint(&address)?;
        debug!("rpc client created for {address}");

        Ok(Self {
            address,
            host,
            port,
            stream: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            reply_deadline: None,
        })
    }

    /// Override the send timeout.
    pub fn with_send_timeout(mut self, bound: Duration) -> Self {
        self.send_timeout = bound;
        self
    }

    /// Bound [`RpcClient::await_reply`] by a deadline. Off by default:
    /// device-side execution has no client-known upper bound.
    pub fn with_reply_deadline(mut self, deadline: Duration) -> Self {
        self.reply_deadline = Some(deadline);
        self
    }

    /// The address this client is bound to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one request, retrying transient transport failures until the
    /// send timeout elapses.
    ///
    /// A failed attempt drops the half-open connection and reconnects on
    /// the next try, so a relay that is still coming up is absorbed here
    /// rather than surfaced to the caller.
    pub async fn send(&mut self, request: &JobRequest) -> RpcResult<()> {
        let body = serde_json::to_vec(request)?;
        let started = Instant::now();
        let deadline = started + self.send_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.send_timeout_error(&body));
            }

            // Each attempt runs under the remaining wall-clock budget, so a
            // connect that hangs or a write stalled on a full socket buffer
            // cannot outlive the configured bound.
            match timeout(remaining, self.try_send(&body)).await {
                Ok(Ok(())) => {
                    info!(
                        "request sent to {} in {:.3}s",
                        self.address,
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(());
                }
                Ok(Err(e)) if e.is_transient() => {
                    self.stream = None;
                    debug!("send attempt to {} failed: {e}; retrying", self.address);
                    sleep(SEND_RETRY_PAUSE).await;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    // A partial frame may be on the wire; the socket is unusable.
                    self.stream = None;
                    return Err(self.send_timeout_error(&body));
                }
            }
        }
    }

    fn send_timeout_error(&self, body: &[u8]) -> RpcError {
        RpcError::SendTimeout {
            address: self.address.clone(),
            request: preview(body),
        }
    }

    /// Block until the server's reply arrives and decode it.
    ///
    /// Unbounded unless a reply deadline was configured.
    pub async fn await_reply(&mut self) -> RpcResult<serde_json::Value> {
        let stream = self.stream.as_mut().ok_or(RpcError::NotConnected)?;
        let started = Instant::now();

        let body = match self.reply_deadline {
            Some(bound) => timeout(bound, wire::read_frame(stream))
                .await
                .map_err(|_| RpcError::ReplyTimeout(self.address.clone()))??,
            None => wire::read_frame(stream).await?,
        };

        info!(
            "reply received from {} after {:.3}s",
            self.address,
            started.elapsed().as_secs_f64()
        );
        Ok(serde_json::from_slice(&body)?)
    }

    /// Release the underlying socket. Idempotent; safe during teardown.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("connection to {} closed", self.address);
        }
    }

    async fn try_send(&mut self, body: &[u8]) -> RpcResult<()> {
        if let Some(stream) = self.stream.as_mut() {
            return wire::write_frame(stream, body).await;
        }
        let stream = TcpStream::connect((self.host, self.port)).await?;
        stream.set_nodelay(true)?;
        wire::write_frame(self.stream.insert(stream), body).await
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Truncated rendering of the request body for error messages.
fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= REQUEST_PREVIEW_LEN {
        text.into_owned()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < REQUEST_PREVIEW_LEN)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}…", &text[..cut])
    }
}
