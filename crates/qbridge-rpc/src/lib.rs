//! Request-reply messaging client for the QPU control server.
//!
//! One connection, one request in flight, one reply per request. The
//! transport is a framed TCP stream (4-byte big-endian length + JSON
//! body); the request is the opaque `(payload, configuration)` envelope
//! and the reply is an arbitrary JSON document passed through untouched.
//!
//! Sends retry transient transport failures until a wall-clock timeout —
//! a tunnel relay that was just granted may take a moment to come up.
//! Receives block until the reply arrives; an optional deadline can be
//! configured per client.

pub mod client;
pub mod error;
pub mod wire;

pub use client::RpcClient;
pub use error::{RpcError, RpcResult};
pub use wire::{JobRequest, MAX_FRAME_LEN, parse_endpoint};
