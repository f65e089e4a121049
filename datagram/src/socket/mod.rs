//! Unreliable datagram transport underneath the adapter.
//!
//! A socket is split into a [Sender] (shared, non-blocking) and a [Receiver] (owned by the
//! adapter's receive loop). [udp] binds a real UDP socket; [simulated] connects endpoints in
//! memory with configurable loss for deterministic tests.

use bytes::Bytes;
use std::{future::Future, net::SocketAddr};
use thiserror::Error;

pub mod simulated;
pub mod udp;

/// Errors that can occur when interacting with a socket.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("send would block")]
    WouldBlock,
    #[error("socket closed")]
    Closed,
    #[error("unreachable: {0}")]
    Unreachable(SocketAddr),
}

/// Sending half of a socket.
pub trait Sender: Clone + Send + Sync + 'static {
    /// Hand `datagram` to the network without waiting.
    ///
    /// Success means the datagram was accepted for transmission, not that it arrived.
    fn send(&self, to: SocketAddr, datagram: Bytes) -> Result<(), Error>;
}

/// Receiving half of a socket.
pub trait Receiver: Send + 'static {
    /// Wait for the next datagram and the address it came from.
    fn recv(&mut self) -> impl Future<Output = Result<(SocketAddr, Bytes), Error>> + Send;
}
