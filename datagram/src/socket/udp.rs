//! UDP sockets backed by `tokio`.

use super::Error;
use bytes::Bytes;
use commonware_runtime::{Metrics, Spawner};
use std::{future::Future, io::ErrorKind, net::SocketAddr, sync::Arc};
use tokio::{
    net::UdpSocket,
    sync::mpsc::{self, error::TrySendError},
};
use tracing::debug;

/// Receive buffer size.
///
/// Anything larger than the adapter's maximum packet size is dropped after receipt, so the
/// buffer only needs to be large enough to tell that a datagram was oversized.
const RECEIVE_BUFFER: usize = 2_048;

/// Datagrams held for the writer while the socket is not ready.
const BACKLOG: usize = 1_024;

/// Bind a UDP socket on `address`.
///
/// Datagrams the kernel cannot take immediately are handed to a writer task spawned on
/// `context`, which sends them once the socket is writable again.
pub async fn bind<E: Spawner + Metrics>(
    context: E,
    address: SocketAddr,
) -> Result<(Sender, Receiver), Error> {
    let socket = Arc::new(UdpSocket::bind(address).await?);
    socket.writable().await?;

    let (backlog, mut pending) = mpsc::channel::<(SocketAddr, Bytes)>(BACKLOG);
    let writer = socket.clone();
    context.with_label("writer").spawn(move |_| async move {
        while let Some((to, datagram)) = pending.recv().await {
            if let Err(err) = writer.send_to(&datagram, to).await {
                debug!(?to, ?err, "failed to send datagram");
            }
        }
    });
    Ok((
        Sender {
            socket: socket.clone(),
            backlog,
        },
        Receiver {
            socket,
            buffer: vec![0; RECEIVE_BUFFER],
        },
    ))
}

#[derive(Clone)]
pub struct Sender {
    socket: Arc<UdpSocket>,
    backlog: mpsc::Sender<(SocketAddr, Bytes)>,
}

impl Sender {
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }
}

impl super::Sender for Sender {
    fn send(&self, to: SocketAddr, datagram: Bytes) -> Result<(), Error> {
        // Keep ordering with anything already waiting on the writer
        if self.backlog.capacity() == self.backlog.max_capacity() {
            match self.socket.try_send_to(&datagram, to) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.backlog.try_send((to, datagram)).map_err(|err| match err {
            TrySendError::Full(_) => Error::WouldBlock,
            TrySendError::Closed(_) => Error::Closed,
        })
    }
}

pub struct Receiver {
    socket: Arc<UdpSocket>,
    buffer: Vec<u8>,
}

impl super::Receiver for Receiver {
    fn recv(&mut self) -> impl Future<Output = Result<(SocketAddr, Bytes), Error>> + Send {
        async move {
            let (read, from) = self.socket.recv_from(&mut self.buffer).await?;
            Ok((from, Bytes::copy_from_slice(&self.buffer[..read])))
        }
    }
}
