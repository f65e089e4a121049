//! In-memory datagram network for deterministic tests.
//!
//! Endpoints are registered by address. Datagrams are delivered immediately unless the link
//! between two endpoints drops them, which is decided by a seeded RNG so that runs are
//! reproducible. Every datagram handed to a [Sender] is recorded and can be inspected (or
//! replayed with [Network::inject]).

use super::Error;
use bytes::Bytes;
use futures::{channel::mpsc, StreamExt};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

/// Errors that can occur when configuring a [Network].
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("invalid success rate (must be in [0, 1]): {0}")]
    InvalidSuccessRate(f64),
}

/// Delivery behavior from one endpoint to another.
#[derive(Clone, Copy, Debug)]
pub struct Link {
    /// Probability of a datagram being delivered (in range [0,1]).
    pub success_rate: f64,
}

/// A datagram handed to the network.
#[derive(Clone, Debug)]
pub struct Transmission {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub datagram: Bytes,

    /// Whether the datagram reached a registered endpoint.
    pub delivered: bool,
}

struct Inner {
    rng: StdRng,
    endpoints: HashMap<SocketAddr, mpsc::UnboundedSender<(SocketAddr, Bytes)>>,
    links: HashMap<(SocketAddr, SocketAddr), Link>,
    transmissions: Vec<Transmission>,
}

impl Inner {
    fn deliver(&mut self, from: SocketAddr, to: SocketAddr, datagram: Bytes, lossy: bool) {
        let success_rate = match self.links.get(&(from, to)) {
            Some(link) if lossy => link.success_rate,
            _ => 1.0,
        };
        let mut delivered = false;
        if self.rng.gen_bool(success_rate) {
            if let Some(endpoint) = self.endpoints.get(&to) {
                delivered = endpoint.unbounded_send((from, datagram.clone())).is_ok();
                if !delivered {
                    self.endpoints.remove(&to);
                }
            }
        }
        self.transmissions.push(Transmission {
            from,
            to,
            datagram,
            delivered,
        });
    }
}

/// Shared handle to a simulated network.
///
/// Pairs of endpoints without an explicit [Link] deliver every datagram.
#[derive(Clone)]
pub struct Network {
    inner: Arc<Mutex<Inner>>,
}

impl Network {
    /// Create a network whose losses are drawn from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                rng: StdRng::seed_from_u64(seed),
                endpoints: HashMap::new(),
                links: HashMap::new(),
                transmissions: Vec::new(),
            })),
        }
    }

    /// Register an endpoint at `address`.
    ///
    /// Registering an address again replaces the previous endpoint, whose [Receiver] then
    /// reports [Error::Closed].
    pub fn register(&self, address: SocketAddr) -> (Sender, Receiver) {
        let (sender, receiver) = mpsc::unbounded();
        self.inner
            .lock()
            .unwrap()
            .endpoints
            .insert(address, sender);
        (
            Sender {
                network: self.clone(),
                address,
            },
            Receiver { receiver },
        )
    }

    /// Remove the endpoint at `address`.
    pub fn unregister(&self, address: SocketAddr) {
        self.inner.lock().unwrap().endpoints.remove(&address);
    }

    /// Set the delivery behavior for datagrams sent from `from` to `to`.
    pub fn link(&self, from: SocketAddr, to: SocketAddr, link: Link) -> Result<(), LinkError> {
        if !(0.0..=1.0).contains(&link.success_rate) {
            return Err(LinkError::InvalidSuccessRate(link.success_rate));
        }
        self.inner.lock().unwrap().links.insert((from, to), link);
        Ok(())
    }

    /// Drop every datagram sent from `from` to `to`.
    pub fn block(&self, from: SocketAddr, to: SocketAddr) {
        self.inner
            .lock()
            .unwrap()
            .links
            .insert((from, to), Link { success_rate: 0.0 });
    }

    /// Deliver `datagram` to `to` as if sent from `from`, bypassing any link.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, datagram: Bytes) {
        self.inner.lock().unwrap().deliver(from, to, datagram, false);
    }

    /// Every datagram sent so far, in order.
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.inner.lock().unwrap().transmissions.clone()
    }

    /// Forget every recorded transmission.
    pub fn clear_transmissions(&self) {
        self.inner.lock().unwrap().transmissions.clear();
    }
}

/// Sending half of a simulated endpoint.
#[derive(Clone)]
pub struct Sender {
    network: Network,
    address: SocketAddr,
}

impl super::Sender for Sender {
    fn send(&self, to: SocketAddr, datagram: Bytes) -> Result<(), Error> {
        self.network
            .inner
            .lock()
            .unwrap()
            .deliver(self.address, to, datagram, true);
        Ok(())
    }
}

/// Receiving half of a simulated endpoint.
pub struct Receiver {
    receiver: mpsc::UnboundedReceiver<(SocketAddr, Bytes)>,
}

impl super::Receiver for Receiver {
    fn recv(&mut self) -> impl Future<Output = Result<(SocketAddr, Bytes), Error>> + Send {
        async move { self.receiver.next().await.ok_or(Error::Closed) }
    }
}
