use crate::{Error, PeerId};
use bytes::Bytes;
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};

/// Receives payloads delivered by the adapter.
///
/// Callbacks run on the adapter's task and should return quickly.
pub trait Handler: Send + 'static {
    /// Called once for every payload received from `peer`.
    fn received(&mut self, peer: PeerId, payload: Bytes);

    /// Called when the session to `peer` gave up on delivering `undelivered`.
    ///
    /// The session renegotiates on its own and later payloads are still attempted.
    fn broken(&mut self, peer: PeerId, undelivered: Vec<Bytes>) {
        let _ = (peer, undelivered);
    }
}

impl<F> Handler for F
where
    F: FnMut(PeerId, Bytes) + Send + 'static,
{
    fn received(&mut self, peer: PeerId, payload: Bytes) {
        self(peer, payload)
    }
}

/// Messages that can be sent to the adapter.
pub enum Message {
    /// Deliver `payload` to `peer`.
    Send {
        peer: PeerId,
        payload: Bytes,
        response: oneshot::Sender<Result<(), Error>>,
    },

    /// Replace the handler receiving inbound payloads.
    SetHandler {
        handler: Box<dyn Handler>,
        response: oneshot::Sender<()>,
    },

    /// Stop the adapter.
    Shutdown,
}

/// A way to send messages to the adapter.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
    max_payload: usize,
}

impl Mailbox {
    /// Create a new mailbox.
    pub(super) fn new(sender: mpsc::Sender<Message>, max_payload: usize) -> Self {
        Self {
            sender,
            max_payload,
        }
    }

    /// Largest payload accepted by [Mailbox::send].
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Send `payload` to `peer`.
    ///
    /// Returns once the payload is either on the wire or queued behind the handshake. Payloads
    /// larger than [Mailbox::max_payload] are rejected before reaching the adapter.
    pub async fn send(&mut self, peer: PeerId, payload: Bytes) -> Result<(), Error> {
        if payload.len() > self.max_payload {
            return Err(Error::PacketTooLarge(payload.len()));
        }
        let (response, receiver) = oneshot::channel();
        self.sender
            .send(Message::Send {
                peer,
                payload,
                response,
            })
            .await
            .map_err(|_| Error::Closed)?;
        receiver.await.map_err(|_| Error::Closed)?
    }

    /// Replace the handler receiving inbound payloads.
    ///
    /// Returns once the previous handler has been dropped, so every later delivery reaches
    /// `handler`.
    pub async fn set_handler(&mut self, handler: impl Handler) -> Result<(), Error> {
        let (response, receiver) = oneshot::channel();
        self.sender
            .send(Message::SetHandler {
                handler: Box::new(handler),
                response,
            })
            .await
            .map_err(|_| Error::Closed)?;
        receiver.await.map_err(|_| Error::Closed)
    }

    /// Stop the adapter.
    ///
    /// Pending payloads are dropped.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.sender
            .send(Message::Shutdown)
            .await
            .map_err(|_| Error::Closed)
    }
}
