//! Exchange encrypted, acknowledged datagrams with authenticated peers.
//!
//! Each participant is known to the others by a numeric [PeerId], a long-lived public key, and a
//! socket address (see [directory]). Before any payload is sent to a peer, the two run a
//! four-message handshake over the same unreliable transport: the initiator's `HELLO` is answered
//! with a signed nonce (`WELCOME`), the initiator proves it holds that nonce (`KEY_REQ`), and the
//! responder returns a fresh session key sealed to the initiator (`SESSION`). Payloads are then
//! encrypted under that key, retransmitted with backoff until acknowledged, and delivered to the
//! receiving application at most once.
//!
//! Every datagram fits in a single UDP packet of at most [config::MAX_PACKET_SIZE] bytes, so
//! payloads are limited to [Config::max_payload] bytes and are never fragmented.
//!
//! # Status
//!
//! `commonware-datagram` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.
//!
//! # Example
//!
//! ```rust,no_run
//! use commonware_datagram::{
//!     crypto::{ed25519::PrivateKey, Identity},
//!     directory::{Directory, Peer},
//!     socket::udp,
//!     Actor, Config,
//! };
//! use commonware_runtime::{tokio, Metrics, Runner};
//! use std::net::SocketAddr;
//!
//! let executor = tokio::Runner::default();
//! executor.start(|context| async move {
//!     // In production, keys are generated from a secure source of entropy
//!     let me: SocketAddr = "127.0.0.1:3001".parse().unwrap();
//!     let other: SocketAddr = "127.0.0.1:3002".parse().unwrap();
//!     let directory = Directory::new([
//!         Peer { id: 1, public_key: PrivateKey::from_seed(1).public_key(), address: me },
//!         Peer { id: 2, public_key: PrivateKey::from_seed(2).public_key(), address: other },
//!     ])
//!     .unwrap();
//!     let cfg = Config::recommended(PrivateKey::from_seed(1), b"my-app", 1, directory);
//!
//!     let (sender, receiver) = udp::bind(context.with_label("socket"), me).await.unwrap();
//!     let (actor, mut mailbox) = Actor::new(context.with_label("adapter"), cfg, sender);
//!     actor.start(receiver, |peer: u32, payload: bytes::Bytes| {
//!         println!("{peer}: {payload:?}");
//!     });
//!
//!     mailbox.send(2, "hello".into()).await.unwrap();
//! });
//! ```

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

pub mod adapter;
pub mod config;
pub mod crypto;
pub mod directory;
mod dupes;
mod handshake;
pub mod packet;
mod reader;
mod retransmit;
mod session;
pub mod socket;

pub use adapter::{Actor, Handler, Mailbox};
pub use config::Config;

use packet::Kind;
use thiserror::Error;

/// Identifier of a participant.
pub type PeerId = u32;

/// Errors that can occur when interacting with the adapter.
#[derive(Error, Debug)]
pub enum Error {
    #[error("packet too large: {0}")]
    PacketTooLarge(usize),
    #[error("queue full: {0}")]
    QueueFull(PeerId),
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),
    #[error("duplicate peer: {0}")]
    DuplicatePeer(PeerId),
    #[error("malformed packet: {0}")]
    Malformed(#[from] commonware_codec::Error),
    #[error("misdirected packet: {0}")]
    Misdirected(PeerId),
    #[error("replayed packet: {0}")]
    Replay(u64),
    #[error("unexpected packet: {0:?}")]
    Unexpected(Kind),
    #[error("no session: {0}")]
    NoSession(PeerId),
    #[error("checksum mismatch")]
    Checksum,
    #[error("authentication failed")]
    AuthFailure,
    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::Error),
    #[error("socket error: {0}")]
    Socket(#[from] socket::Error),
    #[error("adapter closed")]
    Closed,
}
