//! Exchange pings with a static set of peers over encrypted datagrams.
//!
//! Every second, each participant sends `ping <n>` to every peer it knows about and logs the
//! pings it receives. Peers that are offline are retried until they come up; pings that could
//! not be delivered are logged once the session to that peer breaks.
//!
//! # Usage (Run at Least 2)
//!
//! _To run this example, you must first install [Rust](https://www.rust-lang.org/tools/install)._
//!
//! ## Participant 1
//!
//! ```sh
//! cargo run --release --bin commonware-ping -- --me 1@3001 --peers 2@127.0.0.1:3002,3@127.0.0.1:3003
//! ```
//!
//! ## Participant 2
//!
//! ```sh
//! cargo run --release --bin commonware-ping -- --me 2@3002 --peers 1@127.0.0.1:3001,3@127.0.0.1:3003
//! ```
//!
//! ## Participant 3
//!
//! ```sh
//! cargo run --release --bin commonware-ping -- --me 3@3003 --peers 1@127.0.0.1:3001,2@127.0.0.1:3002
//! ```

use bytes::Bytes;
use clap::{value_parser, Arg, Command};
use commonware_datagram::{
    crypto::{ed25519::PrivateKey, Identity},
    directory::{Directory, Peer},
    socket::udp,
    Actor, Config, Handler, PeerId,
};
use commonware_runtime::{tokio, Clock, Metrics, Runner};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};
use tracing::{info, warn};

/// Unique namespace to avoid message replay attacks.
const APPLICATION_NAMESPACE: &[u8] = b"_COMMONWARE_PING";

/// Interval between pings.
const PING_INTERVAL: Duration = Duration::from_secs(1);

/// Logs pings received from peers.
struct Logger;

impl Handler for Logger {
    fn received(&mut self, peer: PeerId, payload: Bytes) {
        info!(peer, msg = %String::from_utf8_lossy(&payload), "received");
    }

    fn broken(&mut self, peer: PeerId, undelivered: Vec<Bytes>) {
        warn!(peer, undelivered = undelivered.len(), "session broken");
    }
}

fn main() {
    // Parse arguments
    let matches = Command::new("commonware-ping")
        .about("exchange pings with peers over encrypted datagrams")
        .arg(Arg::new("me").long("me").required(true))
        .arg(
            Arg::new("peers")
                .long("peers")
                .required(true)
                .value_delimiter(',')
                .value_parser(value_parser!(String)),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .required(false)
                .default_value("info")
                .value_parser(value_parser!(String)),
        )
        .get_matches();

    // Create logger
    let level = matches
        .get_one::<String>("log-level")
        .expect("Please provide log level");
    let level = tracing::Level::from_str(level).expect("Invalid log level");
    tracing_subscriber::fmt().with_max_level(level).init();

    // Configure my identity
    let me = matches
        .get_one::<String>("me")
        .expect("Please provide identity");
    let parts = me.split('@').collect::<Vec<&str>>();
    if parts.len() != 2 {
        panic!("Identity not well-formed");
    }
    let id = parts[0].parse::<PeerId>().expect("Id not well-formed");
    let signer = PrivateKey::from_seed(id as u64);
    info!(id, key = ?signer.public_key(), "loaded signer");

    // Configure my port
    let port = parts[1].parse::<u16>().expect("Port not well-formed");
    let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    info!(port, "loaded port");

    // Configure peers
    let mut directory = Directory::default();
    let mut recipients = Vec::new();
    for peer in matches
        .get_many::<String>("peers")
        .expect("Please provide peers")
    {
        let parts = peer.split('@').collect::<Vec<&str>>();
        if parts.len() != 2 {
            panic!("Peer not well-formed");
        }
        let peer = parts[0].parse::<PeerId>().expect("Peer id not well-formed");
        let peer_address = SocketAddr::from_str(parts[1]).expect("Peer address not well-formed");
        directory
            .add(Peer {
                id: peer,
                public_key: PrivateKey::from_seed(peer as u64).public_key(),
                address: peer_address,
            })
            .expect("Peer listed twice");
        info!(peer, address = ?peer_address, "registered peer");
        recipients.push(peer);
    }

    // Start runtime
    let executor = tokio::Runner::default();
    executor.start(|context| async move {
        let (sender, receiver) = udp::bind(context.with_label("socket"), address)
            .await
            .expect("Failed to bind socket");
        let cfg = Config::recommended(signer, APPLICATION_NAMESPACE, id, directory);
        let (actor, mut mailbox) = Actor::new(context.with_label("adapter"), cfg, sender);
        let _handle = actor.start(receiver, Logger);

        let mut count = 0u64;
        loop {
            for peer in &recipients {
                let ping = Bytes::from(format!("ping {count}"));
                if let Err(err) = mailbox.send(*peer, ping).await {
                    warn!(peer, ?err, "failed to send ping");
                }
            }
            count += 1;
            context.sleep(PING_INTERVAL).await;
        }
    });
}
