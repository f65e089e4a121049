use crate::{packet::Kind, Error};
use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Packet {
    pub kind: String,
}

impl Packet {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Dropped {
    pub reason: String,
}

impl Dropped {
    pub fn new(error: &Error) -> Self {
        let reason = match error {
            Error::Malformed(_) | Error::PacketTooLarge(_) => "malformed",
            Error::Misdirected(_) => "misdirected",
            Error::UnknownPeer(_) => "unknown_peer",
            Error::Replay(_) => "replay",
            Error::Checksum => "checksum",
            Error::AuthFailure => "auth_failure",
            Error::Unexpected(_) => "unexpected",
            Error::NoSession(_) => "no_session",
            Error::Crypto(_) => "crypto",
            Error::Socket(_) => "socket",
            Error::QueueFull(_) => "queue_full",
            Error::DuplicatePeer(_) => "duplicate_peer",
            Error::Closed => "closed",
        };
        Self {
            reason: reason.to_string(),
        }
    }
}

/// Metrics for the [`Actor`](super::Actor)
#[derive(Default, Clone)]
pub struct Metrics {
    /// Number of packets sent per kind
    pub sent: Family<Packet, Counter>,

    /// Number of well-formed packets received per kind
    pub received: Family<Packet, Counter>,

    /// Number of inbound datagrams (or outbound packets) dropped per reason
    pub dropped: Family<Dropped, Counter>,

    /// Number of packets re-sent after going unacknowledged
    pub retransmitted: Counter,

    /// Number of payloads handed to the application
    pub delivered: Counter,

    /// Number of handshakes started (including restarts)
    pub handshakes_started: Counter,

    /// Number of outbound sessions that received a session key
    pub sessions_established: Counter,

    /// Number of inbound sessions that issued a session key
    pub sessions_accepted: Counter,

    /// Number of outbound sessions that gave up on a payload
    pub sessions_broken: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register(
            "packets_sent",
            "Number of packets sent per kind",
            metrics.sent.clone(),
        );
        context.register(
            "packets_received",
            "Number of well-formed packets received per kind",
            metrics.received.clone(),
        );
        context.register(
            "packets_dropped",
            "Number of packets dropped per reason",
            metrics.dropped.clone(),
        );
        context.register(
            "retransmitted",
            "Number of packets re-sent after going unacknowledged",
            metrics.retransmitted.clone(),
        );
        context.register(
            "delivered",
            "Number of payloads handed to the application",
            metrics.delivered.clone(),
        );
        context.register(
            "handshakes_started",
            "Number of handshakes started (including restarts)",
            metrics.handshakes_started.clone(),
        );
        context.register(
            "sessions_established",
            "Number of outbound sessions that received a session key",
            metrics.sessions_established.clone(),
        );
        context.register(
            "sessions_accepted",
            "Number of inbound sessions that issued a session key",
            metrics.sessions_accepted.clone(),
        );
        context.register(
            "sessions_broken",
            "Number of outbound sessions that gave up on a payload",
            metrics.sessions_broken.clone(),
        );
        metrics
    }

    pub fn record_drop(&self, error: &Error) {
        self.dropped.get_or_create(&Dropped::new(error)).inc();
    }
}
