use crate::{crypto::Identity, directory::Directory, packet, reader, retransmit, session, PeerId};
use std::time::Duration;

/// Largest datagram sent or accepted.
pub const MAX_PACKET_SIZE: usize = 512;

/// Interval at which timers are checked.
pub const TICK: Duration = Duration::from_millis(250);

/// Base delay before a packet is re-sent.
pub const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(250);

/// Growth of the retransmission delay per attempt.
pub const BACKOFF_FACTOR: u32 = 4;

/// Retransmissions attempted before a packet is given up on.
pub const MAX_RETRANSMIT_ATTEMPTS: u32 = 20;

/// Unacknowledged packets per peer at which new payloads are held back.
pub const MAX_RETRANSMIT_BACKLOG: usize = 5_000;

/// Bytes of payload per peer that may wait for a session.
pub const MAX_QUEUE_SIZE: usize = 5_000_000;

/// Time allowed for a handshake before it is restarted.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the adapter.
///
/// # Warning
/// It is recommended to synchronize this configuration across peers in the network (with the
/// exception of `crypto`, `me`, `mailbox_size`, and `max_queue_size`). If this is not
/// synchronized, packets could be rejected as oversized, handshakes could time out before the
/// peer answers, and/or replayed packets could outlive the duplicate window.
#[derive(Clone)]
pub struct Config<C: Identity> {
    /// Cryptographic primitives.
    pub crypto: C,

    /// Identifier of the local participant.
    pub me: PeerId,

    /// Participants datagrams may be exchanged with.
    pub directory: Directory<C::PublicKey>,

    /// Prefix for all signed messages to avoid replay attacks.
    pub namespace: Vec<u8>,

    /// Message backlog allowed for the adapter's mailbox.
    ///
    /// When there are more messages in the mailbox than this value, any caller
    /// sending a message will be blocked until the mailbox is processed.
    pub mailbox_size: usize,

    /// Largest datagram sent or accepted.
    ///
    /// The largest payload accepted by [crate::Mailbox::send] is smaller, see
    /// [Config::max_payload].
    pub max_packet_size: usize,

    /// Interval at which timers are checked.
    pub tick: Duration,

    /// Base delay before a packet is re-sent.
    pub retransmit_interval: Duration,

    /// Growth of the retransmission delay per attempt.
    pub backoff_factor: u32,

    /// Retransmissions attempted before a packet is given up on.
    ///
    /// Giving up on a `DATA` packet breaks the session.
    pub max_retransmit_attempts: u32,

    /// Unacknowledged packets per peer at which new payloads are queued instead of sent.
    pub max_retransmit_backlog: usize,

    /// Bytes of payload per peer that may wait to be sent.
    ///
    /// Sends that would exceed this fail with [crate::Error::QueueFull].
    pub max_queue_size: usize,

    /// Time allowed for a handshake before it is restarted.
    pub handshake_timeout: Duration,
}

impl<C: Identity> Config<C> {
    /// Generates a configuration with reasonable defaults for usage in production.
    pub fn recommended(
        crypto: C,
        namespace: &[u8],
        me: PeerId,
        directory: Directory<C::PublicKey>,
    ) -> Self {
        Self {
            crypto,
            me,
            directory,
            namespace: namespace.to_vec(),

            mailbox_size: 1_000,
            max_packet_size: MAX_PACKET_SIZE,
            tick: TICK,
            retransmit_interval: RETRANSMIT_INTERVAL,
            backoff_factor: BACKOFF_FACTOR,
            max_retransmit_attempts: MAX_RETRANSMIT_ATTEMPTS,
            max_retransmit_backlog: MAX_RETRANSMIT_BACKLOG,
            max_queue_size: MAX_QUEUE_SIZE,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn test(crypto: C, me: PeerId, directory: Directory<C::PublicKey>) -> Self {
        Self {
            crypto,
            me,
            directory,
            namespace: b"test_namespace".to_vec(),

            mailbox_size: 1_024,
            max_packet_size: MAX_PACKET_SIZE,
            tick: TICK,
            retransmit_interval: RETRANSMIT_INTERVAL,
            backoff_factor: BACKOFF_FACTOR,
            max_retransmit_attempts: MAX_RETRANSMIT_ATTEMPTS,
            max_retransmit_backlog: MAX_RETRANSMIT_BACKLOG,
            max_queue_size: MAX_QUEUE_SIZE,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Largest payload that fits in a single datagram.
    pub fn max_payload(&self) -> usize {
        packet::max_payload(self.max_packet_size)
    }

    /// Period after which the oldest generation of seen sequence numbers is forgotten.
    ///
    /// A sequence number is remembered for longer than any packet can be retransmitted.
    pub fn dupe_rotation(&self) -> Duration {
        self.retransmit_interval * 2 * self.backoff_factor * self.max_retransmit_attempts
    }

    pub(crate) fn retransmit(&self) -> retransmit::Config {
        retransmit::Config {
            interval: self.retransmit_interval,
            backoff: self.backoff_factor,
            max_attempts: self.max_retransmit_attempts,
        }
    }

    pub(crate) fn session(&self) -> session::Config {
        session::Config {
            handshake_timeout: self.handshake_timeout,
            max_queue_size: self.max_queue_size,
            max_retransmit_backlog: self.max_retransmit_backlog,
            retransmit: self.retransmit(),
        }
    }

    pub(crate) fn reader(&self) -> reader::Config {
        reader::Config {
            handshake_timeout: self.handshake_timeout,
            retransmit: self.retransmit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ed25519::PrivateKey;

    #[test]
    fn test_derived() {
        let cfg = Config::recommended(
            PrivateKey::from_seed(0),
            b"namespace",
            1,
            Directory::default(),
        );
        assert_eq!(cfg.max_payload(), 449);
        assert_eq!(cfg.dupe_rotation(), Duration::from_secs(40));
    }
}
