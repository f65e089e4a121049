//! Track sent packets until they are acknowledged, re-sending them with backoff.

use crate::packet::{Kind, Packet};
use bytes::Bytes;
use rand::Rng;
use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime},
};

/// Configuration for a [Retransmitter].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Base delay before the first retransmission.
    pub interval: Duration,

    /// Growth of the delay per attempt, relative to `max_attempts`.
    pub backoff: u32,

    /// Retransmissions attempted before a packet is given up on.
    pub max_attempts: u32,
}

/// A packet awaiting acknowledgment.
#[derive(Clone, Debug)]
pub struct Entry {
    pub packet: Packet,

    /// Retransmissions performed so far.
    pub attempts: u32,

    /// Application payload carried by a `DATA` packet, kept for requeueing and reporting.
    pub original: Option<Bytes>,

    /// When the packet should next be re-sent.
    pub due: SystemTime,

    order: u64,
}

/// Result of [Retransmitter::tick].
#[derive(Debug, Default)]
pub struct Tick {
    /// Packets to put back on the wire.
    pub resend: Vec<Packet>,

    /// Entries that ran out of attempts and were removed.
    pub exhausted: Vec<Entry>,
}

/// Set of unacknowledged packets keyed by sequence number.
#[derive(Debug)]
pub struct Retransmitter {
    cfg: Config,
    entries: BTreeMap<u64, Entry>,
    registered: u64,
}

impl Retransmitter {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            entries: BTreeMap::new(),
            registered: 0,
        }
    }

    /// Delay before the retransmission following `attempts` prior ones, without jitter.
    fn backoff(&self, attempts: u32) -> Duration {
        let max_attempts = self.cfg.max_attempts.max(1);
        let scaled = attempts
            .saturating_mul(self.cfg.backoff)
            .saturating_add(max_attempts);
        self.cfg.interval * scaled / max_attempts
    }

    fn next_due<R: Rng>(&self, rng: &mut R, attempts: u32, now: SystemTime) -> SystemTime {
        let base = self.backoff(attempts);
        let millis = base.as_millis().max(1) as u64;
        let jitter = Duration::from_millis(rng.gen_range(0..millis));
        now + base + jitter
    }

    /// Track `packet` until it is acknowledged.
    pub fn register<R: Rng>(
        &mut self,
        rng: &mut R,
        now: SystemTime,
        packet: Packet,
        original: Option<Bytes>,
    ) {
        let due = self.next_due(rng, 0, now);
        let order = self.registered;
        self.registered += 1;
        self.entries.insert(
            packet.sequence,
            Entry {
                packet,
                attempts: 0,
                original,
                due,
                order,
            },
        );
    }

    /// Stop tracking `sequence`, returning its entry if it was pending.
    pub fn acknowledge(&mut self, sequence: u64) -> Option<Entry> {
        self.entries.remove(&sequence)
    }

    /// Returns whether a `DATA` packet with `sequence` is pending.
    pub fn is_pending_data(&self, sequence: u64) -> bool {
        self.entries
            .get(&sequence)
            .is_some_and(|entry| entry.packet.kind() == Kind::Data)
    }

    /// Stop tracking every handshake packet.
    pub fn clear_handshake(&mut self) {
        self.entries.retain(|_, entry| entry.packet.kind() == Kind::Data);
    }

    fn take_data(&mut self) -> Vec<(u64, Bytes)> {
        let mut taken = Vec::new();
        self.entries.retain(|_, entry| {
            if entry.packet.kind() != Kind::Data {
                return true;
            }
            if let Some(original) = entry.original.take() {
                taken.push((entry.order, original));
            }
            false
        });
        taken
    }

    /// Remove every pending `DATA` packet, returning the payloads in the order they were sent.
    pub fn drain_data(&mut self) -> Vec<Bytes> {
        self.abandon(Vec::new())
    }

    /// Like [Retransmitter::drain_data], also including the payloads of `exhausted` entries.
    pub fn abandon(&mut self, exhausted: Vec<Entry>) -> Vec<Bytes> {
        let mut abandoned = self.take_data();
        abandoned.extend(
            exhausted
                .into_iter()
                .filter_map(|entry| entry.original.map(|original| (entry.order, original))),
        );
        abandoned.sort_by_key(|(order, _)| *order);
        abandoned
            .into_iter()
            .map(|(_, original)| original)
            .collect()
    }

    /// Number of pending packets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect every packet due at `now`.
    ///
    /// Packets are rescheduled with an increased delay. Packets already re-sent `max_attempts`
    /// times are removed and returned as exhausted instead.
    pub fn tick<R: Rng>(&mut self, rng: &mut R, now: SystemTime) -> Tick {
        let mut tick = Tick::default();
        let due: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.due <= now)
            .map(|(sequence, _)| *sequence)
            .collect();
        for sequence in due {
            let Some(attempts) = self.entries.get(&sequence).map(|entry| entry.attempts) else {
                continue;
            };
            if attempts >= self.cfg.max_attempts {
                if let Some(entry) = self.entries.remove(&sequence) {
                    tick.exhausted.push(entry);
                }
                continue;
            }
            let due = self.next_due(rng, attempts + 1, now);
            if let Some(entry) = self.entries.get_mut(&sequence) {
                entry.attempts += 1;
                entry.due = due;
                tick.resend.push(entry.packet.clone());
            }
        }
        tick
    }
}
