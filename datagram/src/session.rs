//! Outbound half of a peer relationship.
//!
//! A [Session] is created the first time the application sends to a peer. It runs the initiator
//! side of the handshake (`HELLO`, then `KEY_REQ` once `WELCOME` arrives) and, once the peer
//! returns a session key, seals queued payloads into `DATA` packets until each is acknowledged.

use crate::{
    crypto::{cipher::Key, cipher::KEY_LENGTH, Identity},
    dupes::DupeWindow,
    handshake::{self, Local, Part, Parts},
    packet::{self, Body, Kind, Nonce, Packet, NONCE_LENGTH},
    retransmit::{self, Retransmitter},
    Error, PeerId,
};
use bytes::Bytes;
use rand::{CryptoRng, Rng};
use std::{
    collections::VecDeque,
    time::{Duration, SystemTime},
};

/// Configuration for a [Session].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Time allowed for a handshake before it is restarted.
    pub handshake_timeout: Duration,

    /// Maximum bytes of payload waiting to be sent.
    pub max_queue_size: usize,

    /// Pending packets at which new payloads wait in the queue.
    pub max_retransmit_backlog: usize,

    pub retransmit: retransmit::Config,
}

/// Position in the initiator handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Init,
    AwaitingWelcome,
    AwaitingSessionKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Handshaking(Step),
    Exchanging,
}

/// Result of [Session::tick].
#[derive(Debug, Default)]
pub struct Tick {
    /// Packets to send to the peer.
    pub packets: Vec<Packet>,

    /// Number of `packets` that are retransmissions.
    pub retransmitted: usize,

    /// Whether the handshake timed out and was restarted.
    pub restarted: bool,

    /// Payloads dropped because the session broke.
    pub broken: Option<Vec<Bytes>>,
}

/// Initiator state for a single peer.
pub struct Session {
    peer: PeerId,
    cfg: Config,
    state: State,

    local_nonce: Option<Nonce>,
    key: Option<Key>,
    parts: Parts,
    deadline: SystemTime,

    queue: VecDeque<Bytes>,
    queued: usize,

    pub retransmitter: Retransmitter,
    pub dupes: DupeWindow,
}

impl Session {
    pub fn new(peer: PeerId, cfg: Config, now: SystemTime) -> Self {
        Self {
            peer,
            cfg,
            state: State::Handshaking(Step::Init),
            local_nonce: None,
            key: None,
            parts: Parts::default(),
            deadline: now + cfg.handshake_timeout,
            queue: VecDeque::new(),
            queued: 0,
            retransmitter: Retransmitter::new(cfg.retransmit),
            dupes: DupeWindow::new(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_exchanging(&self) -> bool {
        self.state == State::Exchanging
    }

    /// Bytes of payload waiting to be sealed.
    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Start (or restart) the handshake, returning the `HELLO` to send.
    ///
    /// Any partially negotiated state is discarded. Pending `DATA` packets are left alone.
    pub fn hello<R: Rng + CryptoRng, C: Identity>(
        &mut self,
        rng: &mut R,
        local: &mut Local<C>,
        remote: &C::PublicKey,
        now: SystemTime,
    ) -> Result<Packet, Error> {
        let nonce = handshake::nonce(rng);
        let sealed = C::seal(rng, remote, &nonce)?;

        self.retransmitter.clear_handshake();
        self.parts.clear();
        self.key = None;
        self.local_nonce = None;

        let packet = local.packet(self.peer, Body::Hello(sealed));
        self.retransmitter.register(rng, now, packet.clone(), None);
        self.state = State::Handshaking(Step::AwaitingWelcome);
        self.deadline = now + self.cfg.handshake_timeout;
        Ok(packet)
    }

    /// Restart the handshake, putting every in-flight payload back at the head of the queue.
    pub fn restart<R: Rng + CryptoRng, C: Identity>(
        &mut self,
        rng: &mut R,
        local: &mut Local<C>,
        remote: &C::PublicKey,
        now: SystemTime,
    ) -> Result<Packet, Error> {
        for payload in self.retransmitter.drain_data().into_iter().rev() {
            self.queued += payload.len();
            self.queue.push_front(payload);
        }
        self.hello(rng, local, remote, now)
    }

    /// Handle a `WELCOME`, returning both parts of the `KEY_REQ`.
    pub fn on_welcome<R: Rng + CryptoRng, C: Identity>(
        &mut self,
        rng: &mut R,
        local: &mut Local<C>,
        remote: &C::PublicKey,
        nonce: Nonce,
        signature: &[u8],
        now: SystemTime,
    ) -> Result<Vec<Packet>, Error> {
        if self.state != State::Handshaking(Step::AwaitingWelcome) {
            return Err(Error::Unexpected(Kind::Welcome));
        }
        if !local.verify(remote, Kind::Welcome, self.peer, &nonce, signature) {
            return Err(Error::AuthFailure);
        }
        self.retransmitter.clear_handshake();

        let local_nonce = handshake::nonce(rng);
        let mut plaintext = Vec::with_capacity(2 * NONCE_LENGTH);
        plaintext.extend_from_slice(&local_nonce);
        plaintext.extend_from_slice(&nonce);
        let ciphertext = C::seal(rng, remote, &plaintext)?;
        let signature = local.sign(Kind::KeyRequestPart1, self.peer, &ciphertext);

        let part1 = local.packet(self.peer, Body::KeyRequestPart1(ciphertext));
        let part2 = local.packet(
            self.peer,
            Body::KeyRequestPart2 {
                part1: part1.sequence,
                signature,
            },
        );
        self.retransmitter.register(rng, now, part1.clone(), None);
        self.retransmitter.register(rng, now, part2.clone(), None);

        self.local_nonce = Some(local_nonce);
        self.state = State::Handshaking(Step::AwaitingSessionKey);
        Ok(vec![part1, part2])
    }

    /// Handle one part of a `SESSION` message.
    ///
    /// Once both parts are held and valid the session key is installed, the `SESSION_ACK` is
    /// returned along with `DATA` for any queued payloads.
    pub fn on_session<R: Rng + CryptoRng, C: Identity>(
        &mut self,
        rng: &mut R,
        local: &mut Local<C>,
        remote: &C::PublicKey,
        part: Part,
        now: SystemTime,
    ) -> Result<Vec<Packet>, Error> {
        if self.state == State::Exchanging {
            return Ok(vec![self.session_ack(rng, local)?]);
        }
        if self.state != State::Handshaking(Step::AwaitingSessionKey) {
            let kind = match part {
                Part::First { .. } => Kind::SessionPart1,
                Part::Second { .. } => Kind::SessionPart2,
            };
            return Err(Error::Unexpected(kind));
        }
        let Some((ciphertext, signature)) = self.parts.insert(part) else {
            return Ok(Vec::new());
        };
        if !local.verify(remote, Kind::SessionPart1, self.peer, &ciphertext, &signature) {
            return Err(Error::AuthFailure);
        }
        let plaintext = local
            .crypto
            .open(&ciphertext)
            .map_err(|_| Error::AuthFailure)?;
        if plaintext.len() != KEY_LENGTH + NONCE_LENGTH {
            return Err(Error::AuthFailure);
        }
        let (key, echoed) = plaintext.split_at(KEY_LENGTH);
        if self.local_nonce.as_ref().map(|nonce| &nonce[..]) != Some(echoed) {
            return Err(Error::AuthFailure);
        }

        self.key = Some(Key::from_slice(key)?);
        self.state = State::Exchanging;
        self.retransmitter.clear_handshake();
        self.local_nonce = None;

        let mut packets = vec![self.session_ack(rng, local)?];
        packets.extend(self.flush(rng, local, now)?);
        Ok(packets)
    }

    /// Build a `SESSION_ACK` sealed under the session key.
    fn session_ack<R: Rng + CryptoRng, C: Identity>(
        &self,
        rng: &mut R,
        local: &mut Local<C>,
    ) -> Result<Packet, Error> {
        let key = self.key.as_ref().ok_or(Error::NoSession(self.peer))?;
        let sequence = local.next_sequence();
        let header = packet::header(Kind::SessionAck, sequence, local.id, self.peer);
        let body = packet::seal_session_ack(rng, key, &header)?;
        Ok(Packet {
            sequence,
            sender: local.id,
            receiver: self.peer,
            body: Body::SessionAck(body),
        })
    }

    /// Accept `payload` for delivery, returning a `DATA` packet if it can be sent immediately.
    pub fn send<R: Rng + CryptoRng, C: Identity>(
        &mut self,
        rng: &mut R,
        local: &mut Local<C>,
        payload: Bytes,
        now: SystemTime,
    ) -> Result<Option<Packet>, Error> {
        if self.state != State::Exchanging
            || !self.queue.is_empty()
            || self.retransmitter.len() >= self.cfg.max_retransmit_backlog
        {
            if self.queued + payload.len() > self.cfg.max_queue_size {
                return Err(Error::QueueFull(self.peer));
            }
            self.queued += payload.len();
            self.queue.push_back(payload);
            return Ok(None);
        }
        self.seal(rng, local, payload, now).map(Some)
    }

    /// Seal queued payloads while the backlog allows.
    pub fn flush<R: Rng + CryptoRng, C: Identity>(
        &mut self,
        rng: &mut R,
        local: &mut Local<C>,
        now: SystemTime,
    ) -> Result<Vec<Packet>, Error> {
        let mut packets = Vec::new();
        if self.state != State::Exchanging {
            return Ok(packets);
        }
        while self.retransmitter.len() < self.cfg.max_retransmit_backlog {
            let Some(payload) = self.queue.pop_front() else {
                break;
            };
            self.queued -= payload.len();
            packets.push(self.seal(rng, local, payload, now)?);
        }
        Ok(packets)
    }

    fn seal<R: Rng + CryptoRng, C: Identity>(
        &mut self,
        rng: &mut R,
        local: &mut Local<C>,
        payload: Bytes,
        now: SystemTime,
    ) -> Result<Packet, Error> {
        let key = self.key.as_ref().ok_or(Error::NoSession(self.peer))?;
        let sequence = local.next_sequence();
        let header = packet::header(Kind::Data, sequence, local.id, self.peer);
        let body = packet::seal_data(rng, key, &header, &payload)?;
        let packet = Packet {
            sequence,
            sender: local.id,
            receiver: self.peer,
            body: Body::Data(body),
        };
        self.retransmitter.register(rng, now, packet.clone(), Some(payload));
        Ok(packet)
    }

    /// Handle an `ACK` with the given header, returning the acknowledged sequence.
    pub fn on_ack(&mut self, header: &[u8], body: &[u8]) -> Result<u64, Error> {
        let key = self.key.as_ref().ok_or(Error::NoSession(self.peer))?;
        let acknowledged = packet::open_ack(key, header, body)?;
        self.retransmitter.acknowledge(acknowledged);
        Ok(acknowledged)
    }

    /// Handle the `NACK` with `sequence`, restarting the handshake if it refers to a pending
    /// `DATA` packet.
    ///
    /// The signature is only checked for a `NACK` that would restart the session.
    #[allow(clippy::too_many_arguments)]
    pub fn on_nack<R: Rng + CryptoRng, C: Identity>(
        &mut self,
        rng: &mut R,
        local: &mut Local<C>,
        remote: &C::PublicKey,
        sequence: u64,
        nacked: u64,
        signature: &[u8],
        now: SystemTime,
    ) -> Result<Option<Packet>, Error> {
        if self.state != State::Exchanging || !self.retransmitter.is_pending_data(nacked) {
            return Ok(None);
        }
        if !local.verify_nack(remote, self.peer, sequence, nacked, signature) {
            return Err(Error::AuthFailure);
        }
        self.restart(rng, local, remote, now).map(Some)
    }

    /// Advance timers.
    pub fn tick<R: Rng + CryptoRng, C: Identity>(
        &mut self,
        rng: &mut R,
        local: &mut Local<C>,
        remote: &C::PublicKey,
        now: SystemTime,
    ) -> Result<Tick, Error> {
        let mut tick = Tick::default();
        if matches!(self.state, State::Handshaking(_)) && now >= self.deadline {
            tick.packets.push(self.restart(rng, local, remote, now)?);
            tick.restarted = true;
        }

        let retransmit = self.retransmitter.tick(rng, now);
        tick.retransmitted = retransmit.resend.len();
        tick.packets.extend(retransmit.resend);

        // Losing a DATA packet means the peer is unreachable or lost the session
        if retransmit
            .exhausted
            .iter()
            .any(|entry| entry.packet.kind() == Kind::Data)
        {
            tick.broken = Some(self.retransmitter.abandon(retransmit.exhausted));
            tick.packets.push(self.hello(rng, local, remote, now)?);
        }

        tick.packets.extend(self.flush(rng, local, now)?);
        Ok(tick)
    }
}
