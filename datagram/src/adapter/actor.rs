use super::{
    ingress::{Handler, Mailbox, Message},
    metrics::{self, Metrics},
};
use crate::{
    crypto::Identity,
    directory::Directory,
    handshake::{Local, Part},
    packet::{Body, Kind, Packet},
    reader::{self, SessionReader},
    session::{self, Session},
    socket::{self, Receiver, Sender},
    Config, Error, PeerId,
};
use bytes::Bytes;
use commonware_codec::{DecodeExt, Encode};
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics as RuntimeMetrics, Spawner};
use futures::{channel::mpsc, SinkExt, StreamExt};
use rand::{CryptoRng, Rng};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    net::SocketAddr,
    time::{Duration, SystemTime},
};
use tracing::{debug, info, warn};

/// Owns every session of the local participant.
pub struct Actor<
    E: Spawner + Clock + Rng + CryptoRng + RuntimeMetrics,
    C: Identity,
    S: Sender,
> {
    context: E,

    local: Local<C>,
    directory: Directory<C::PublicKey>,
    sender: S,

    session_cfg: session::Config,
    reader_cfg: reader::Config,
    tick: Duration,
    dupe_rotation: Duration,
    max_packet_size: usize,
    mailbox_size: usize,

    mailbox: mpsc::Receiver<Message>,

    /// Outbound sessions, created on first send.
    sessions: BTreeMap<PeerId, Session>,

    /// Inbound readers that have issued a session key.
    accepted: BTreeMap<PeerId, SessionReader>,

    /// Inbound readers still negotiating.
    candidates: BTreeMap<PeerId, SessionReader>,

    metrics: Metrics,
}

impl<E: Spawner + Clock + Rng + CryptoRng + RuntimeMetrics, C: Identity, S: Sender>
    Actor<E, C, S>
{
    /// Create a new adapter that transmits with `sender`.
    pub fn new(mut context: E, cfg: Config<C>, sender: S) -> (Self, Mailbox) {
        let (mailbox_sender, mailbox) = mpsc::channel(cfg.mailbox_size);

        // Start from a random sequence so a restarted adapter does not collide with what
        // peers remember of the previous one
        let first = context.gen::<u64>();
        let metrics = Metrics::init(context.clone());
        let actor = Self {
            local: Local::new(cfg.me, cfg.crypto.clone(), cfg.namespace.clone(), first),
            directory: cfg.directory.clone(),
            sender,
            session_cfg: cfg.session(),
            reader_cfg: cfg.reader(),
            tick: cfg.tick,
            dupe_rotation: cfg.dupe_rotation(),
            max_packet_size: cfg.max_packet_size,
            mailbox_size: cfg.mailbox_size,
            mailbox,
            sessions: BTreeMap::new(),
            accepted: BTreeMap::new(),
            candidates: BTreeMap::new(),
            metrics,
            context,
        };
        (actor, Mailbox::new(mailbox_sender, cfg.max_payload()))
    }

    /// Start the adapter, reading datagrams from `receiver` and delivering payloads to `handler`.
    pub fn start<R: Receiver>(mut self, receiver: R, handler: impl Handler) -> Handle<()> {
        self.context
            .with_label("adapter")
            .spawn(move |context| {
                self.context = context;
                self.run(receiver, Box::new(handler))
            })
    }

    async fn run<R: Receiver>(mut self, mut receiver: R, mut handler: Box<dyn Handler>) {
        // Forward datagrams from the socket
        let (mut inbound_sender, mut inbound) = mpsc::channel(self.mailbox_size);
        let receive_task = self
            .context
            .with_label("receiver")
            .spawn(move |_| async move {
                loop {
                    let datagram = match receiver.recv().await {
                        Ok(datagram) => datagram,
                        Err(socket::Error::Closed) => return,
                        Err(err) => {
                            warn!(?err, "failed to receive datagram");
                            continue;
                        }
                    };
                    if inbound_sender.send(datagram).await.is_err() {
                        return;
                    }
                }
            });

        let mut next_tick = self.context.current() + self.tick;
        let mut next_rotation = self.context.current() + self.dupe_rotation;
        loop {
            select! {
                _ = self.context.sleep_until(next_tick) => {
                    let now = self.context.current();
                    self.on_tick(now, handler.as_mut());
                    if now >= next_rotation {
                        self.rotate();
                        next_rotation = now + self.dupe_rotation;
                    }
                    next_tick = now + self.tick;
                },
                message = self.mailbox.next() => {
                    let Some(message) = message else {
                        debug!("mailbox closed, stopping adapter");
                        break;
                    };
                    match message {
                        Message::Send { peer, payload, response } => {
                            let result = self.send(peer, payload);
                            let _ = response.send(result);
                        }
                        Message::SetHandler { handler: replacement, response } => {
                            handler = replacement;
                            let _ = response.send(());
                        }
                        Message::Shutdown => {
                            debug!("shutdown requested, stopping adapter");
                            break;
                        }
                    }
                },
                datagram = inbound.next() => {
                    let Some((from, datagram)) = datagram else {
                        debug!("socket closed, stopping adapter");
                        break;
                    };
                    if let Err(err) = self.receive(datagram, handler.as_mut()) {
                        debug!(?from, ?err, "dropped datagram");
                        self.metrics.record_drop(&err);
                    }
                },
            }
        }
        receive_task.abort();
    }

    /// Seal `payload` for `peer`, starting a handshake if there is no session yet.
    fn send(&mut self, peer: PeerId, payload: Bytes) -> Result<(), Error> {
        let remote = self
            .directory
            .lookup(peer)
            .ok_or(Error::UnknownPeer(peer))?
            .public_key
            .clone();
        let now = self.context.current();
        let mut packets = Vec::new();
        let session = match self.sessions.entry(peer) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let session = entry.insert(Session::new(peer, self.session_cfg, now));
                packets.push(session.hello(&mut self.context, &mut self.local, &remote, now)?);
                self.metrics.handshakes_started.inc();
                debug!(peer, "starting handshake");
                session
            }
        };
        let result = session
            .send(&mut self.context, &mut self.local, payload, now)
            .map(|packet| packets.extend(packet));
        self.transmit(peer, packets);
        result
    }

    /// Process a single inbound datagram.
    fn receive(&mut self, datagram: Bytes, handler: &mut dyn Handler) -> Result<(), Error> {
        if datagram.len() > self.max_packet_size {
            return Err(Error::PacketTooLarge(datagram.len()));
        }
        let packet = Packet::decode(datagram)?;
        if packet.receiver != self.local.id {
            return Err(Error::Misdirected(packet.receiver));
        }
        let peer = packet.sender;
        let remote = self
            .directory
            .lookup(peer)
            .ok_or(Error::UnknownPeer(peer))?
            .public_key
            .clone();
        let kind = packet.kind();
        self.metrics
            .received
            .get_or_create(&metrics::Packet::new(kind))
            .inc();

        let now = self.context.current();
        let header = packet.header();
        let sequence = packet.sequence;
        match packet.body {
            Body::Hello(sealed) => {
                let cfg = self.reader_cfg;
                let reader = self
                    .candidates
                    .entry(peer)
                    .or_insert_with(|| SessionReader::new(peer, cfg));
                if reader.dupes.contains(sequence) {
                    return Err(Error::Replay(sequence));
                }
                let welcome = reader.on_hello(&mut self.context, &mut self.local, &sealed, now)?;
                reader.dupes.insert(sequence);
                self.transmit(peer, vec![welcome]);
            }
            Body::Welcome { nonce, signature } => {
                let session = self
                    .sessions
                    .get_mut(&peer)
                    .ok_or(Error::Unexpected(kind))?;
                if session.dupes.contains(sequence) {
                    return Err(Error::Replay(sequence));
                }
                let packets = session.on_welcome(
                    &mut self.context,
                    &mut self.local,
                    &remote,
                    nonce,
                    &signature,
                    now,
                )?;
                session.dupes.insert(sequence);
                self.transmit(peer, packets);
            }
            Body::KeyRequestPart1(ciphertext) => {
                let part = Part::First {
                    sequence,
                    ciphertext,
                };
                self.on_key_request(peer, &remote, sequence, kind, part, now)?;
            }
            Body::KeyRequestPart2 { part1, signature } => {
                let part = Part::Second { part1, signature };
                self.on_key_request(peer, &remote, sequence, kind, part, now)?;
            }
            Body::SessionPart1(ciphertext) => {
                let part = Part::First {
                    sequence,
                    ciphertext,
                };
                self.on_session(peer, &remote, sequence, kind, part, now)?;
            }
            Body::SessionPart2 { part1, signature } => {
                let part = Part::Second { part1, signature };
                self.on_session(peer, &remote, sequence, kind, part, now)?;
            }
            Body::SessionAck(body) => {
                let reader = self
                    .accepted
                    .get_mut(&peer)
                    .ok_or(Error::Unexpected(kind))?;
                if reader.dupes.contains(sequence) {
                    return Err(Error::Replay(sequence));
                }
                reader.on_session_ack(&self.local, sequence, &body)?;
                reader.dupes.insert(sequence);
            }
            Body::Data(body) => {
                let Some(reader) = self.accepted.get_mut(&peer) else {
                    // The peer believes we share a key: ask it to start over
                    let nack = self.local.nack(peer, sequence);
                    self.transmit(peer, vec![nack]);
                    return Err(Error::NoSession(peer));
                };
                let payload = reader.open(&self.local, sequence, &body)?;
                let ack = reader.ack(&mut self.context, &mut self.local, sequence)?;
                let duplicate = reader.data.contains(sequence);
                if !duplicate {
                    reader.data.insert(sequence);
                }
                self.transmit(peer, vec![ack]);
                if duplicate {
                    return Err(Error::Replay(sequence));
                }
                self.metrics.delivered.inc();
                handler.received(peer, payload);
            }
            Body::Ack(body) => {
                let session = self
                    .sessions
                    .get_mut(&peer)
                    .ok_or(Error::Unexpected(kind))?;
                session.on_ack(&header, &body)?;
                if session.dupes.contains(sequence) {
                    return Err(Error::Replay(sequence));
                }
                session.dupes.insert(sequence);
                let packets = session.flush(&mut self.context, &mut self.local, now)?;
                self.transmit(peer, packets);
            }
            Body::Nack { nacked, signature } => {
                let session = self
                    .sessions
                    .get_mut(&peer)
                    .ok_or(Error::Unexpected(kind))?;
                if session.dupes.contains(sequence) {
                    return Err(Error::Replay(sequence));
                }
                let Some(hello) = session.on_nack(
                    &mut self.context,
                    &mut self.local,
                    &remote,
                    sequence,
                    nacked,
                    &signature,
                    now,
                )?
                else {
                    return Ok(());
                };
                session.dupes.insert(sequence);
                warn!(peer, sequence = nacked, "peer lost session, restarting handshake");
                self.metrics.handshakes_started.inc();
                self.transmit(peer, vec![hello]);
            }
        }
        Ok(())
    }

    fn on_key_request(
        &mut self,
        peer: PeerId,
        remote: &C::PublicKey,
        sequence: u64,
        kind: Kind,
        part: Part,
        now: SystemTime,
    ) -> Result<(), Error> {
        let reader = self
            .candidates
            .get_mut(&peer)
            .ok_or(Error::Unexpected(kind))?;
        if reader.dupes.contains(sequence) {
            return Err(Error::Replay(sequence));
        }
        let Some(packets) =
            reader.on_key_request(&mut self.context, &mut self.local, remote, part, now)?
        else {
            return Ok(());
        };
        reader.dupes.insert(sequence);

        // Replaces any reader holding an older key
        if let Some(reader) = self.candidates.remove(&peer) {
            self.accepted.insert(peer, reader);
        }
        self.metrics.sessions_accepted.inc();
        info!(peer, "accepted session");
        self.transmit(peer, packets);
        Ok(())
    }

    fn on_session(
        &mut self,
        peer: PeerId,
        remote: &C::PublicKey,
        sequence: u64,
        kind: Kind,
        part: Part,
        now: SystemTime,
    ) -> Result<(), Error> {
        let session = self
            .sessions
            .get_mut(&peer)
            .ok_or(Error::Unexpected(kind))?;

        // A repeated part after the key was installed means our SESSION_ACK was lost
        let established = session.is_exchanging();
        if !established && session.dupes.contains(sequence) {
            return Err(Error::Replay(sequence));
        }
        let packets = session.on_session(&mut self.context, &mut self.local, remote, part, now)?;
        if !established && session.is_exchanging() {
            session.dupes.insert(sequence);
            self.metrics.sessions_established.inc();
            info!(peer, "established session");
        }
        self.transmit(peer, packets);
        Ok(())
    }

    /// Advance every timer.
    fn on_tick(&mut self, now: SystemTime, handler: &mut dyn Handler) {
        let mut outbound = Vec::new();
        for (peer, session) in self.sessions.iter_mut() {
            let Some(remote) = self.directory.lookup(*peer).map(|peer| &peer.public_key) else {
                continue;
            };
            let tick = match session.tick(&mut self.context, &mut self.local, remote, now) {
                Ok(tick) => tick,
                Err(err) => {
                    warn!(peer, ?err, "failed to advance session");
                    continue;
                }
            };
            if tick.restarted {
                warn!(peer, "handshake timed out, restarting");
                self.metrics.handshakes_started.inc();
            }
            if let Some(undelivered) = tick.broken {
                warn!(
                    peer,
                    undelivered = undelivered.len(),
                    "retransmissions exhausted, restarting handshake"
                );
                self.metrics.sessions_broken.inc();
                self.metrics.handshakes_started.inc();
                handler.broken(*peer, undelivered);
            }
            self.metrics.retransmitted.inc_by(tick.retransmitted as u64);
            outbound.push((*peer, tick.packets));
        }

        for (peer, reader) in self.accepted.iter_mut().chain(self.candidates.iter_mut()) {
            let tick = reader.retransmitter.tick(&mut self.context, now);
            if !tick.exhausted.is_empty() {
                debug!(
                    peer,
                    exhausted = tick.exhausted.len(),
                    "gave up on handshake packets"
                );
            }
            self.metrics.retransmitted.inc_by(tick.resend.len() as u64);
            outbound.push((*peer, tick.resend));
        }

        // Forget peers that started a handshake and went quiet
        self.candidates.retain(|_, reader| !reader.is_stale(now));

        for (peer, packets) in outbound {
            self.transmit(peer, packets);
        }
    }

    /// Start a new generation of every replay window.
    fn rotate(&mut self) {
        for session in self.sessions.values_mut() {
            session.dupes.rotate();
        }
        for reader in self
            .accepted
            .values_mut()
            .chain(self.candidates.values_mut())
        {
            reader.dupes.rotate();
            reader.data.rotate();
        }
    }

    /// Encode and send `packets` to `peer`.
    fn transmit(&self, peer: PeerId, packets: Vec<Packet>) {
        if packets.is_empty() {
            return;
        }
        let Some(address) = self.directory.lookup(peer).map(|peer| peer.address) else {
            return;
        };
        for packet in packets {
            self.transmit_one(address, packet);
        }
    }

    fn transmit_one(&self, address: SocketAddr, packet: Packet) {
        let kind = packet.kind();
        let datagram: Bytes = packet.encode().into();
        match self.sender.send(address, datagram) {
            Ok(()) => {
                self.metrics
                    .sent
                    .get_or_create(&metrics::Packet::new(kind))
                    .inc();
            }
            Err(err) => {
                warn!(?address, ?err, kind = kind.as_str(), "failed to send packet");
                self.metrics.record_drop(&Error::Socket(err));
            }
        }
    }
}
