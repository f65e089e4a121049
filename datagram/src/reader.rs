//! Inbound half of a peer relationship.
//!
//! A [SessionReader] answers a peer's handshake: it replies to `HELLO` with a signed nonce
//! (`WELCOME`) and, once a `KEY_REQ` echoes that nonce back, generates the session key and
//! returns it sealed to the peer (`SESSION`). The adapter keeps readers that are still
//! negotiating as candidates and promotes a reader to accepted once it has issued a key; only an
//! accepted reader decrypts `DATA`.

use crate::{
    crypto::{cipher::Key, Identity},
    dupes::{DupeWindow, OrderedWindow},
    handshake::{self, Local, Part, Parts},
    packet::{self, Body, Kind, Nonce, Packet, NONCE_LENGTH},
    retransmit::{self, Retransmitter},
    Error, PeerId,
};
use bytes::Bytes;
use rand::{CryptoRng, Rng};
use std::time::{Duration, SystemTime};
use zeroize::Zeroize;

/// Configuration for a [SessionReader].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Time a `WELCOME` nonce remains valid.
    pub handshake_timeout: Duration,

    pub retransmit: retransmit::Config,
}

/// Responder state for a single peer.
pub struct SessionReader {
    peer: PeerId,
    cfg: Config,

    /// Nonce sent in `WELCOME` and when it was generated.
    nonce: Option<(Nonce, SystemTime)>,
    key: Option<Key>,
    parts: Parts,
    confirmed: bool,

    pub retransmitter: Retransmitter,
    pub dupes: DupeWindow,
    /// Replay window for `DATA`.
    pub data: OrderedWindow,
}

impl SessionReader {
    pub fn new(peer: PeerId, cfg: Config) -> Self {
        Self {
            peer,
            cfg,
            nonce: None,
            key: None,
            parts: Parts::default(),
            confirmed: false,
            retransmitter: Retransmitter::new(cfg.retransmit),
            dupes: DupeWindow::new(),
            data: OrderedWindow::new(),
        }
    }

    /// Session key issued to the peer, if any.
    #[cfg(test)]
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    fn fresh(&self, now: SystemTime) -> Option<Nonce> {
        match self.nonce {
            Some((nonce, issued)) if now < issued + self.cfg.handshake_timeout => Some(nonce),
            _ => None,
        }
    }

    /// Handle a `HELLO`, returning the `WELCOME` to send.
    ///
    /// The sealed nonce must be addressed to the local identity. A nonce issued less than one
    /// handshake timeout ago is reused, so retransmitted `HELLO`s do not invalidate a `KEY_REQ`
    /// already in flight.
    pub fn on_hello<R: Rng + CryptoRng, C: Identity>(
        &mut self,
        rng: &mut R,
        local: &mut Local<C>,
        sealed: &[u8],
        now: SystemTime,
    ) -> Result<Packet, Error> {
        let opened = local.crypto.open(sealed).map_err(|_| Error::AuthFailure)?;
        if opened.len() != NONCE_LENGTH {
            return Err(Error::AuthFailure);
        }

        let nonce = match self.fresh(now) {
            Some(nonce) => nonce,
            None => {
                let nonce = handshake::nonce(rng);
                self.nonce = Some((nonce, now));
                self.parts.clear();
                nonce
            }
        };
        let signature = local.sign(Kind::Welcome, self.peer, &nonce);
        let packet = local.packet(self.peer, Body::Welcome { nonce, signature });
        self.retransmitter.clear_handshake();
        self.retransmitter.register(rng, now, packet.clone(), None);
        Ok(packet)
    }

    /// Handle one part of a `KEY_REQ`.
    ///
    /// Returns `None` while waiting for the other part and both parts of the `SESSION` once the
    /// request is accepted, at which point the reader holds a session key and should be promoted.
    pub fn on_key_request<R: Rng + CryptoRng, C: Identity>(
        &mut self,
        rng: &mut R,
        local: &mut Local<C>,
        remote: &C::PublicKey,
        part: Part,
        now: SystemTime,
    ) -> Result<Option<Vec<Packet>>, Error> {
        if self.key.is_some() {
            let kind = match part {
                Part::First { .. } => Kind::KeyRequestPart1,
                Part::Second { .. } => Kind::KeyRequestPart2,
            };
            return Err(Error::Unexpected(kind));
        }
        let Some((ciphertext, signature)) = self.parts.insert(part) else {
            return Ok(None);
        };
        if !local.verify(remote, Kind::KeyRequestPart1, self.peer, &ciphertext, &signature) {
            return Err(Error::AuthFailure);
        }
        let Some(expected) = self.fresh(now) else {
            return Err(Error::Unexpected(Kind::KeyRequestPart1));
        };
        let plaintext = local
            .crypto
            .open(&ciphertext)
            .map_err(|_| Error::AuthFailure)?;
        if plaintext.len() != 2 * NONCE_LENGTH {
            return Err(Error::AuthFailure);
        }
        let (remote_nonce, echoed) = plaintext.split_at(NONCE_LENGTH);
        if echoed != expected {
            return Err(Error::AuthFailure);
        }

        let key = Key::random(rng);
        let mut plaintext = Vec::with_capacity(key.as_bytes().len() + NONCE_LENGTH);
        plaintext.extend_from_slice(key.as_bytes());
        plaintext.extend_from_slice(remote_nonce);
        let sealed = C::seal(rng, remote, &plaintext);
        plaintext.zeroize();
        let ciphertext = sealed?;
        let signature = local.sign(Kind::SessionPart1, self.peer, &ciphertext);

        let part1 = local.packet(self.peer, Body::SessionPart1(ciphertext));
        let part2 = local.packet(
            self.peer,
            Body::SessionPart2 {
                part1: part1.sequence,
                signature,
            },
        );
        self.retransmitter.clear_handshake();
        self.retransmitter.register(rng, now, part1.clone(), None);
        self.retransmitter.register(rng, now, part2.clone(), None);

        // The nonce is spent, so a replayed request cannot mint another key
        self.nonce = None;
        self.key = Some(key);
        Ok(Some(vec![part1, part2]))
    }

    /// Verify the `SESSION_ACK` with `sequence`, which proves the peer installed the key.
    pub fn on_session_ack<C: Identity>(
        &mut self,
        local: &Local<C>,
        sequence: u64,
        body: &[u8],
    ) -> Result<(), Error> {
        let key = self.key.as_ref().ok_or(Error::NoSession(self.peer))?;
        let header = packet::header(Kind::SessionAck, sequence, self.peer, local.id);
        packet::open_session_ack(key, &header, body)?;
        self.confirm();
        Ok(())
    }

    fn confirm(&mut self) {
        if !self.confirmed {
            self.confirmed = true;
            self.retransmitter.clear_handshake();
        }
    }

    /// Verify and decrypt the body of the `DATA` packet with `sequence`.
    ///
    /// A valid `DATA` packet proves the peer holds the key, so it also confirms the session.
    pub fn open<C: Identity>(
        &mut self,
        local: &Local<C>,
        sequence: u64,
        body: &[u8],
    ) -> Result<Bytes, Error> {
        let key = self.key.as_ref().ok_or(Error::NoSession(self.peer))?;
        let header = packet::header(Kind::Data, sequence, self.peer, local.id);
        let payload = packet::open_data(key, &header, body)?;
        self.confirm();
        Ok(payload)
    }

    /// Build an `ACK` for the `DATA` packet with `sequence`.
    pub fn ack<R: Rng + CryptoRng, C: Identity>(
        &self,
        rng: &mut R,
        local: &mut Local<C>,
        sequence: u64,
    ) -> Result<Packet, Error> {
        let key = self.key.as_ref().ok_or(Error::NoSession(self.peer))?;
        let ack = local.next_sequence();
        let header = packet::header(Kind::Ack, ack, local.id, self.peer);
        let body = packet::seal_ack(rng, key, &header, sequence)?;
        Ok(Packet {
            sequence: ack,
            sender: local.id,
            receiver: self.peer,
            body: Body::Ack(body),
        })
    }

    /// Returns whether the reader is no longer negotiating and has nothing in flight.
    pub fn is_stale(&self, now: SystemTime) -> bool {
        self.key.is_none() && self.fresh(now).is_none() && self.retransmitter.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ed25519::{PrivateKey, PublicKey};
    use rand::{rngs::StdRng, SeedableRng};

    const ALICE: PeerId = 1;
    const BOB: PeerId = 2;

    fn config() -> Config {
        Config {
            handshake_timeout: Duration::from_secs(10),
            retransmit: retransmit::Config {
                interval: Duration::from_millis(250),
                backoff: 4,
                max_attempts: 20,
            },
        }
    }

    struct Fixture {
        rng: StdRng,
        alice: Local<PrivateKey>,
        bob: Local<PrivateKey>,
        alice_key: PublicKey,
        bob_key: PublicKey,
        reader: SessionReader,
        now: SystemTime,
    }

    impl Fixture {
        fn new() -> Self {
            let alice = Local::new(ALICE, PrivateKey::from_seed(1), b"test".to_vec(), 100);
            let bob = Local::new(BOB, PrivateKey::from_seed(2), b"test".to_vec(), 1_000);
            let alice_key = alice.crypto.public_key();
            let bob_key = bob.crypto.public_key();
            Self {
                rng: StdRng::seed_from_u64(0),
                alice,
                bob,
                alice_key,
                bob_key,
                reader: SessionReader::new(ALICE, config()),
                now: SystemTime::UNIX_EPOCH + Duration::from_secs(100),
            }
        }

        fn hello(&mut self, now: SystemTime) -> Nonce {
            let nonce = handshake::nonce(&mut self.rng);
            let sealed = PrivateKey::seal(&mut self.rng, &self.bob_key, &nonce).unwrap();
            let welcome = self
                .reader
                .on_hello(&mut self.rng, &mut self.bob, &sealed, now)
                .unwrap();
            let Body::Welcome { nonce, signature } = welcome.body else {
                panic!("expected welcome");
            };
            assert!(self
                .alice
                .verify(&self.bob_key, Kind::Welcome, BOB, &nonce, &signature));
            nonce
        }

        /// Build both parts of a `KEY_REQ` echoing `echoed`, signed by `signer`.
        fn key_request(&mut self, echoed: &Nonce, signer: &Local<PrivateKey>) -> [Part; 2] {
            let mut plaintext = handshake::nonce(&mut self.rng).to_vec();
            plaintext.extend_from_slice(echoed);
            let ciphertext = PrivateKey::seal(&mut self.rng, &self.bob_key, &plaintext).unwrap();
            let signature = signer.sign(Kind::KeyRequestPart1, BOB, &ciphertext);
            let sequence = self.alice.next_sequence();
            [
                Part::First {
                    sequence,
                    ciphertext,
                },
                Part::Second {
                    part1: sequence,
                    signature,
                },
            ]
        }

        fn submit(
            &mut self,
            parts: [Part; 2],
            now: SystemTime,
        ) -> Result<Option<Vec<Packet>>, Error> {
            let mut result = Ok(None);
            for part in parts {
                result = self.reader.on_key_request(
                    &mut self.rng,
                    &mut self.bob,
                    &self.alice_key,
                    part,
                    now,
                );
            }
            result
        }
    }

    #[test]
    fn test_hello_reuses_fresh_nonce() {
        let mut fixture = Fixture::new();
        let first = fixture.hello(fixture.now);
        let second = fixture.hello(fixture.now + Duration::from_secs(9));
        assert_eq!(first, second);
        assert_eq!(fixture.reader.retransmitter.len(), 1);

        // Expired nonce is replaced
        let third = fixture.hello(fixture.now + Duration::from_secs(11));
        assert_ne!(first, third);
    }

    #[test]
    fn test_hello_not_addressed_to_us() {
        let mut fixture = Fixture::new();
        let nonce = handshake::nonce(&mut fixture.rng);
        let sealed = PrivateKey::seal(&mut fixture.rng, &fixture.alice_key, &nonce).unwrap();
        let result = fixture
            .reader
            .on_hello(&mut fixture.rng, &mut fixture.bob, &sealed, fixture.now);
        assert!(matches!(result, Err(Error::AuthFailure)));
        assert!(fixture.reader.retransmitter.is_empty());
    }

    #[test]
    fn test_key_request_accepted() {
        let mut fixture = Fixture::new();
        let nonce = fixture.hello(fixture.now);
        let alice = Local::new(ALICE, PrivateKey::from_seed(1), b"test".to_vec(), 0);
        let parts = fixture.key_request(&nonce, &alice);
        let session = fixture.submit(parts, fixture.now).unwrap().unwrap();
        assert_eq!(session.len(), 2);
        assert_eq!(session[0].kind(), Kind::SessionPart1);
        assert!(matches!(
            &session[1].body,
            Body::SessionPart2 { part1, .. } if *part1 == session[0].sequence
        ));
        assert!(fixture.reader.key().is_some());

        // WELCOME no longer retransmitted, SESSION parts are
        assert_eq!(fixture.reader.retransmitter.len(), 2);

        // Session key sealed to the initiator
        let Body::SessionPart1(ciphertext) = &session[0].body else {
            panic!("expected session part");
        };
        let plaintext = fixture.alice.crypto.open(ciphertext).unwrap();
        assert_eq!(&plaintext[..32], fixture.reader.key().unwrap().as_bytes());
    }

    #[test]
    fn test_key_request_forged_signature() {
        let mut fixture = Fixture::new();
        let nonce = fixture.hello(fixture.now);
        let forger = Local::new(ALICE, PrivateKey::from_seed(3), b"test".to_vec(), 0);
        let parts = fixture.key_request(&nonce, &forger);
        let result = fixture.submit(parts, fixture.now);
        assert!(matches!(result, Err(Error::AuthFailure)));
        assert!(fixture.reader.key().is_none());

        // Genuine request still accepted
        let alice = Local::new(ALICE, PrivateKey::from_seed(1), b"test".to_vec(), 0);
        let parts = fixture.key_request(&nonce, &alice);
        assert!(fixture.submit(parts, fixture.now).unwrap().is_some());
    }

    #[test]
    fn test_key_request_wrong_nonce() {
        let mut fixture = Fixture::new();
        fixture.hello(fixture.now);
        let alice = Local::new(ALICE, PrivateKey::from_seed(1), b"test".to_vec(), 0);
        let parts = fixture.key_request(&[0u8; NONCE_LENGTH], &alice);
        let result = fixture.submit(parts, fixture.now);
        assert!(matches!(result, Err(Error::AuthFailure)));
        assert!(fixture.reader.key().is_none());
    }

    #[test]
    fn test_key_request_stale_nonce() {
        let mut fixture = Fixture::new();
        let nonce = fixture.hello(fixture.now);
        let alice = Local::new(ALICE, PrivateKey::from_seed(1), b"test".to_vec(), 0);
        let parts = fixture.key_request(&nonce, &alice);
        let result = fixture.submit(parts, fixture.now + Duration::from_secs(10));
        assert!(matches!(result, Err(Error::Unexpected(_))));
        assert!(fixture.reader.key().is_none());
    }

    #[test]
    fn test_key_request_replayed() {
        let mut fixture = Fixture::new();
        let nonce = fixture.hello(fixture.now);
        let alice = Local::new(ALICE, PrivateKey::from_seed(1), b"test".to_vec(), 0);
        let parts = fixture.key_request(&nonce, &alice);
        let replay = parts.clone();
        assert!(fixture.submit(parts, fixture.now).unwrap().is_some());
        let key = fixture.reader.key().cloned();

        // Same request again does not mint a new key
        assert!(fixture.submit(replay, fixture.now).is_err());
        assert_eq!(fixture.reader.key().cloned(), key);
    }

    #[test]
    fn test_data_confirms_session() {
        let mut fixture = Fixture::new();
        let nonce = fixture.hello(fixture.now);
        let alice = Local::new(ALICE, PrivateKey::from_seed(1), b"test".to_vec(), 0);
        let parts = fixture.key_request(&nonce, &alice);
        fixture.submit(parts, fixture.now).unwrap();
        assert_eq!(fixture.reader.retransmitter.len(), 2);

        let key = fixture.reader.key().cloned().unwrap();
        let header = packet::header(Kind::Data, 5, ALICE, BOB);
        let body = packet::seal_data(&mut fixture.rng, &key, &header, b"hello").unwrap();
        let payload = fixture.reader.open(&fixture.bob, 5, &body).unwrap();
        assert_eq!(payload, Bytes::from_static(b"hello"));
        assert!(fixture.reader.retransmitter.is_empty());

        // Sequence is authenticated
        assert!(matches!(
            fixture.reader.open(&fixture.bob, 6, &body),
            Err(Error::AuthFailure)
        ));
    }

    #[test]
    fn test_session_ack() {
        let mut fixture = Fixture::new();
        let nonce = fixture.hello(fixture.now);
        let alice = Local::new(ALICE, PrivateKey::from_seed(1), b"test".to_vec(), 0);
        let parts = fixture.key_request(&nonce, &alice);
        fixture.submit(parts, fixture.now).unwrap();
        let key = fixture.reader.key().cloned().unwrap();

        // Unsealed acknowledgement is rejected and the SESSION keeps retransmitting
        let result = fixture.reader.on_session_ack(&fixture.bob, 7, b"forged");
        assert!(matches!(result, Err(Error::AuthFailure)));
        assert_eq!(fixture.reader.retransmitter.len(), 2);

        // Sealed under another sequence
        let header = packet::header(Kind::SessionAck, 7, ALICE, BOB);
        let body = packet::seal_session_ack(&mut fixture.rng, &key, &header).unwrap();
        let result = fixture.reader.on_session_ack(&fixture.bob, 8, &body);
        assert!(matches!(result, Err(Error::AuthFailure)));
        assert_eq!(fixture.reader.retransmitter.len(), 2);

        // Genuine acknowledgement confirms
        fixture
            .reader
            .on_session_ack(&fixture.bob, 7, &body)
            .unwrap();
        assert!(fixture.reader.retransmitter.is_empty());
    }

    #[test]
    fn test_session_ack_without_key() {
        let mut fixture = Fixture::new();
        let result = fixture.reader.on_session_ack(&fixture.bob, 7, b"body");
        assert!(matches!(result, Err(Error::NoSession(ALICE))));
    }

    #[test]
    fn test_data_without_key() {
        let mut fixture = Fixture::new();
        let result = fixture.reader.open(&fixture.bob, 5, b"body");
        assert!(matches!(result, Err(Error::NoSession(ALICE))));
    }

    #[test]
    fn test_stale() {
        let mut fixture = Fixture::new();
        assert!(fixture.reader.is_stale(fixture.now));
        fixture.hello(fixture.now);
        assert!(!fixture.reader.is_stale(fixture.now));

        // Nonce expired but WELCOME still in flight
        let later = fixture.now + Duration::from_secs(11);
        assert!(!fixture.reader.is_stale(later));
        fixture.reader.retransmitter.clear_handshake();
        assert!(fixture.reader.is_stale(later));
    }
}
