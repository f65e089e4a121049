//! Pieces shared by both sides of the handshake.

use crate::{
    crypto::Identity,
    packet::{Body, Kind, Nonce, Packet, NONCE_LENGTH},
    PeerId,
};
use bytes::Bytes;
use rand::Rng;

/// The local participant: identity, signing namespace, and sequence counter.
pub struct Local<C: Identity> {
    pub id: PeerId,
    pub crypto: C,
    pub namespace: Vec<u8>,
    sequence: u64,
}

impl<C: Identity> Local<C> {
    /// Create a new participant whose first packet uses sequence `first`.
    pub fn new(id: PeerId, crypto: C, namespace: Vec<u8>, first: u64) -> Self {
        Self {
            id,
            crypto,
            namespace,
            sequence: first,
        }
    }

    /// Reserve the next sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }

    /// Build a packet addressed to `receiver`.
    pub fn packet(&mut self, receiver: PeerId, body: Body) -> Packet {
        Packet {
            sequence: self.next_sequence(),
            sender: self.id,
            receiver,
            body,
        }
    }

    /// Build a `NACK` telling `receiver` that `nacked` arrived without a session.
    pub fn nack(&mut self, receiver: PeerId, nacked: u64) -> Packet {
        let sequence = self.next_sequence();
        let signature = self.sign(Kind::Nack, receiver, &nack_content(sequence, nacked));
        Packet {
            sequence,
            sender: self.id,
            receiver,
            body: Body::Nack { nacked, signature },
        }
    }

    /// Check the signature of a `NACK` with `sequence` received from `sender`.
    pub fn verify_nack(
        &self,
        public_key: &C::PublicKey,
        sender: PeerId,
        sequence: u64,
        nacked: u64,
        signature: &[u8],
    ) -> bool {
        let content = nack_content(sequence, nacked);
        self.verify(public_key, Kind::Nack, sender, &content, signature)
    }

    /// Sign `content` sent to `receiver` as part of a `kind` packet.
    pub fn sign(&self, kind: Kind, receiver: PeerId, content: &[u8]) -> Bytes {
        self.crypto.sign(&self.namespace, &transcript(kind, self.id, receiver, content))
    }

    /// Verify a signature over `content` received from `sender` in a `kind` packet.
    pub fn verify(
        &self,
        public_key: &C::PublicKey,
        kind: Kind,
        sender: PeerId,
        content: &[u8],
        signature: &[u8],
    ) -> bool {
        C::verify(
            public_key,
            &self.namespace,
            &transcript(kind, sender, self.id, content),
            signature,
        )
    }
}

/// Bind signed content to the packet kind and both participants.
fn transcript(kind: Kind, sender: PeerId, receiver: PeerId, content: &[u8]) -> Vec<u8> {
    let mut transcript = Vec::with_capacity(1 + 4 + 4 + content.len());
    transcript.push(kind as u8);
    transcript.extend_from_slice(&sender.to_be_bytes());
    transcript.extend_from_slice(&receiver.to_be_bytes());
    transcript.extend_from_slice(content);
    transcript
}

/// Signed content of a `NACK`: its own sequence and the sequence it refers to.
fn nack_content(sequence: u64, nacked: u64) -> [u8; 16] {
    let mut content = [0u8; 16];
    content[..8].copy_from_slice(&sequence.to_be_bytes());
    content[8..].copy_from_slice(&nacked.to_be_bytes());
    content
}

/// Generate a fresh handshake nonce.
pub fn nonce<R: Rng>(rng: &mut R) -> Nonce {
    let mut nonce = [0u8; NONCE_LENGTH];
    rng.fill_bytes(&mut nonce);
    nonce
}

/// One half of a two-part handshake message.
#[derive(Clone, Debug)]
pub enum Part {
    /// Sealed material carried by the packet with `sequence`.
    First { sequence: u64, ciphertext: Bytes },
    /// Signature over the first part with sequence `part1`.
    Second { part1: u64, signature: Bytes },
}

/// Reassembles two-part handshake messages, which may arrive in either order.
#[derive(Debug, Default)]
pub struct Parts {
    first: Option<(u64, Bytes)>,
    second: Option<(u64, Bytes)>,
}

impl Parts {
    /// Buffer `part`, returning `(ciphertext, signature)` once both halves of a message are held.
    pub fn insert(&mut self, part: Part) -> Option<(Bytes, Bytes)> {
        match part {
            Part::First {
                sequence,
                ciphertext,
            } => self.first = Some((sequence, ciphertext)),
            Part::Second { part1, signature } => self.second = Some((part1, signature)),
        }
        match (&self.first, &self.second) {
            (Some((sequence, _)), Some((part1, _))) if sequence == part1 => {}
            _ => return None,
        }
        let (_, ciphertext) = self.first.take()?;
        let (_, signature) = self.second.take()?;
        Some((ciphertext, signature))
    }

    pub fn clear(&mut self) {
        self.first = None;
        self.second = None;
    }
}
