//! Wire format of a single datagram.
//!
//! Every packet starts with a fixed 17-byte header:
//!
//! ```text
//! +------+----------+--------+----------+
//! | kind | sequence | sender | receiver |
//! |  u8  |   u64    |  u32   |   u32    |
//! +------+----------+--------+----------+
//! ```
//!
//! followed by a kind-specific body that extends to the end of the datagram. All integers are
//! big-endian. `DATA`, `ACK` and `SESSION_ACK` bodies are encrypted under the session key with
//! the header as associated data, so a receiver that can decrypt them knows the header was not
//! rewritten. `NACK` is signed by the peer that lost the session.

use crate::{
    crypto::{cipher, Error as CryptoError},
    Error, PeerId,
};
use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{EncodeSize, Error as CodecError, Read, ReadExt, Write};
use rand::{CryptoRng, Rng};

/// Length of the packet header.
pub const HEADER_LENGTH: usize = 1 + 8 + 4 + 4;

/// Length of a handshake nonce.
pub const NONCE_LENGTH: usize = 64;

/// Random bytes appended to every `DATA` plaintext.
pub const PADDING_LENGTH: usize = 2;

/// Length of the sequence number carried by a second handshake part.
const REFERENCE_LENGTH: usize = 8;

/// Nonce exchanged during the handshake.
pub type Nonce = [u8; NONCE_LENGTH];

/// Discriminant of a [Packet].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Kind {
    Data = 0,
    Ack = 1,
    Nack = 2,
    Hello = 3,
    Welcome = 4,
    KeyRequestPart1 = 5,
    KeyRequestPart2 = 6,
    SessionPart1 = 7,
    SessionPart2 = 8,
    SessionAck = 9,
}

impl Kind {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Kind::Data,
            1 => Kind::Ack,
            2 => Kind::Nack,
            3 => Kind::Hello,
            4 => Kind::Welcome,
            5 => Kind::KeyRequestPart1,
            6 => Kind::KeyRequestPart2,
            7 => Kind::SessionPart1,
            8 => Kind::SessionPart2,
            9 => Kind::SessionAck,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Data => "data",
            Kind::Ack => "ack",
            Kind::Nack => "nack",
            Kind::Hello => "hello",
            Kind::Welcome => "welcome",
            Kind::KeyRequestPart1 => "key_request_part1",
            Kind::KeyRequestPart2 => "key_request_part2",
            Kind::SessionPart1 => "session_part1",
            Kind::SessionPart2 => "session_part2",
            Kind::SessionAck => "session_ack",
        }
    }
}

/// Kind-specific content of a [Packet].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    /// Encrypted, padded payload followed by a checksum of the ciphertext.
    Data(Bytes),
    /// Encrypted sequence number of the acknowledged `DATA` packet.
    Ack(Bytes),
    /// Sequence number of a `DATA` packet the receiver had no session for, signed by the receiver.
    Nack { nacked: u64, signature: Bytes },
    /// Nonce sealed to the receiver.
    Hello(Bytes),
    /// Responder nonce and a signature over it.
    Welcome { nonce: Nonce, signature: Bytes },
    /// Sealed initiator nonce and echoed responder nonce.
    KeyRequestPart1(Bytes),
    /// Signature over the ciphertext of the part with sequence `part1`.
    KeyRequestPart2 { part1: u64, signature: Bytes },
    /// Sealed session key and echoed initiator nonce.
    SessionPart1(Bytes),
    /// Signature over the ciphertext of the part with sequence `part1`.
    SessionPart2 { part1: u64, signature: Bytes },
    /// Confirms the session key was accepted, sealed under that key.
    SessionAck(Bytes),
}

impl Body {
    pub fn kind(&self) -> Kind {
        match self {
            Body::Data(_) => Kind::Data,
            Body::Ack(_) => Kind::Ack,
            Body::Nack { .. } => Kind::Nack,
            Body::Hello(_) => Kind::Hello,
            Body::Welcome { .. } => Kind::Welcome,
            Body::KeyRequestPart1(_) => Kind::KeyRequestPart1,
            Body::KeyRequestPart2 { .. } => Kind::KeyRequestPart2,
            Body::SessionPart1(_) => Kind::SessionPart1,
            Body::SessionPart2 { .. } => Kind::SessionPart2,
            Body::SessionAck(_) => Kind::SessionAck,
        }
    }
}

/// A single datagram exchanged between two adapters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub sequence: u64,
    pub sender: PeerId,
    pub receiver: PeerId,
    pub body: Body,
}

impl Packet {
    pub fn kind(&self) -> Kind {
        self.body.kind()
    }

    /// Header bytes authenticated alongside encrypted bodies.
    pub fn header(&self) -> [u8; HEADER_LENGTH] {
        header(self.kind(), self.sequence, self.sender, self.receiver)
    }
}

/// Serialize a packet header.
pub fn header(kind: Kind, sequence: u64, sender: PeerId, receiver: PeerId) -> [u8; HEADER_LENGTH] {
    let mut header = [0u8; HEADER_LENGTH];
    header[0] = kind as u8;
    header[1..9].copy_from_slice(&sequence.to_be_bytes());
    header[9..13].copy_from_slice(&sender.to_be_bytes());
    header[13..17].copy_from_slice(&receiver.to_be_bytes());
    header
}

/// Largest payload that fits in a `DATA` packet of at most `max_packet_size` bytes.
pub fn max_payload(max_packet_size: usize) -> usize {
    max_packet_size.saturating_sub(
        HEADER_LENGTH + PADDING_LENGTH + cipher::OVERHEAD + cipher::CHECKSUM_LENGTH,
    )
}

/// Build the body of a `DATA` packet carrying `payload`.
pub fn seal_data<R: Rng + CryptoRng>(
    rng: &mut R,
    key: &cipher::Key,
    header: &[u8],
    payload: &[u8],
) -> Result<Bytes, CryptoError> {
    let mut plaintext = Vec::with_capacity(payload.len() + PADDING_LENGTH);
    plaintext.extend_from_slice(payload);
    let mut padding = [0u8; PADDING_LENGTH];
    rng.fill_bytes(&mut padding);
    plaintext.extend_from_slice(&padding);

    let mut body = cipher::encrypt(rng, key, header, &plaintext)?;
    let checksum = cipher::checksum(&body);
    body.extend_from_slice(&checksum);
    Ok(body.into())
}

/// Verify and decrypt the body of a `DATA` packet, returning the payload.
pub fn open_data(key: &cipher::Key, header: &[u8], body: &[u8]) -> Result<Bytes, Error> {
    if body.len() < cipher::CHECKSUM_LENGTH {
        return Err(Error::Checksum);
    }
    let (ciphertext, checksum) = body.split_at(body.len() - cipher::CHECKSUM_LENGTH);
    if cipher::checksum(ciphertext) != checksum {
        return Err(Error::Checksum);
    }
    let mut plaintext =
        cipher::decrypt(key, header, ciphertext).map_err(|_| Error::AuthFailure)?;
    if plaintext.len() < PADDING_LENGTH {
        return Err(Error::AuthFailure);
    }
    plaintext.truncate(plaintext.len() - PADDING_LENGTH);
    Ok(plaintext.into())
}

/// Build the body of an `ACK` packet acknowledging `acknowledged`.
pub fn seal_ack<R: Rng + CryptoRng>(
    rng: &mut R,
    key: &cipher::Key,
    header: &[u8],
    acknowledged: u64,
) -> Result<Bytes, CryptoError> {
    cipher::encrypt(rng, key, header, &acknowledged.to_be_bytes()).map(Bytes::from)
}

/// Decrypt the body of an `ACK` packet, returning the acknowledged sequence.
pub fn open_ack(key: &cipher::Key, header: &[u8], body: &[u8]) -> Result<u64, Error> {
    let plaintext = cipher::decrypt(key, header, body).map_err(|_| Error::AuthFailure)?;
    let acknowledged: [u8; 8] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| Error::AuthFailure)?;
    Ok(u64::from_be_bytes(acknowledged))
}

/// Build the body of a `SESSION_ACK` packet.
pub fn seal_session_ack<R: Rng + CryptoRng>(
    rng: &mut R,
    key: &cipher::Key,
    header: &[u8],
) -> Result<Bytes, CryptoError> {
    cipher::encrypt(rng, key, header, &[]).map(Bytes::from)
}

/// Check that the body of a `SESSION_ACK` packet was sealed under `key`.
pub fn open_session_ack(key: &cipher::Key, header: &[u8], body: &[u8]) -> Result<(), Error> {
    let plaintext = cipher::decrypt(key, header, body).map_err(|_| Error::AuthFailure)?;
    if !plaintext.is_empty() {
        return Err(Error::AuthFailure);
    }
    Ok(())
}

/// Read the remainder of `buf`, which must not be empty.
fn read_remaining(buf: &mut impl Buf) -> Result<Bytes, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::EndOfBuffer);
    }
    Ok(buf.copy_to_bytes(buf.remaining()))
}

fn read_nonce(buf: &mut impl Buf) -> Result<Nonce, CodecError> {
    if buf.remaining() < NONCE_LENGTH {
        return Err(CodecError::EndOfBuffer);
    }
    let mut nonce = [0u8; NONCE_LENGTH];
    buf.copy_to_slice(&mut nonce);
    Ok(nonce)
}

impl EncodeSize for Packet {
    fn encode_size(&self) -> usize {
        HEADER_LENGTH
            + match &self.body {
                Body::Data(bytes)
                | Body::Ack(bytes)
                | Body::Hello(bytes)
                | Body::KeyRequestPart1(bytes)
                | Body::SessionPart1(bytes)
                | Body::SessionAck(bytes) => bytes.len(),
                Body::Welcome { signature, .. } => NONCE_LENGTH + signature.len(),
                Body::Nack { signature, .. }
                | Body::KeyRequestPart2 { signature, .. }
                | Body::SessionPart2 { signature, .. } => REFERENCE_LENGTH + signature.len(),
            }
    }
}

impl Write for Packet {
    fn write(&self, buf: &mut impl BufMut) {
        (self.kind() as u8).write(buf);
        self.sequence.write(buf);
        self.sender.write(buf);
        self.receiver.write(buf);
        match &self.body {
            Body::Data(bytes)
            | Body::Ack(bytes)
            | Body::Hello(bytes)
            | Body::KeyRequestPart1(bytes)
            | Body::SessionPart1(bytes)
            | Body::SessionAck(bytes) => buf.put_slice(bytes),
            Body::Welcome { nonce, signature } => {
                buf.put_slice(nonce);
                buf.put_slice(signature);
            }
            Body::Nack {
                nacked: reference,
                signature,
            }
            | Body::KeyRequestPart2 {
                part1: reference,
                signature,
            }
            | Body::SessionPart2 {
                part1: reference,
                signature,
            } => {
                reference.write(buf);
                buf.put_slice(signature);
            }
        }
    }
}

impl Read for Packet {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let kind = <u8>::read(buf)?;
        let Some(kind) = Kind::from_u8(kind) else {
            return Err(CodecError::Invalid("datagram::Packet", "unknown kind"));
        };
        let sequence = u64::read(buf)?;
        let sender = u32::read(buf)?;
        let receiver = u32::read(buf)?;
        let body = match kind {
            Kind::Data => Body::Data(read_remaining(buf)?),
            Kind::Ack => Body::Ack(read_remaining(buf)?),
            Kind::Nack => {
                let nacked = u64::read(buf)?;
                let signature = read_remaining(buf)?;
                Body::Nack { nacked, signature }
            }
            Kind::Hello => Body::Hello(read_remaining(buf)?),
            Kind::Welcome => {
                let nonce = read_nonce(buf)?;
                let signature = read_remaining(buf)?;
                Body::Welcome { nonce, signature }
            }
            Kind::KeyRequestPart1 => Body::KeyRequestPart1(read_remaining(buf)?),
            Kind::KeyRequestPart2 => {
                let part1 = u64::read(buf)?;
                let signature = read_remaining(buf)?;
                Body::KeyRequestPart2 { part1, signature }
            }
            Kind::SessionPart1 => Body::SessionPart1(read_remaining(buf)?),
            Kind::SessionPart2 => {
                let part1 = u64::read(buf)?;
                let signature = read_remaining(buf)?;
                Body::SessionPart2 { part1, signature }
            }
            Kind::SessionAck => Body::SessionAck(read_remaining(buf)?),
        };
        Ok(Self {
            sequence,
            sender,
            receiver,
            body,
        })
    }
}
