//! Identity and session cryptography used by the handshake and data exchange.
//!
//! An [Identity] signs handshake transcripts and opens material sealed to it by a peer.
//! [ed25519] provides the default implementation (Ed25519 signatures paired with an X25519
//! sealing key). [cipher] holds the symmetric primitives used once a session key is agreed.

use bytes::Bytes;
use rand::{CryptoRng, Rng};
use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;

pub mod cipher;
pub mod ed25519;

/// Errors that can occur when using an [Identity] or [cipher].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid key")]
    InvalidKey,
    #[error("ciphertext too short")]
    TooShort,
    #[error("seal failed")]
    SealFailed,
    #[error("open failed")]
    OpenFailed,
    #[error("key derivation failed")]
    KeyDerivation,
}

/// Long-lived cryptographic identity of a participant.
pub trait Identity: Clone + Send + Sync + 'static {
    /// Public half of the identity, distributed via the directory.
    type PublicKey: Clone + Debug + PartialEq + Eq + Hash + Send + Sync + 'static;

    /// Returns the public key of this identity.
    fn public_key(&self) -> Self::PublicKey;

    /// Sign `message` within `namespace`.
    fn sign(&self, namespace: &[u8], message: &[u8]) -> Bytes;

    /// Check a signature produced by [Identity::sign].
    fn verify(
        public_key: &Self::PublicKey,
        namespace: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> bool;

    /// Encrypt `plaintext` so that only the holder of `recipient` can read it.
    fn seal<R: Rng + CryptoRng>(
        rng: &mut R,
        recipient: &Self::PublicKey,
        plaintext: &[u8],
    ) -> Result<Bytes, Error>;

    /// Decrypt material produced by [Identity::seal] for this identity.
    fn open(&self, ciphertext: &[u8]) -> Result<Bytes, Error>;
}
