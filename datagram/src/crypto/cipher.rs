//! Symmetric encryption for established sessions.
//!
//! Frames are sealed with XChaCha20-Poly1305 under a random 24-byte nonce, so a single session
//! key can protect an unbounded number of frames without coordinating nonces between peers.

use super::Error;
use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, Payload},
    KeyInit, XChaCha20Poly1305, XNonce,
};
use rand::{CryptoRng, Rng};
use std::fmt::{Debug, Formatter};
use zeroize::Zeroize;

/// Length of a session key.
pub const KEY_LENGTH: usize = 32;

/// Length of the nonce prepended to every ciphertext.
pub const NONCE_LENGTH: usize = 24;

/// Length of the authentication tag appended to every ciphertext.
pub const TAG_LENGTH: usize = 16;

/// Bytes added to a plaintext by [encrypt].
pub const OVERHEAD: usize = NONCE_LENGTH + TAG_LENGTH;

/// Length of the value returned by [checksum].
pub const CHECKSUM_LENGTH: usize = 4;

/// Symmetric key shared by the two ends of a session.
#[derive(Clone, PartialEq, Eq)]
pub struct Key([u8; KEY_LENGTH]);

impl Key {
    /// Generate a fresh key.
    pub fn random<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let mut key = [0u8; KEY_LENGTH];
        rng.fill_bytes(&mut key);
        Self(key)
    }

    /// Parse a key received during the handshake.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| Error::InvalidKey)?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(GenericArray::from_slice(&self.0))
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Key([REDACTED])")
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Encrypt `plaintext` under `key`, authenticating `aad` alongside it.
///
/// Returns `nonce || ciphertext || tag`.
pub fn encrypt<R: Rng + CryptoRng>(
    rng: &mut R,
    key: &Key,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut nonce = [0u8; NONCE_LENGTH];
    rng.fill_bytes(&mut nonce);
    let ciphertext = key
        .cipher()
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::SealFailed)?;
    let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt the output of [encrypt].
pub fn decrypt(key: &Key, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, Error> {
    if sealed.len() < OVERHEAD {
        return Err(Error::TooShort);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
    key.cipher()
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Error::OpenFailed)
}

/// Cheap integrity check run before any decryption is attempted.
pub fn checksum(data: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    crc32fast::hash(data).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_encrypt_decrypt() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = Key::random(&mut rng);
        let sealed = encrypt(&mut rng, &key, b"header", b"payload").unwrap();
        assert_eq!(sealed.len(), b"payload".len() + OVERHEAD);
        assert_eq!(decrypt(&key, b"header", &sealed).unwrap(), b"payload");
    }

    #[test]
    fn test_decrypt_wrong_aad() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = Key::random(&mut rng);
        let sealed = encrypt(&mut rng, &key, b"header", b"payload").unwrap();
        assert_eq!(decrypt(&key, b"other", &sealed), Err(Error::OpenFailed));
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = Key::random(&mut rng);
        let other = Key::random(&mut rng);
        assert_ne!(key, other);
        let sealed = encrypt(&mut rng, &key, b"header", b"payload").unwrap();
        assert_eq!(decrypt(&other, b"header", &sealed), Err(Error::OpenFailed));
    }

    #[test]
    fn test_decrypt_short() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = Key::random(&mut rng);
        assert_eq!(
            decrypt(&key, b"header", &[0u8; OVERHEAD - 1]),
            Err(Error::TooShort)
        );
    }

    #[test]
    fn test_nonce_is_random() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = Key::random(&mut rng);
        let first = encrypt(&mut rng, &key, b"", b"payload").unwrap();
        let second = encrypt(&mut rng, &key, b"", b"payload").unwrap();
        assert_ne!(first[..NONCE_LENGTH], second[..NONCE_LENGTH]);
    }

    #[test]
    fn test_key_from_slice() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = Key::random(&mut rng);
        assert_eq!(Key::from_slice(key.as_bytes()).unwrap(), key);
        assert_eq!(Key::from_slice(&[0u8; 31]), Err(Error::InvalidKey));
    }

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(b"123456789"), 0xCBF43926u32.to_be_bytes());
        assert_ne!(checksum(b"a"), checksum(b"b"));
    }
}
