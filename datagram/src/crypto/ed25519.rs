//! Ed25519 signatures with X25519 sealing.

use super::{Error, Identity};
use bytes::Bytes;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, KeyInit, KeySizeUser};
use commonware_codec::{DecodeExt, Encode};
use commonware_cryptography::{ed25519, PrivateKeyExt as _, Signer as _, Verifier as _};
use hkdf::{hmac::digest::typenum::Unsigned, Hkdf};
use rand::{rngs::StdRng, CryptoRng, Rng, SeedableRng};
use sha2::Sha256;
use std::fmt::{Debug, Formatter};
use x25519_dalek::{EphemeralSecret, PublicKey as SealingKey, StaticSecret};
use zeroize::Zeroize;

const SEALING_KEY_LENGTH: usize = 32;
const TAG_LENGTH: usize = 16;
const CHACHA_KEY_SIZE: usize = <ChaCha20Poly1305 as KeySizeUser>::KeySize::USIZE;

/// Prefix of the HKDF salt used when sealing.
const SEAL_SALT: &[u8] = b"commonware-datagram/seal/v1";

/// Bytes added to a plaintext by [Identity::seal].
pub const SEAL_OVERHEAD: usize = SEALING_KEY_LENGTH + TAG_LENGTH;

/// Ed25519 signing key paired with an X25519 static secret.
#[derive(Clone)]
pub struct PrivateKey {
    signer: ed25519::PrivateKey,
    secret: StaticSecret,
}

impl PrivateKey {
    /// Generate a new identity from `rng`.
    pub fn from_rng<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let signer = ed25519::PrivateKey::from_rng(&mut *rng);
        let secret = StaticSecret::random_from_rng(&mut *rng);
        Self { signer, secret }
    }

    /// Deterministically derive an identity from `seed`.
    ///
    /// Intended for tests and demos only.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_rng(&mut rng)
    }
}

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Public half of a [PrivateKey].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey {
    verifier: ed25519::PublicKey,
    sealing: [u8; SEALING_KEY_LENGTH],
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.verifier)
    }
}

/// Derive the cipher used to seal to `recipient` with the ephemeral key `ephemeral`.
fn derive(
    shared: &[u8],
    ephemeral: &[u8; SEALING_KEY_LENGTH],
    recipient: &[u8; SEALING_KEY_LENGTH],
) -> Result<ChaCha20Poly1305, Error> {
    let prk = Hkdf::<Sha256>::new(Some(SEAL_SALT), shared);
    let mut info = [0u8; 2 * SEALING_KEY_LENGTH];
    info[..SEALING_KEY_LENGTH].copy_from_slice(ephemeral);
    info[SEALING_KEY_LENGTH..].copy_from_slice(recipient);
    let mut key = [0u8; CHACHA_KEY_SIZE];
    prk.expand(&info, &mut key).map_err(|_| Error::KeyDerivation)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|_| Error::InvalidKey);
    key.zeroize();
    cipher
}

impl Identity for PrivateKey {
    type PublicKey = PublicKey;

    fn public_key(&self) -> PublicKey {
        PublicKey {
            verifier: self.signer.public_key(),
            sealing: SealingKey::from(&self.secret).to_bytes(),
        }
    }

    fn sign(&self, namespace: &[u8], message: &[u8]) -> Bytes {
        self.signer.sign(Some(namespace), message).encode().freeze()
    }

    fn verify(public_key: &PublicKey, namespace: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = ed25519::Signature::decode(signature) else {
            return false;
        };
        public_key.verifier.verify(Some(namespace), message, &signature)
    }

    fn seal<R: Rng + CryptoRng>(
        rng: &mut R,
        recipient: &PublicKey,
        plaintext: &[u8],
    ) -> Result<Bytes, Error> {
        let ephemeral = EphemeralSecret::random_from_rng(&mut *rng);
        let ephemeral_public = SealingKey::from(&ephemeral).to_bytes();
        let shared = ephemeral.diffie_hellman(&SealingKey::from(recipient.sealing));
        if !shared.was_contributory() {
            return Err(Error::InvalidKey);
        }
        let cipher = derive(shared.as_bytes(), &ephemeral_public, &recipient.sealing)?;

        // Every seal uses a fresh ephemeral key, so the nonce never repeats for a given key.
        let ciphertext = cipher
            .encrypt(&Default::default(), plaintext)
            .map_err(|_| Error::SealFailed)?;
        let mut sealed = Vec::with_capacity(SEALING_KEY_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&ephemeral_public);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed.into())
    }

    fn open(&self, ciphertext: &[u8]) -> Result<Bytes, Error> {
        if ciphertext.len() < SEAL_OVERHEAD {
            return Err(Error::TooShort);
        }
        let (ephemeral, ciphertext) = ciphertext.split_at(SEALING_KEY_LENGTH);
        let ephemeral: [u8; SEALING_KEY_LENGTH] =
            ephemeral.try_into().map_err(|_| Error::InvalidKey)?;
        let shared = self.secret.diffie_hellman(&SealingKey::from(ephemeral));
        if !shared.was_contributory() {
            return Err(Error::InvalidKey);
        }
        let recipient = SealingKey::from(&self.secret).to_bytes();
        let cipher = derive(shared.as_bytes(), &ephemeral, &recipient)?;
        cipher
            .decrypt(&Default::default(), ciphertext)
            .map(Bytes::from)
            .map_err(|_| Error::OpenFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMESPACE: &[u8] = b"test_namespace";
    const SIGNATURE_LENGTH: usize = 64;

    #[test]
    fn test_sign_verify() {
        let key = PrivateKey::from_seed(0);
        let signature = key.sign(NAMESPACE, b"hello");
        assert_eq!(signature.len(), SIGNATURE_LENGTH);
        assert!(PrivateKey::verify(
            &key.public_key(),
            NAMESPACE,
            b"hello",
            &signature
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_namespace() {
        let key = PrivateKey::from_seed(0);
        let signature = key.sign(NAMESPACE, b"hello");
        assert!(!PrivateKey::verify(
            &key.public_key(),
            b"other_namespace",
            b"hello",
            &signature
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_signer() {
        let key = PrivateKey::from_seed(0);
        let other = PrivateKey::from_seed(1);
        let signature = other.sign(NAMESPACE, b"hello");
        assert!(!PrivateKey::verify(
            &key.public_key(),
            NAMESPACE,
            b"hello",
            &signature
        ));
    }

    #[test]
    fn test_verify_rejects_malformed_signature() {
        let key = PrivateKey::from_seed(0);
        let signature = key.sign(NAMESPACE, b"hello");
        assert!(!PrivateKey::verify(
            &key.public_key(),
            NAMESPACE,
            b"hello",
            &signature[..SIGNATURE_LENGTH - 1]
        ));

        let mut flipped = signature.to_vec();
        flipped[0] ^= 1;
        assert!(!PrivateKey::verify(
            &key.public_key(),
            NAMESPACE,
            b"hello",
            &flipped
        ));
    }

    #[test]
    fn test_seed_is_deterministic() {
        assert_eq!(
            PrivateKey::from_seed(7).public_key(),
            PrivateKey::from_seed(7).public_key()
        );
        assert_ne!(
            PrivateKey::from_seed(7).public_key(),
            PrivateKey::from_seed(8).public_key()
        );
    }

    #[test]
    fn test_seal_open() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = PrivateKey::from_seed(0);
        let sealed = PrivateKey::seal(&mut rng, &key.public_key(), b"secret").unwrap();
        assert_eq!(sealed.len(), b"secret".len() + SEAL_OVERHEAD);
        assert_eq!(key.open(&sealed).unwrap(), Bytes::from_static(b"secret"));
    }

    #[test]
    fn test_seal_is_randomized() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = PrivateKey::from_seed(0);
        let first = PrivateKey::seal(&mut rng, &key.public_key(), b"secret").unwrap();
        let second = PrivateKey::seal(&mut rng, &key.public_key(), b"secret").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_open_wrong_recipient() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = PrivateKey::from_seed(0);
        let other = PrivateKey::from_seed(1);
        let sealed = PrivateKey::seal(&mut rng, &key.public_key(), b"secret").unwrap();
        assert_eq!(other.open(&sealed), Err(Error::OpenFailed));
    }

    #[test]
    fn test_open_tampered() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = PrivateKey::from_seed(0);
        let mut sealed = PrivateKey::seal(&mut rng, &key.public_key(), b"secret").unwrap().to_vec();
        let last = sealed.len() - 1;
        sealed[last] ^= 1;
        assert_eq!(key.open(&sealed), Err(Error::OpenFailed));
        assert_eq!(key.open(&sealed[..SEAL_OVERHEAD - 1]), Err(Error::TooShort));
    }
}
