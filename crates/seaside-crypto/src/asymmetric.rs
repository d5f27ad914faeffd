use blake2::Blake2b;
use blake2::digest::consts::U32;
use blake2::digest::{Digest, FixedOutput, Update};
use x25519_dalek::{PublicKey, StaticSecret};

/// BLAKE2b configured for a 32-byte digest, matching `BLAKE2b-32` in the
/// design's key derivation function.
type Blake2b32 = Blake2b<U32>;

use crate::elligator;
use crate::symmetric::{CIPHERTEXT_OVERHEAD as SYMMETRIC_OVERHEAD, Symmetric, SymmetricError};

/// Size in bytes of the hidden ephemeral public point appended to every
/// asymmetric envelope.
const HIDDEN_PUBLIC_SIZE: usize = 32;

/// Total wire overhead of `Asymmetric::seal`: the hidden public point plus
/// the inner symmetric envelope's overhead.
pub const CIPHERTEXT_OVERHEAD: usize = HIDDEN_PUBLIC_SIZE + SYMMETRIC_OVERHEAD;

#[derive(Debug, thiserror::Error)]
pub enum AsymmetricError {
    #[error("envelope shorter than the minimum overhead ({CIPHERTEXT_OVERHEAD} bytes)")]
    Truncated,
    #[error("private key required to open an asymmetric envelope, but this instance holds only a public key")]
    NoPrivateKey,
    #[error(transparent)]
    Symmetric(#[from] SymmetricError),
}

/// Elligator-hidden X25519 key exchange with a BLAKE2b key derivation,
/// producing a fresh `Symmetric` cipher for every sealed message.
///
/// A listener-side instance holds both the private and public key of its
/// long-lived identity. A client-side instance holds only the listener's
/// public key, since the client never needs to *open* an asymmetric
/// envelope (the listener replies with a symmetric one, see spec §4.3/4.4).
#[derive(Clone)]
pub struct Asymmetric {
    private: Option<StaticSecret>,
    public: PublicKey,
}

impl Asymmetric {
    /// Generate a fresh keypair (listener side).
    pub fn generate() -> Self {
        let private = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&private);
        Self {
            private: Some(private),
            public,
        }
    }

    /// Restore a listener identity from a 64-byte seed (private ∥ public).
    pub fn from_seed(seed: &[u8; 64]) -> Self {
        let mut private_bytes = [0u8; 32];
        private_bytes.copy_from_slice(&seed[..32]);
        let mut public_bytes = [0u8; 32];
        public_bytes.copy_from_slice(&seed[32..]);

        Self {
            private: Some(StaticSecret::from(private_bytes)),
            public: PublicKey::from(public_bytes),
        }
    }

    /// Client-side: only the peer's public key is known.
    pub fn from_public(public: [u8; 32]) -> Self {
        Self {
            private: None,
            public: PublicKey::from(public),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Derive a fresh session cipher and its hidden ephemeral public key,
    /// without sealing anything yet. Lets a caller seal more than one
    /// plaintext (e.g. a header and a payload, as PORT's Client INIT does)
    /// under the same session key while sharing a single hidden point.
    pub fn begin_session(&self) -> (Symmetric, [u8; 32]) {
        let (ephemeral_secret, _ephemeral_public, hidden_public) = elligator::generate_hideable_keypair();
        let shared = ephemeral_secret.diffie_hellman(&self.public);
        let key = derive_key(shared.as_bytes(), &hidden_public, self.public.as_bytes());
        (Symmetric::new(&key), hidden_public)
    }

    /// Seal `plaintext` to this instance's public key, returning the
    /// derived session key and `sealed ∥ hidden_pub(32)`.
    pub fn seal(&self, plaintext: &[u8]) -> (Symmetric, Vec<u8>) {
        let (cipher, hidden_public) = self.begin_session();
        let mut sealed = cipher.seal(plaintext, Some(&hidden_public));
        sealed.extend_from_slice(&hidden_public);
        (cipher, sealed)
    }

    /// Open an envelope produced by `seal` against our own private key.
    /// Returns the derived session key and the plaintext.
    pub fn open(&self, envelope: &[u8]) -> Result<(Symmetric, Vec<u8>), AsymmetricError> {
        let Some(private) = self.private.as_ref() else {
            return Err(AsymmetricError::NoPrivateKey);
        };
        if envelope.len() < HIDDEN_PUBLIC_SIZE {
            return Err(AsymmetricError::Truncated);
        }

        let (sealed, hidden_public_bytes) = envelope.split_at(envelope.len() - HIDDEN_PUBLIC_SIZE);
        let mut hidden_public = [0u8; 32];
        hidden_public.copy_from_slice(hidden_public_bytes);

        let ephemeral_public = elligator::unhide(&hidden_public);
        let shared = private.diffie_hellman(&ephemeral_public);

        let key = derive_key(shared.as_bytes(), &hidden_public, self.public.as_bytes());
        let cipher = Symmetric::new(&key);
        let plaintext = cipher.open(sealed, Some(&hidden_public))?;
        Ok((cipher, plaintext))
    }
}

/// `BLAKE2b-32(shared_secret ∥ hidden_pub ∥ peer_pub)`.
fn derive_key(shared_secret: &[u8; 32], hidden_pub: &[u8; 32], peer_pub: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Blake2b32::new();
    Update::update(&mut hasher, shared_secret);
    Update::update(&mut hasher, hidden_pub);
    Update::update(&mut hasher, peer_pub);
    hasher.finalize_fixed().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip_shares_key() {
        let listener = Asymmetric::generate();
        let client = Asymmetric::from_public(listener.public_key());

        let (client_key, envelope) = client.seal(b"hello listener");
        let (listener_key, plaintext) = listener.open(&envelope).unwrap();

        assert_eq!(plaintext, b"hello listener");
        // Both sides must derive the identical session key.
        let probe = b"probe";
        assert_eq!(
            client_key.seal(probe, None).len(),
            listener_key.seal(probe, None).len()
        );
    }

    #[test]
    fn client_side_cannot_open() {
        let listener = Asymmetric::generate();
        let client = Asymmetric::from_public(listener.public_key());
        let (_key, envelope) = client.seal(b"x");
        assert!(matches!(client.open(&envelope), Err(AsymmetricError::NoPrivateKey)));
    }

    #[test]
    fn from_seed_matches_generate_shape() {
        let original = Asymmetric::generate();
        // Reconstructing from an arbitrary 64-byte seed should still work
        // mechanically even though we don't have access to the private
        // scalar of `original` here; this exercises the seed constructor.
        let seed = [0x42u8; 64];
        let restored = Asymmetric::from_seed(&seed);
        assert_eq!(restored.public_key().len(), 32);
        let _ = original.public_key();
    }
}
