use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;

/// MAC length of the XChaCha20-Poly1305 tag, in bytes.
const MAC_LENGTH: usize = 16;
/// Extended nonce length for XChaCha20, in bytes.
const NONCE_LENGTH: usize = 24;

/// Wire overhead `Symmetric::seal` adds on top of the plaintext length.
pub const CIPHERTEXT_OVERHEAD: usize = MAC_LENGTH + NONCE_LENGTH;

#[derive(Debug, thiserror::Error)]
pub enum SymmetricError {
    #[error("ciphertext shorter than the minimum envelope overhead ({CIPHERTEXT_OVERHEAD} bytes)")]
    Truncated,
    #[error("AEAD authentication failed")]
    Forged,
}

/// XChaCha20-Poly1305 AEAD over a fixed 32-byte key.
///
/// `seal`/`open` implement the single wire envelope every PORT and
/// TYPHOON message (besides the client INIT's asymmetric envelope) is
/// built from: `ciphertext ∥ mac(16) ∥ nonce(24)`.
pub struct Symmetric {
    cipher: XChaCha20Poly1305,
}

impl Symmetric {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Seal `plaintext`, optionally authenticating `ad` without encrypting
    /// it. Returns `ciphertext ∥ mac ∥ nonce`.
    pub fn seal(&self, plaintext: &[u8], ad: Option<&[u8]>) -> Vec<u8> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let payload = Payload {
            msg: plaintext,
            aad: ad.unwrap_or(&[]),
        };

        // Only fails if `plaintext` exceeds the cipher's maximum message
        // length, which never happens for VPN-sized packets.
        let sealed = self
            .cipher
            .encrypt(nonce, payload)
            .expect("XChaCha20-Poly1305 encryption cannot fail for packet-sized input");

        let mut out = Vec::with_capacity(sealed.len() + NONCE_LENGTH);
        out.extend_from_slice(&sealed);
        out.extend_from_slice(&nonce_bytes);
        out
    }

    /// Open an envelope produced by `seal`, verifying `ad` if given.
    pub fn open(&self, envelope: &[u8], ad: Option<&[u8]>) -> Result<Vec<u8>, SymmetricError> {
        if envelope.len() < NONCE_LENGTH + MAC_LENGTH {
            return Err(SymmetricError::Truncated);
        }

        let (ciphertext, nonce_bytes) = envelope.split_at(envelope.len() - NONCE_LENGTH);
        let nonce = XNonce::from_slice(nonce_bytes);

        let payload = Payload {
            msg: ciphertext,
            aad: ad.unwrap_or(&[]),
        };

        self.cipher
            .decrypt(nonce, payload)
            .map_err(|_| SymmetricError::Forged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = [7u8; 32];
        let cipher = Symmetric::new(&key);
        let plaintext = b"the quick brown fox";

        let sealed = cipher.seal(plaintext, None);
        assert_eq!(sealed.len(), plaintext.len() + CIPHERTEXT_OVERHEAD);

        let opened = cipher.open(&sealed, None).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn seal_open_round_trip_with_ad() {
        let key = [9u8; 32];
        let cipher = Symmetric::new(&key);
        let plaintext = b"additional data protects this";
        let ad = b"hidden-ephemeral-public-key-32b";

        let sealed = cipher.seal(plaintext, Some(ad));
        let opened = cipher.open(&sealed, Some(ad)).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn tampered_ad_fails_to_open() {
        let key = [3u8; 32];
        let cipher = Symmetric::new(&key);
        let sealed = cipher.seal(b"payload", Some(b"correct-ad"));
        assert!(matches!(
            cipher.open(&sealed, Some(b"wrong-ad......")),
            Err(SymmetricError::Forged)
        ));
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let key = [1u8; 32];
        let cipher = Symmetric::new(&key);
        assert!(matches!(cipher.open(&[0u8; 4], None), Err(SymmetricError::Truncated)));
    }
}
