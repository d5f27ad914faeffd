//! Crypto envelope for SeasideVPN wire protocols.
//!
//! Two primitives, consumed as black boxes per the design: `Asymmetric`
//! (Elligator-hidden X25519 key exchange + BLAKE2b key derivation) and
//! `Symmetric` (XChaCha20-Poly1305 AEAD). Neither type does any framing —
//! that's `seaside-protocol`'s job.

mod asymmetric;
mod elligator;
mod symmetric;

pub use asymmetric::{Asymmetric, AsymmetricError, CIPHERTEXT_OVERHEAD as ASYMMETRIC_CIPHERTEXT_OVERHEAD};
pub use symmetric::{CIPHERTEXT_OVERHEAD as SYMMETRIC_CIPHERTEXT_OVERHEAD, Symmetric, SymmetricError};

/// Size in bytes of a raw X25519 public or private scalar.
pub const KEY_SIZE: usize = 32;
