//! Thin adapter over the `elligator2` crate.
//!
//! Isolated in its own module so the rest of `seaside-crypto` never has to
//! know which Elligator variant or tweak convention is in use.

use elligator2::{MapToPointVariant, Randomized};
use rand::RngCore;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

/// Generate an ephemeral X25519 keypair whose public point can be hidden.
///
/// Elligator2 only maps roughly half of all curve points to a uniform
/// representative, so generation is retried (as the scheme requires) until
/// a representative is found.
pub fn generate_hideable_keypair() -> (StaticSecret, PublicKey, [u8; 32]) {
    loop {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        let mut tweak = [0u8; 1];
        OsRng.fill_bytes(&mut tweak);

        if let Some(representative) = Randomized::to_representative(public.as_bytes(), tweak[0]) {
            return (secret, public, representative);
        }
    }
}

/// Map a received 32-byte hidden representative back onto the curve.
pub fn unhide(representative: &[u8; 32]) -> PublicKey {
    let point = Randomized::representative_to_public(representative);
    PublicKey::from(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hide_and_unhide_round_trips() {
        let (_secret, public, hidden) = generate_hideable_keypair();
        let recovered = unhide(&hidden);
        assert_eq!(public.as_bytes(), recovered.as_bytes());
    }
}
