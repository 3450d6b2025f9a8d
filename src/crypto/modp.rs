//! Finite-field Diffie-Hellman over the MODP-2048 group.
//!
//! # References
//!
//! * [RFC 3526 Section 3](https://datatracker.ietf.org/doc/html/rfc3526#section-3)

use core::fmt;

use num_bigint::BigUint;
use rand_core::{CryptoRng, RngCore};

/// Length of a serialised public value on the wire.
pub const PUBLIC_KEY_LEN: usize = 256;

/// Private exponents carry 512 bits of CSPRNG output, comfortably above the
/// 256-bit floor the group strength calls for.
const PRIVATE_KEY_LEN: usize = 64;

const GENERATOR: u32 = 2;

/// 2048-bit MODP group 14 prime.
///
/// ```text
/// p = 2^2048 - 2^1984 - 1 + 2^64 * { [2^1918 pi] + 124476 }
/// ```
const MODP_2048_PRIME: &str = "\
    FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
    29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
    EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
    E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
    EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
    C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
    83655D23DCA3AD961C62F356208552BB9ED529077096966D\
    670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
    E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
    DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
    15728E5A8AACAA68FFFFFFFFFFFFFFFF";

pub(crate) fn prime() -> BigUint {
    // the constant is valid hex - unwrap cannot fail
    BigUint::parse_bytes(MODP_2048_PRIME.as_bytes(), 16).unwrap()
}

/// An ephemeral Diffie-Hellman keypair.
///
/// Fresh per session; dropped with the session state.
pub struct KeyPair {
    private: BigUint,
    public: BigUint,
}

impl KeyPair {
    /// Generate a fresh keypair from the CSPRNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut exponent: [u8; PRIVATE_KEY_LEN] = [0; PRIVATE_KEY_LEN];
        let private: BigUint = loop {
            rng.fill_bytes(&mut exponent);
            let candidate = BigUint::from_bytes_be(&exponent);
            if candidate.bits() >= 256 {
                break candidate;
            }
        };
        let public: BigUint = BigUint::from(GENERATOR).modpow(&private, &prime());
        Self { private, public }
    }

    /// Own public value, big-endian, zero-padded to [`PUBLIC_KEY_LEN`] bytes.
    pub fn packed_public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        let raw: Vec<u8> = self.public.to_bytes_be();
        let mut packed: [u8; PUBLIC_KEY_LEN] = [0; PUBLIC_KEY_LEN];
        packed[PUBLIC_KEY_LEN - raw.len()..].copy_from_slice(&raw);
        packed
    }

    /// `peer_public ^ private mod p`.
    pub fn shared_secret(&self, peer_public: &BigUint) -> BigUint {
        peer_public.modpow(&self.private, &prime())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "KeyPair {{ ... }}")
    }
}

/// Parse a peer's 256-byte public value.
pub fn unpack_public_key(bytes: &[u8; PUBLIC_KEY_LEN]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestRng;

    #[test]
    fn prime_is_2048_bits() {
        assert_eq!(prime().bits(), 2048);
    }

    #[test]
    fn shared_secret_commutes() {
        let mut rng = TestRng::new(0x1001);
        let a = KeyPair::generate(&mut rng);
        let b = KeyPair::generate(&mut rng);

        let ab = a.shared_secret(&unpack_public_key(&b.packed_public_key()));
        let ba = b.shared_secret(&unpack_public_key(&a.packed_public_key()));
        assert_eq!(ab, ba);
    }

    #[test]
    fn packed_public_key_round_trips() {
        let mut rng = TestRng::new(0x1002);
        let pair = KeyPair::generate(&mut rng);

        let packed = pair.packed_public_key();
        assert_eq!(unpack_public_key(&packed), pair.public);
    }

    #[test]
    fn hex_serialisation_is_bare_lowercase() {
        // the session secret derivation hashes the ASCII hex of the DH
        // result; it must carry no 0x prefix, no padding, and no suffix
        assert_eq!(format!("{:x}", BigUint::from(0xAB00CDu32)), "ab00cd");
    }
}
