//! Stateless cryptographic primitives.
//!
//! Everything stateful (hash chains, key schedules, counters) lives in
//! [`Session`](crate::Session); this module only wraps the hash, MAC, and
//! cipher primitives in the shapes the protocol uses.

pub(crate) mod ctr;
pub(crate) mod modp;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub use ctr::Aes256Ctr;

/// Length of a truncated packet MAC on the wire.
pub const MAC_LEN: usize = 8;

/// SHA-256 of an arbitrary byte string.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hash = Sha256::new();
    hash.update(data);
    hash.finalize().into()
}

/// HMAC-SHA-256 with a byte-string key.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    // HMAC-SHA-256 accepts keys of any length - unwrap cannot fail
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// First [`MAC_LEN`] bytes of HMAC-SHA-256, as carried on the wire.
pub fn hmac_trunc(key: &[u8], data: &[u8]) -> [u8; MAC_LEN] {
    // truncation to the leading bytes per the wire format
    hmac_sha256(key, data)[..MAC_LEN].try_into().unwrap()
}

/// Verify the truncated MAC of a packet payload in constant time.
pub fn verify_packet_hmac(key: &[u8], payload: &[u8], mac: &[u8; MAC_LEN]) -> bool {
    let mut expected = Hmac::<Sha256>::new_from_slice(key).unwrap();
    expected.update(payload);
    expected.verify_truncated_left(mac).is_ok()
}

/// Verify that `preimage` hashes to a previously committed chain value in
/// constant time.
pub fn verify_hash(preimage: &[u8; 32], committed: &[u8; 32]) -> bool {
    let digest: [u8; 32] = sha256(preimage);
    digest[..].ct_eq(&committed[..]).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
    const JEFE_HMAC: [u8; 32] = [
        0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95, 0x75,
        0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9, 0x64, 0xec,
        0x38, 0x43,
    ];

    #[test]
    fn hmac_vector() {
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(mac, JEFE_HMAC);
        assert_eq!(
            hmac_trunc(b"Jefe", b"what do ya want for nothing?"),
            JEFE_HMAC[..MAC_LEN]
        );
    }

    #[test]
    fn packet_hmac_rejects_payload_change() {
        let mac = hmac_trunc(b"key", b"payload");
        assert!(verify_packet_hmac(b"key", b"payload", &mac));
        assert!(!verify_packet_hmac(b"key", b"payloae", &mac));
        assert!(!verify_packet_hmac(b"kex", b"payload", &mac));
    }

    #[test]
    fn hash_verify() {
        let preimage = [0xAB; 32];
        let committed = sha256(&preimage);
        assert!(verify_hash(&preimage, &committed));

        let mut bad = committed;
        bad[31] ^= 1;
        assert!(!verify_hash(&preimage, &bad));
    }
}
