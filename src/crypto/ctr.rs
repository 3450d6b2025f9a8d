//! AES-256 counter-mode stream cipher with the split 16-byte counter the
//! protocol uses.
//!
//! The counter block for the i-th block of a message is
//! `(prefix + i) [8, big-endian] ‖ suffix [8]`: the incrementing half leads
//! and the handshake-agreed suffix trails. The off-the-shelf CTR flavours
//! increment the trailing bytes of the block, so the keystream is driven
//! here directly from the block primitive.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;

/// Symmetric key length.
pub const KEY_LEN: usize = 32;

/// Cipher block length; counters advance by `ceil(len / BLOCK_LEN)` per
/// message.
pub const BLOCK_LEN: usize = 16;

/// Length of each half of the split counter.
pub const COUNTER_HALF_LEN: usize = 8;

/// AES-256 in counter mode over a fixed counter suffix.
pub struct Aes256Ctr {
    cipher: Aes256,
    suffix: [u8; COUNTER_HALF_LEN],
}

impl Aes256Ctr {
    /// Key a cipher for one direction of a session.
    pub fn new(key: &[u8; KEY_LEN], suffix: [u8; COUNTER_HALF_LEN]) -> Self {
        Self {
            cipher: Aes256::new(GenericArray::from_slice(key)),
            suffix,
        }
    }

    /// XOR the keystream starting at counter prefix `prefix` into `buf`.
    ///
    /// Encryption and decryption are the same operation. Returns the number
    /// of blocks consumed so the caller can advance its direction counter.
    pub fn apply(&self, prefix: u64, buf: &mut [u8]) -> u64 {
        let mut blocks: u64 = 0;
        for chunk in buf.chunks_mut(BLOCK_LEN) {
            let mut block = GenericArray::default();
            block[..COUNTER_HALF_LEN]
                .copy_from_slice(&prefix.wrapping_add(blocks).to_be_bytes());
            block[COUNTER_HALF_LEN..].copy_from_slice(&self.suffix);
            self.cipher.encrypt_block(&mut block);

            chunk
                .iter_mut()
                .zip(block.iter())
                .for_each(|(byte, key)| *byte ^= key);
            blocks += 1;
        }
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // FIPS-197 Appendix C.3
    const KEY: [u8; KEY_LEN] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
        0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d,
        0x1e, 0x1f,
    ];
    const CT: [u8; BLOCK_LEN] = [
        0x8e, 0xa2, 0xb7, 0xca, 0x51, 0x67, 0x45, 0xbf, 0xea, 0xfc, 0x49, 0x90, 0x4b, 0x49, 0x60,
        0x89,
    ];

    #[test]
    fn keystream_block_is_aes_of_counter() {
        // counter block chosen to match the FIPS-197 C.3 plaintext
        // 00112233445566778899aabbccddeeff
        let cipher = Aes256Ctr::new(&KEY, [0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

        let mut buf: [u8; BLOCK_LEN] = [0; BLOCK_LEN];
        let blocks = cipher.apply(0x0011223344556677, &mut buf);
        assert_eq!(blocks, 1);
        assert_eq!(buf, CT);
    }

    #[test]
    fn round_trip() {
        let cipher = Aes256Ctr::new(&KEY, [7; COUNTER_HALF_LEN]);

        let mut buf: [u8; 50] = [0x5A; 50];
        assert_eq!(cipher.apply(3, &mut buf), 4);
        assert_ne!(buf, [0x5A; 50]);
        assert_eq!(cipher.apply(3, &mut buf), 4);
        assert_eq!(buf, [0x5A; 50]);
    }

    #[test]
    fn prefix_advances_per_block() {
        let cipher = Aes256Ctr::new(&KEY, [7; COUNTER_HALF_LEN]);

        let mut whole: [u8; 48] = [0; 48];
        cipher.apply(10, &mut whole);

        let mut split: [u8; 48] = [0; 48];
        for (i, chunk) in split.chunks_mut(BLOCK_LEN).enumerate() {
            cipher.apply(10 + i as u64, chunk);
        }
        assert_eq!(whole, split);
    }

    #[test]
    fn distinct_prefixes_distinct_keystream() {
        let cipher = Aes256Ctr::new(&KEY, [7; COUNTER_HALF_LEN]);

        let mut a: [u8; BLOCK_LEN] = [0; BLOCK_LEN];
        let mut b: [u8; BLOCK_LEN] = [0; BLOCK_LEN];
        cipher.apply(0, &mut a);
        cipher.apply(1, &mut b);
        assert_ne!(a, b);
    }
}
