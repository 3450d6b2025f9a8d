//! Per-session cryptographic state.
//!
//! Holds the hash chain, the ephemeral Diffie-Hellman keypair, the handshake
//! transcript hash, the session root secret `s0`, the four directional keys
//! derived from it, and the per-direction counter prefixes. Everything here
//! is created at session start and dropped on termination; only the ZID in
//! [`identity`](crate::identity) outlives a session.

use core::fmt;

use log::trace;
use num_bigint::BigUint;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use crate::crypto::{
    self,
    ctr::{Aes256Ctr, COUNTER_HALF_LEN, KEY_LEN},
    modp,
};
use crate::identity::Zid;

/// KDF context string mixed into the session secret.
const KDF_LABEL: &[u8] = b"ZRTP-HMAC-KDF";

const INITIATOR_ZRTP_KEY: &[u8] = b"Initiator ZRTP key";
const RESPONDER_ZRTP_KEY: &[u8] = b"Responder ZRTP key";
const INITIATOR_HMAC_KEY: &[u8] = b"Initiator HMAC key";
const RESPONDER_HMAC_KEY: &[u8] = b"Responder HMAC key";

/// Peer role, chosen at startup.
///
/// Affects message ordering and key-direction labelling only: each peer
/// encrypts and MACs its own transmissions under its own-role keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends HELLO first and drives the handshake.
    Initiator,
    /// Waits for the initiator's HELLO.
    Responder,
}

struct DirectionKeys {
    own_cipher: [u8; KEY_LEN],
    peer_cipher: [u8; KEY_LEN],
    own_hmac: [u8; KEY_LEN],
    peer_hmac: [u8; KEY_LEN],
}

/// Stateful session crypto.
///
/// The handshake state machine calls the mutating operations in a fixed
/// order: partner public key and transcript are set before
/// [`compute_secret`](Self::compute_secret), which precedes
/// [`derive_keys`](Self::derive_keys), which precedes any
/// encrypt/decrypt call.
pub struct Session {
    role: Role,

    h0: [u8; 32],
    h1: [u8; 32],
    h2: [u8; 32],
    h3: [u8; 32],

    dh: modp::KeyPair,
    peer_public: Option<BigUint>,

    counter_suffix: Option<[u8; COUNTER_HALF_LEN]>,
    total_hash: Option<[u8; 32]>,
    s0: Option<[u8; 32]>,
    keys: Option<DirectionKeys>,

    send_prefix: u64,
    recv_prefix: u64,
}

impl Session {
    /// Create fresh session state: hash chain, DH keypair, and (for the
    /// initiator) the counter suffix carried in COMMIT.
    pub fn new<R: RngCore + CryptoRng>(role: Role, rng: &mut R) -> Self {
        let mut h0: [u8; 32] = [0; 32];
        rng.fill_bytes(&mut h0);
        let h1 = crypto::sha256(&h0);
        let h2 = crypto::sha256(&h1);
        let h3 = crypto::sha256(&h2);

        let counter_suffix: Option<[u8; COUNTER_HALF_LEN]> = match role {
            Role::Initiator => {
                let mut suffix: [u8; COUNTER_HALF_LEN] = [0; COUNTER_HALF_LEN];
                rng.fill_bytes(&mut suffix);
                Some(suffix)
            }
            Role::Responder => None,
        };

        Self {
            role,
            h0,
            h1,
            h2,
            h3,
            dh: modp::KeyPair::generate(rng),
            peer_public: None,
            counter_suffix,
            total_hash: None,
            s0: None,
            keys: None,
            send_prefix: 0,
            recv_prefix: 0,
        }
    }

    /// This peer's role.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Own chain head, revealed in HELLO.
    #[inline]
    pub fn h3(&self) -> &[u8; 32] {
        &self.h3
    }

    /// Revealed in COMMIT.
    #[inline]
    pub fn h2(&self) -> &[u8; 32] {
        &self.h2
    }

    /// Revealed in DHPART.
    #[inline]
    pub fn h1(&self) -> &[u8; 32] {
        &self.h1
    }

    /// Chain root, revealed (encrypted) in CONFIRM.
    #[inline]
    pub fn h0(&self) -> &[u8; 32] {
        &self.h0
    }

    /// Truncated HMAC keyed by h2; authenticates the packet revealing h3.
    pub fn hmac_h2(&self, payload: &[u8]) -> [u8; crypto::MAC_LEN] {
        crypto::hmac_trunc(&self.h2, payload)
    }

    /// Truncated HMAC keyed by h1; authenticates the packet revealing h2.
    pub fn hmac_h1(&self, payload: &[u8]) -> [u8; crypto::MAC_LEN] {
        crypto::hmac_trunc(&self.h1, payload)
    }

    /// Truncated HMAC keyed by h0; authenticates the packet revealing h1.
    pub fn hmac_h0(&self, payload: &[u8]) -> [u8; crypto::MAC_LEN] {
        crypto::hmac_trunc(&self.h0, payload)
    }

    /// The agreed 8-byte counter suffix.
    ///
    /// Present from construction for the initiator; the responder must have
    /// received COMMIT and called
    /// [`set_counter_suffix`](Self::set_counter_suffix).
    pub fn counter_suffix(&self) -> [u8; COUNTER_HALF_LEN] {
        self.counter_suffix.unwrap()
    }

    /// Adopt the initiator's counter suffix from COMMIT.
    pub fn set_counter_suffix(&mut self, suffix: [u8; COUNTER_HALF_LEN]) {
        self.counter_suffix = Some(suffix);
    }

    /// Own public value, big-endian, zero-padded to 256 bytes.
    pub fn packed_public_key(&self) -> [u8; modp::PUBLIC_KEY_LEN] {
        self.dh.packed_public_key()
    }

    /// Adopt the peer's public value from its DHPART packets.
    pub fn set_partner_public_key(&mut self, packed: &[u8; modp::PUBLIC_KEY_LEN]) {
        self.peer_public = Some(modp::unpack_public_key(packed));
    }

    /// Commit the handshake transcript: the exact wire bytes of responder
    /// HELLO, initiator COMMIT, and both DHPART frame groups, in the order
    /// they were sent and received.
    pub fn set_transcript(&mut self, transcript: &[u8]) {
        self.total_hash = Some(crypto::sha256(transcript));
    }

    /// Derive the session root secret.
    ///
    /// ```text
    /// s0 = SHA256(hex(DH result) ‖ "ZRTP-HMAC-KDF" ‖ ZIDi ‖ ZIDr ‖ total_hash)
    /// ```
    ///
    /// The DH result is hashed as bare lowercase ASCII hex, not big-endian
    /// bytes; both sides of the wire must agree on this byte-for-byte.
    pub fn compute_secret(&mut self, zid_i: &Zid, zid_r: &Zid) {
        // ordered by the state machine: partner key and transcript are in
        // place before the secret is computed
        let peer_public = self.peer_public.as_ref().unwrap();
        let total_hash = self.total_hash.as_ref().unwrap();

        let dh_result: BigUint = self.dh.shared_secret(peer_public);

        let mut hash = Sha256::new();
        hash.update(format!("{dh_result:x}").as_bytes());
        hash.update(KDF_LABEL);
        hash.update(zid_i.as_bytes());
        hash.update(zid_r.as_bytes());
        hash.update(total_hash);
        self.s0 = Some(hash.finalize().into());
    }

    /// Expand `s0` into the four directional keys, mapped to this peer's
    /// role.
    pub fn derive_keys(&mut self) {
        let s0 = self.s0.as_ref().unwrap();

        let initiator_cipher = crypto::hmac_sha256(s0, INITIATOR_ZRTP_KEY);
        let responder_cipher = crypto::hmac_sha256(s0, RESPONDER_ZRTP_KEY);
        let initiator_hmac = crypto::hmac_sha256(s0, INITIATOR_HMAC_KEY);
        let responder_hmac = crypto::hmac_sha256(s0, RESPONDER_HMAC_KEY);

        self.keys = Some(match self.role {
            Role::Initiator => DirectionKeys {
                own_cipher: initiator_cipher,
                peer_cipher: responder_cipher,
                own_hmac: initiator_hmac,
                peer_hmac: responder_hmac,
            },
            Role::Responder => DirectionKeys {
                own_cipher: responder_cipher,
                peer_cipher: initiator_cipher,
                own_hmac: responder_hmac,
                peer_hmac: initiator_hmac,
            },
        });

        self.send_prefix = 0;
        self.recv_prefix = 0;
    }

    /// MAC key for packets this peer sends (CONFIRM, voice phase).
    pub fn own_hmac_key(&self) -> &[u8; KEY_LEN] {
        &self.keys.as_ref().unwrap().own_hmac
    }

    /// MAC key for packets the peer sends.
    pub fn peer_hmac_key(&self) -> &[u8; KEY_LEN] {
        &self.keys.as_ref().unwrap().peer_hmac
    }

    /// Counter prefix the next [`encrypt`](Self::encrypt) will start at,
    /// carried in the clear at the head of each voice frame.
    #[inline]
    pub fn send_prefix(&self) -> u64 {
        self.send_prefix
    }

    /// Encrypt in place under the own-role cipher key, advancing the send
    /// counter by one per 16-byte block.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        let keys = self.keys.as_ref().unwrap();
        let cipher = Aes256Ctr::new(&keys.own_cipher, self.counter_suffix());
        self.send_prefix = self
            .send_prefix
            .wrapping_add(cipher.apply(self.send_prefix, buf));
        trace!("send_prefix={}", self.send_prefix);
    }

    /// Decrypt in place under the peer-role cipher key, advancing the
    /// receive counter by one per 16-byte block.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        let keys = self.keys.as_ref().unwrap();
        let cipher = Aes256Ctr::new(&keys.peer_cipher, self.counter_suffix());
        self.recv_prefix = self
            .recv_prefix
            .wrapping_add(cipher.apply(self.recv_prefix, buf));
        trace!("recv_prefix={}", self.recv_prefix);
    }

    /// Decrypt a voice frame at the counter prefix it carries.
    ///
    /// Does not touch the receive counter: voice frames arrive duplicated
    /// and reordered, and each names its own counter value.
    pub fn decrypt_at(&self, prefix: u64, buf: &mut [u8]) {
        let keys = self.keys.as_ref().unwrap();
        let cipher = Aes256Ctr::new(&keys.peer_cipher, self.counter_suffix());
        cipher.apply(prefix, buf);
    }

    /// The session root secret, for cross-role assertions in tests.
    #[cfg(any(test, feature = "testing"))]
    pub fn session_secret(&self) -> Option<[u8; 32]> {
        self.s0
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Session {{ role: {:?}, ... }}", self.role)
    }
}
