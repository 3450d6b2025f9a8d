//! Authenticated, encrypted voice sessions over narrowband acoustic
//! half-duplex links.
//!
//! VoiZ adapts the ZRTP key-agreement idea to a transport where each frame is
//! at most 64 bytes and nothing below the application retransmits, orders, or
//! acknowledges: a finite-field Diffie-Hellman handshake whose integrity is
//! bootstrapped by a per-session hash chain, with every handshake packet
//! protected by a truncated HMAC. After key agreement both peers relay
//! compressed voice frames under AES-256 in counter mode.
//!
//! The modem (GFSK modulation, audio I/O) and the voice codec are external;
//! they are reached through the [`Modem`], [`VoiceSource`], and [`VoiceSink`]
//! traits. The `voiz-loopsim` crate provides in-memory implementations for
//! development and testing.
//!
//! # Warning
//!
//! ⚠️ This is prototype cryptography ⚠️
//!
//! Voice frames carry no per-frame MAC; the only integrity check on a voice
//! frame is the tag byte recovered by decryption. Replayed voice frames are
//! accepted. The 8-byte truncated packet MACs give 64-bit forgery resistance,
//! acceptable only because the packets are additionally bound by hash-chain
//! preimage commitments and the acoustic channel is far too slow for online
//! forgery search. Do not strengthen the scheme unilaterally; peers would
//! desynchronise.
//!
//! # Limitations
//!
//! * No session resumption.
//! * No certificate identity, no SAS voice confirmation.
//! * Single fixed crypto suite: MODP-2048 group 14, SHA-256, HMAC-SHA-256
//!   truncated to 8 bytes, AES-256-CTR. No negotiation.
//!
//! # Feature Flags
//!
//! All features are disabled by default.
//!
//! * `testing`: expose session internals for cross-role assertions in
//!   integration tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
mod handshake;
pub mod identity;
mod link;
mod modem;
pub mod pkt;
mod session;
mod voice;

pub use handshake::{Established, Handshake};
pub use link::{Link, LinkConfig};
pub use modem::{Modem, PAYLOAD_LEN};
pub use pkt::PacketType;
pub use rand_core;
pub use session::{Role, Session};
pub use voice::{Relay, VoiceSink, VoiceSource};

use core::fmt;

/// Session errors.
///
/// Every handshake-phase error is fatal to the session: the MAC and
/// hash-chain bindings refer to specific frames already on the wire, so there
/// is nothing to retry. Only voice-phase decrypt failures are recovered
/// locally (the frame is dropped and the session continues); they never
/// surface here.
#[derive(Debug)]
pub enum Error<E> {
    /// No frame of the expected type arrived within the attempt budget.
    Timeout,
    /// A frame of the expected type could not be parsed at the documented
    /// offsets.
    Malformed(PacketType),
    /// Truncated HMAC mismatch on the named packet.
    Hmac(PacketType),
    /// A revealed hash-chain preimage does not hash to the previously
    /// committed value.
    HashChain,
    /// The ZID carried in COMMIT does not match the ZID from HELLO.
    ZidMismatch,
    /// I/O error from the external voice encoder or decoder.
    Io(std::io::Error),
    /// Error from the [`Modem`] implementation.
    Modem(E),
}

impl<E> From<E> for Error<E> {
    fn from(error: E) -> Error<E> {
        Error::Modem(error)
    }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Timeout => write!(f, "timeout waiting for expected packet"),
            Error::Malformed(t) => write!(f, "malformed {t:?} packet"),
            Error::Hmac(t) => write!(f, "HMAC verification failed for {t:?} packet"),
            Error::HashChain => write!(f, "hash chain verification failed"),
            Error::ZidMismatch => write!(f, "COMMIT ZID does not match HELLO ZID"),
            Error::Io(e) => write!(f, "voice codec I/O error: {e}"),
            Error::Modem(e) => write!(f, "modem error: {e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Error<E> {}

#[cfg(test)]
pub(crate) mod testutil {
    use rand_core::{CryptoRng, RngCore};

    /// Deterministic generator for unit tests. Not cryptographically secure.
    // sPCG32 from https://www.pcg-random.org/paper.html
    pub struct TestRng {
        state: u64,
    }

    impl TestRng {
        pub const fn new(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl RngCore for TestRng {
        fn next_u32(&mut self) -> u32 {
            const M: u64 = 0xbb2efcec3c39611d;
            const A: u64 = 0x7590ef39;

            let s = self.state.wrapping_mul(M).wrapping_add(A);
            self.state = s;

            let shift = 29 - (s >> 61);
            (s >> shift) as u32
        }

        fn next_u64(&mut self) -> u64 {
            (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for chunk in dest.chunks_mut(4) {
                let word: [u8; 4] = self.next_u32().to_be_bytes();
                chunk.copy_from_slice(&word[..chunk.len()]);
            }
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    impl CryptoRng for TestRng {}

    /// Two role-paired sessions with exchanged public keys, a shared
    /// synthetic transcript, and derived keys, plus their ZIDs.
    pub fn established_pair() -> (crate::Session, crate::Session, crate::identity::Zid, crate::identity::Zid) {
        use crate::identity::Zid;
        use crate::{Role, Session};

        let mut irng = TestRng::new(0xA11CE);
        let mut rrng = TestRng::new(0xB0B);

        let mut initiator = Session::new(Role::Initiator, &mut irng);
        let mut responder = Session::new(Role::Responder, &mut rrng);
        let zid_i = Zid::generate(&mut irng);
        let zid_r = Zid::generate(&mut rrng);

        responder.set_counter_suffix(initiator.counter_suffix());

        let i_public = initiator.packed_public_key();
        let r_public = responder.packed_public_key();
        initiator.set_partner_public_key(&r_public);
        responder.set_partner_public_key(&i_public);

        let transcript: Vec<u8> = (0u16..748).map(|i| i as u8).collect();
        initiator.set_transcript(&transcript);
        responder.set_transcript(&transcript);

        initiator.compute_secret(&zid_i, &zid_r);
        responder.compute_secret(&zid_i, &zid_r);
        initiator.derive_keys();
        responder.derive_keys();

        (initiator, responder, zid_i, zid_r)
    }
}
