//! Packet construction and field extraction.
//!
//! Every handshake frame on the wire is exactly [`PAYLOAD_LEN`] bytes,
//! zero-padded where the logical packet is shorter; byte 0 is the type tag.
//! Construction computes the truncated MAC over the documented payload
//! bytes; extraction is mechanical on the documented offsets and returns
//! `None` (with a warning) for frames that do not fit them.
//!
//! Voice frames ([`Codec2`]) are 73 bytes and travel outside the fixed
//! 64-byte envelope, through the modem's arbitrary-length path.

use log::warn;

use crate::crypto::ctr::COUNTER_HALF_LEN;
use crate::crypto::modp::PUBLIC_KEY_LEN;
use crate::crypto::MAC_LEN;
use crate::identity::{Zid, ZID_LEN};
use crate::modem::PAYLOAD_LEN;
use crate::session::Session;

/// One-byte packet type tag.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Reveals h3 and the sender's ZID.
    Hello = 0x00,
    /// Reserved; never sent.
    HelloAck = 0x01,
    /// Reveals h2 and carries the counter suffix.
    Commit = 0x02,
    /// First frame of the responder's DHPART group.
    DhPart11 = 0x03,
    /// Second frame of the responder's DHPART group.
    DhPart12 = 0x04,
    /// Third frame of the responder's DHPART group.
    DhPart13 = 0x05,
    /// Fourth frame of the responder's DHPART group.
    DhPart14 = 0x06,
    /// Final, short frame of the responder's DHPART group.
    DhPart15 = 0x07,
    /// First frame of the initiator's DHPART group.
    DhPart21 = 0x08,
    /// Second frame of the initiator's DHPART group.
    DhPart22 = 0x09,
    /// Third frame of the initiator's DHPART group.
    DhPart23 = 0x0A,
    /// Fourth frame of the initiator's DHPART group.
    DhPart24 = 0x0B,
    /// Final, short frame of the initiator's DHPART group.
    DhPart25 = 0x0C,
    /// Reserved aggregate tag; never sent.
    DhPart2 = 0x0D,
    /// Responder's key confirmation, revealing its h0 encrypted.
    Confirm1 = 0x0E,
    /// Initiator's key confirmation, revealing its h0 encrypted.
    Confirm2 = 0x0F,
    /// Encrypted voice frame.
    Codec2 = 0x10,
}

impl From<PacketType> for u8 {
    #[inline]
    fn from(packet_type: PacketType) -> Self {
        packet_type as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            x if x == (Self::Hello as u8) => Ok(Self::Hello),
            x if x == (Self::HelloAck as u8) => Ok(Self::HelloAck),
            x if x == (Self::Commit as u8) => Ok(Self::Commit),
            x if x == (Self::DhPart11 as u8) => Ok(Self::DhPart11),
            x if x == (Self::DhPart12 as u8) => Ok(Self::DhPart12),
            x if x == (Self::DhPart13 as u8) => Ok(Self::DhPart13),
            x if x == (Self::DhPart14 as u8) => Ok(Self::DhPart14),
            x if x == (Self::DhPart15 as u8) => Ok(Self::DhPart15),
            x if x == (Self::DhPart21 as u8) => Ok(Self::DhPart21),
            x if x == (Self::DhPart22 as u8) => Ok(Self::DhPart22),
            x if x == (Self::DhPart23 as u8) => Ok(Self::DhPart23),
            x if x == (Self::DhPart24 as u8) => Ok(Self::DhPart24),
            x if x == (Self::DhPart25 as u8) => Ok(Self::DhPart25),
            x if x == (Self::DhPart2 as u8) => Ok(Self::DhPart2),
            x if x == (Self::Confirm1 as u8) => Ok(Self::Confirm1),
            x if x == (Self::Confirm2 as u8) => Ok(Self::Confirm2),
            x if x == (Self::Codec2 as u8) => Ok(Self::Codec2),
            _ => Err(value),
        }
    }
}

fn check_frame(frame: &[u8], packet_type: PacketType, len: usize) -> bool {
    if frame.len() < len {
        warn!(
            "{:?} frame is {} B, expected at least {}",
            packet_type,
            frame.len(),
            len
        );
        false
    } else if frame[0] != u8::from(packet_type) {
        warn!(
            "frame tag 0x{:02X} is not {:?}",
            frame[0], packet_type
        );
        false
    } else {
        true
    }
}

/// HELLO: `tag ‖ h3 [32] ‖ ZID [12] ‖ HMAC_h2(tag‖h3‖ZID)[..8]`.
pub struct Hello {
    buf: [u8; Self::LEN],
}

impl Hello {
    /// Logical packet length.
    pub const LEN: usize = 53;
    /// Length of the MAC'd leading payload.
    pub const SIGNED_LEN: usize = 1 + 32 + ZID_LEN;

    /// Build this peer's HELLO.
    pub fn ser(session: &Session, zid: &Zid) -> Self {
        let mut buf: [u8; Self::LEN] = [0; Self::LEN];
        buf[0] = PacketType::Hello.into();
        buf[1..33].copy_from_slice(session.h3());
        buf[33..Self::SIGNED_LEN].copy_from_slice(zid.as_bytes());
        let mac = session.hmac_h2(&buf[..Self::SIGNED_LEN]);
        buf[Self::SIGNED_LEN..].copy_from_slice(&mac);
        Self { buf }
    }

    /// Parse a received frame (padding beyond [`LEN`](Self::LEN) ignored).
    pub fn deser(frame: &[u8]) -> Option<Self> {
        check_frame(frame, PacketType::Hello, Self::LEN).then(|| {
            let mut buf: [u8; Self::LEN] = [0; Self::LEN];
            buf.copy_from_slice(&frame[..Self::LEN]);
            Self { buf }
        })
    }

    /// Revealed chain head.
    pub fn h3(&self) -> [u8; 32] {
        self.buf[1..33].try_into().unwrap()
    }

    /// Sender's ZID.
    pub fn zid(&self) -> Zid {
        Zid::try_from(&self.buf[33..Self::SIGNED_LEN]).unwrap()
    }

    /// Truncated MAC, verifiable once the sender reveals h1.
    pub fn mac(&self) -> [u8; MAC_LEN] {
        self.buf[Self::SIGNED_LEN..].try_into().unwrap()
    }

    /// The MAC'd payload bytes.
    pub fn signed(&self) -> &[u8] {
        &self.buf[..Self::SIGNED_LEN]
    }

    /// Wire bytes before padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// COMMIT: `tag ‖ h2 [32] ‖ ZID [12] ‖ counter_suffix [8] ‖ HMAC_h1(payload)[..8]`.
pub struct Commit {
    buf: [u8; Self::LEN],
}

impl Commit {
    /// Logical packet length.
    pub const LEN: usize = 61;
    /// Length of the MAC'd leading payload.
    pub const SIGNED_LEN: usize = 1 + 32 + ZID_LEN + COUNTER_HALF_LEN;

    /// Build the initiator's COMMIT.
    pub fn ser(session: &Session, zid: &Zid) -> Self {
        let mut buf: [u8; Self::LEN] = [0; Self::LEN];
        buf[0] = PacketType::Commit.into();
        buf[1..33].copy_from_slice(session.h2());
        buf[33..45].copy_from_slice(zid.as_bytes());
        buf[45..Self::SIGNED_LEN].copy_from_slice(&session.counter_suffix());
        let mac = session.hmac_h1(&buf[..Self::SIGNED_LEN]);
        buf[Self::SIGNED_LEN..].copy_from_slice(&mac);
        Self { buf }
    }

    /// Parse a received frame.
    pub fn deser(frame: &[u8]) -> Option<Self> {
        check_frame(frame, PacketType::Commit, Self::LEN).then(|| {
            let mut buf: [u8; Self::LEN] = [0; Self::LEN];
            buf.copy_from_slice(&frame[..Self::LEN]);
            Self { buf }
        })
    }

    /// Revealed h2.
    pub fn h2(&self) -> [u8; 32] {
        self.buf[1..33].try_into().unwrap()
    }

    /// Sender's ZID; must match the ZID from its HELLO.
    pub fn zid(&self) -> Zid {
        Zid::try_from(&self.buf[33..45]).unwrap()
    }

    /// Counter suffix for the session's stream cipher.
    pub fn counter_suffix(&self) -> [u8; COUNTER_HALF_LEN] {
        self.buf[45..Self::SIGNED_LEN].try_into().unwrap()
    }

    /// Truncated MAC, verifiable once the sender reveals h1.
    pub fn mac(&self) -> [u8; MAC_LEN] {
        self.buf[Self::SIGNED_LEN..].try_into().unwrap()
    }

    /// The MAC'd payload bytes.
    pub fn signed(&self) -> &[u8] {
        &self.buf[..Self::SIGNED_LEN]
    }

    /// Wire bytes before padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Number of frames a DHPART group is cut into.
pub const DHPART_FRAMES: usize = 5;

/// Wire length of each DHPART frame before padding.
pub const DHPART_FRAME_LENS: [usize; DHPART_FRAMES] = [64, 64, 64, 64, 61];

/// Which DHPART frame group a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhGroup {
    /// DHPART11..15, the responder's values.
    One,
    /// DHPART21..25, the initiator's values.
    Two,
}

impl DhGroup {
    /// Tag of the group's `idx`-th frame.
    pub fn frame_type(self, idx: usize) -> PacketType {
        debug_assert!(idx < DHPART_FRAMES);
        let base: u8 = match self {
            DhGroup::One => PacketType::DhPart11.into(),
            DhGroup::Two => PacketType::DhPart21.into(),
        };
        // base..base+4 are always valid tags - unwrap cannot fail
        PacketType::try_from(base + idx as u8).unwrap()
    }
}

/// A reassembled DHPART group.
///
/// The logical payload `h1 [32] ‖ reserved [16] ‖ DHpub [256]` is MAC'd
/// unsegmented under h0, then the 312 bytes are cut into five tagged frames.
/// The MAC can only be checked after CONFIRM reveals the peer's h0.
pub struct DhPart {
    // frame 1 complete with its tag, then the untagged tails of frames 2-5
    buf: [u8; Self::LEN],
}

impl DhPart {
    /// Reassembled length: leading tag plus the 312-byte MAC'd payload.
    pub const LEN: usize = 313;
    /// Length of the MAC'd payload.
    pub const SIGNED_LEN: usize = 32 + 16 + PUBLIC_KEY_LEN;

    const SPLITS: [(usize, usize); DHPART_FRAMES] =
        [(0, 63), (63, 126), (126, 189), (189, 252), (252, 312)];

    /// Build this peer's five DHPART frames.
    pub fn ser(session: &Session, group: DhGroup) -> [Vec<u8>; DHPART_FRAMES] {
        let mut payload: [u8; Self::SIGNED_LEN + MAC_LEN] = [0; Self::SIGNED_LEN + MAC_LEN];
        payload[..32].copy_from_slice(session.h1());
        // bytes 32..48 are reserved (retained-secret IDs, always zero)
        payload[48..Self::SIGNED_LEN].copy_from_slice(&session.packed_public_key());
        let mac = session.hmac_h0(&payload[..Self::SIGNED_LEN]);
        payload[Self::SIGNED_LEN..].copy_from_slice(&mac);

        core::array::from_fn(|idx| {
            let (start, end) = Self::SPLITS[idx];
            let mut frame: Vec<u8> = Vec::with_capacity(1 + end - start);
            frame.push(group.frame_type(idx).into());
            frame.extend_from_slice(&payload[start..end]);
            frame
        })
    }

    /// Reassemble a received group from its five frames, in order.
    pub fn deser(frames: &[Vec<u8>; DHPART_FRAMES], group: DhGroup) -> Option<Self> {
        for (idx, frame) in frames.iter().enumerate() {
            if !check_frame(frame, group.frame_type(idx), DHPART_FRAME_LENS[idx]) {
                return None;
            }
        }

        let mut buf: [u8; Self::LEN] = [0; Self::LEN];
        buf[..64].copy_from_slice(&frames[0][..64]);
        let mut at: usize = 64;
        for (idx, frame) in frames.iter().enumerate().skip(1) {
            let tail = &frame[1..DHPART_FRAME_LENS[idx]];
            buf[at..at + tail.len()].copy_from_slice(tail);
            at += tail.len();
        }
        Some(Self { buf })
    }

    /// Revealed h1.
    pub fn h1(&self) -> [u8; 32] {
        self.buf[1..33].try_into().unwrap()
    }

    /// Sender's public value.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.buf[49..49 + PUBLIC_KEY_LEN].try_into().unwrap()
    }

    /// Truncated MAC keyed by the sender's h0.
    pub fn mac(&self) -> [u8; MAC_LEN] {
        self.buf[1 + Self::SIGNED_LEN..].try_into().unwrap()
    }

    /// The MAC'd payload bytes.
    pub fn signed(&self) -> &[u8] {
        &self.buf[1..1 + Self::SIGNED_LEN]
    }
}

/// CONFIRM: `tag ‖ HMAC(own HMAC key, enc_h0)[..8] ‖ encrypt(h0) [32]`.
pub struct Confirm {
    buf: [u8; Self::LEN],
}

impl Confirm {
    /// Logical packet length.
    pub const LEN: usize = 41;

    /// Build this peer's CONFIRM, encrypting its h0 under its own-role
    /// cipher key (this advances the send counter by two blocks).
    pub fn ser(session: &mut Session, packet_type: PacketType) -> Self {
        debug_assert!(matches!(
            packet_type,
            PacketType::Confirm1 | PacketType::Confirm2
        ));

        let mut enc_h0: [u8; 32] = *session.h0();
        session.encrypt(&mut enc_h0);
        let mac = crate::crypto::hmac_trunc(session.own_hmac_key(), &enc_h0);

        let mut buf: [u8; Self::LEN] = [0; Self::LEN];
        buf[0] = packet_type.into();
        buf[1..9].copy_from_slice(&mac);
        buf[9..].copy_from_slice(&enc_h0);
        Self { buf }
    }

    /// Parse a received frame.
    pub fn deser(frame: &[u8], packet_type: PacketType) -> Option<Self> {
        check_frame(frame, packet_type, Self::LEN).then(|| {
            let mut buf: [u8; Self::LEN] = [0; Self::LEN];
            buf.copy_from_slice(&frame[..Self::LEN]);
            Self { buf }
        })
    }

    /// Truncated MAC over the encrypted h0, keyed by the sender-role HMAC
    /// key.
    pub fn mac(&self) -> [u8; MAC_LEN] {
        self.buf[1..9].try_into().unwrap()
    }

    /// The sender's h0, encrypted.
    pub fn enc_h0(&self) -> [u8; 32] {
        self.buf[9..].try_into().unwrap()
    }

    /// Wire bytes before padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Voice payload bytes carried per CODEC2 frame.
pub const VOICE_PAYLOAD_LEN: usize = 63;

/// CODEC2: `tag ‖ counter_prefix [8, BE] ‖ encrypt(tag ‖ payload [63]) [64]`.
///
/// At 73 bytes this exceeds the fixed frame envelope; it rides the modem's
/// arbitrary-length path.
pub struct Codec2 {
    buf: [u8; Self::LEN],
}

impl Codec2 {
    /// Wire length.
    pub const LEN: usize = 1 + COUNTER_HALF_LEN + 1 + VOICE_PAYLOAD_LEN;

    /// Encrypt one voice frame at the session's current send counter.
    pub fn ser(session: &mut Session, payload: &[u8; VOICE_PAYLOAD_LEN]) -> Self {
        let prefix: u64 = session.send_prefix();

        let mut inner: [u8; 1 + VOICE_PAYLOAD_LEN] = [0; 1 + VOICE_PAYLOAD_LEN];
        inner[0] = PacketType::Codec2.into();
        inner[1..].copy_from_slice(payload);
        session.encrypt(&mut inner);

        let mut buf: [u8; Self::LEN] = [0; Self::LEN];
        buf[0] = PacketType::Codec2.into();
        buf[1..9].copy_from_slice(&prefix.to_be_bytes());
        buf[9..].copy_from_slice(&inner);
        Self { buf }
    }

    /// Parse a received frame.
    pub fn deser(frame: &[u8]) -> Option<Self> {
        check_frame(frame, PacketType::Codec2, Self::LEN).then(|| {
            let mut buf: [u8; Self::LEN] = [0; Self::LEN];
            buf.copy_from_slice(&frame[..Self::LEN]);
            Self { buf }
        })
    }

    /// Counter prefix the sender encrypted this frame at.
    pub fn prefix(&self) -> u64 {
        u64::from_be_bytes(self.buf[1..9].try_into().unwrap())
    }

    /// The encrypted `tag ‖ payload` block.
    pub fn ciphertext(&self) -> [u8; 1 + VOICE_PAYLOAD_LEN] {
        self.buf[9..].try_into().unwrap()
    }

    /// Wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Zero-pad a logical packet to the fixed frame envelope.
pub fn pad(pkt: &[u8]) -> Vec<u8> {
    let mut frame: Vec<u8> = pkt.to_vec();
    if frame.len() < PAYLOAD_LEN {
        frame.resize(PAYLOAD_LEN, 0x00);
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::testutil::established_pair;

    #[test]
    fn hello_round_trip() {
        let (initiator, _, zid_i, _) = established_pair();

        let hello = Hello::ser(&initiator, &zid_i);
        assert_eq!(hello.as_bytes().len(), Hello::LEN);
        assert_eq!(hello.as_bytes()[0], 0x00);

        let parsed = Hello::deser(&pad(hello.as_bytes())).unwrap();
        assert_eq!(parsed.h3(), *initiator.h3());
        assert_eq!(parsed.zid(), zid_i);
        assert!(crypto::verify_packet_hmac(
            initiator.h2(),
            parsed.signed(),
            &parsed.mac()
        ));
    }

    #[test]
    fn hello_mac_binds_every_payload_byte() {
        let (initiator, _, zid_i, _) = established_pair();
        let hello = Hello::ser(&initiator, &zid_i);

        for idx in 0..Hello::SIGNED_LEN {
            let mut frame = pad(hello.as_bytes());
            frame[idx] ^= 0x01;
            // tampering the tag byte makes the frame unparseable instead
            let Some(parsed) = Hello::deser(&frame) else {
                assert_eq!(idx, 0);
                continue;
            };
            assert!(
                !crypto::verify_packet_hmac(initiator.h2(), parsed.signed(), &parsed.mac()),
                "flip at {idx} not caught"
            );
        }
    }

    #[test]
    fn commit_round_trip() {
        let (initiator, _, zid_i, _) = established_pair();

        let commit = Commit::ser(&initiator, &zid_i);
        assert_eq!(commit.as_bytes().len(), Commit::LEN);

        let parsed = Commit::deser(&pad(commit.as_bytes())).unwrap();
        assert_eq!(parsed.h2(), *initiator.h2());
        assert_eq!(parsed.zid(), zid_i);
        assert_eq!(parsed.counter_suffix(), initiator.counter_suffix());
        assert!(crypto::verify_packet_hmac(
            initiator.h1(),
            parsed.signed(),
            &parsed.mac()
        ));
    }

    #[test]
    fn dhpart_frames_have_documented_lengths() {
        let (_, responder, _, _) = established_pair();

        let frames = DhPart::ser(&responder, DhGroup::One);
        let lens: Vec<usize> = frames.iter().map(Vec::len).collect();
        assert_eq!(lens, DHPART_FRAME_LENS);
        for (idx, frame) in frames.iter().enumerate() {
            assert_eq!(frame[0], 0x03 + idx as u8);
        }
    }

    #[test]
    fn dhpart_reassembles() {
        let (_, responder, _, _) = established_pair();

        let frames = DhPart::ser(&responder, DhGroup::One);
        let padded: [Vec<u8>; DHPART_FRAMES] = core::array::from_fn(|i| pad(&frames[i]));
        let parsed = DhPart::deser(&padded, DhGroup::One).unwrap();

        assert_eq!(parsed.h1(), *responder.h1());
        assert_eq!(parsed.public_key(), responder.packed_public_key());
        assert!(crypto::verify_packet_hmac(
            responder.h0(),
            parsed.signed(),
            &parsed.mac()
        ));
    }

    #[test]
    fn dhpart_rejects_zeroed_frame() {
        let (_, responder, _, _) = established_pair();

        let frames = DhPart::ser(&responder, DhGroup::One);
        for victim in 0..DHPART_FRAMES {
            let mut padded: [Vec<u8>; DHPART_FRAMES] = core::array::from_fn(|i| pad(&frames[i]));
            padded[victim][1..].fill(0x00);
            let parsed = DhPart::deser(&padded, DhGroup::One).unwrap();
            assert!(
                !crypto::verify_packet_hmac(responder.h0(), parsed.signed(), &parsed.mac()),
                "zeroed frame {victim} not caught"
            );
        }
    }

    #[test]
    fn dhpart_group_two_uses_initiator_tags() {
        let (initiator, _, _, _) = established_pair();

        let frames = DhPart::ser(&initiator, DhGroup::Two);
        for (idx, frame) in frames.iter().enumerate() {
            assert_eq!(frame[0], 0x08 + idx as u8);
        }
        // group-one reassembly must refuse group-two tags
        let padded: [Vec<u8>; DHPART_FRAMES] = core::array::from_fn(|i| pad(&frames[i]));
        assert!(DhPart::deser(&padded, DhGroup::One).is_none());
    }

    #[test]
    fn confirm_round_trip() {
        let (mut initiator, mut responder, _, _) = established_pair();

        let confirm = Confirm::ser(&mut responder, PacketType::Confirm1);
        assert_eq!(confirm.as_bytes().len(), Confirm::LEN);

        let parsed = Confirm::deser(&pad(confirm.as_bytes()), PacketType::Confirm1).unwrap();
        assert!(crypto::verify_packet_hmac(
            initiator.peer_hmac_key(),
            &parsed.enc_h0(),
            &parsed.mac()
        ));

        let mut h0 = parsed.enc_h0();
        initiator.decrypt(&mut h0);
        assert_eq!(h0, *responder.h0());
    }

    #[test]
    fn codec2_round_trip() {
        let (mut initiator, responder, _, _) = established_pair();

        let payload: [u8; VOICE_PAYLOAD_LEN] = [0x3C; VOICE_PAYLOAD_LEN];
        let frame = Codec2::ser(&mut initiator, &payload);
        assert_eq!(frame.as_bytes().len(), Codec2::LEN);
        // four blocks per voice frame
        assert_eq!(initiator.send_prefix(), 4);

        let parsed = Codec2::deser(frame.as_bytes()).unwrap();
        assert_eq!(parsed.prefix(), 0);

        let mut inner = parsed.ciphertext();
        responder.decrypt_at(parsed.prefix(), &mut inner);
        assert_eq!(inner[0], u8::from(PacketType::Codec2));
        assert_eq!(&inner[1..], &payload);
    }

    #[test]
    fn packet_type_round_trips() {
        for tag in 0x00..=0x10u8 {
            let packet_type = PacketType::try_from(tag).unwrap();
            assert_eq!(u8::from(packet_type), tag);
        }
        assert_eq!(PacketType::try_from(0x11), Err(0x11));
        assert_eq!(PacketType::try_from(0xFF), Err(0xFF));
    }

    #[test]
    fn pad_fills_to_envelope() {
        let frame = pad(&[0x02; 61]);
        assert_eq!(frame.len(), PAYLOAD_LEN);
        assert_eq!(&frame[61..], &[0x00; 3]);

        // voice frames pass through unpadded
        assert_eq!(pad(&[0x10; 73]).len(), 73);
    }
}
