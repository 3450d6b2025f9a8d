//! Handshake state machines for both roles.
//!
//! Transitions are strictly sequential within a role; the only suspension
//! points are the overlay ticks inside [`Link`]. The protocol itself orders
//! the two peers (each blocks on the other's next packet), so no clock
//! agreement beyond the attempt budgets is needed.
//!
//! Every verification failure or timeout is fatal: the MAC and hash-chain
//! bindings refer to frames already on the wire, so a retry would only
//! repeat the violation.

use log::{debug, error, info};
use rand_core::{CryptoRng, RngCore};

use crate::crypto;
use crate::identity::Zid;
use crate::link::{Link, LinkConfig};
use crate::modem::Modem;
use crate::pkt::{
    Commit, Confirm, DhGroup, DhPart, Hello, PacketType, DHPART_FRAMES, DHPART_FRAME_LENS,
};
use crate::session::{Role, Session};
use crate::Error;

/// CONFIRM2 expects no reply, so it is simply repeated this many times for
/// loss tolerance before the initiator enters the voice phase.
const CONFIRM2_REPEATS: usize = 10;

/// A handshake ready to run.
pub struct Handshake<M: Modem> {
    link: Link<M>,
    session: Session,
    zid: Zid,
}

impl<M: Modem> Handshake<M> {
    /// Create fresh session state over `modem`.
    pub fn new<R: RngCore + CryptoRng>(
        role: Role,
        modem: M,
        cfg: LinkConfig,
        zid: Zid,
        rng: &mut R,
    ) -> Self {
        Self {
            link: Link::new(modem, cfg),
            session: Session::new(role, rng),
            zid,
        }
    }

    /// Drive the handshake to completion for this peer's role.
    ///
    /// On success the returned [`Established`] session is ready for the
    /// voice phase. On any error the session state is dropped; only the ZID
    /// survives.
    pub fn run(mut self) -> Result<Established<M>, Error<M::Error>> {
        match self.session.role() {
            Role::Initiator => self.initiate()?,
            Role::Responder => self.respond()?,
        }
        info!("handshake complete");
        Ok(Established {
            link: self.link,
            session: self.session,
        })
    }

    fn initiate(&mut self) -> Result<(), Error<M::Error>> {
        debug!("starting initiation procedure");

        let hello = Hello::ser(&self.session, &self.zid);
        debug!("sending packet: {:?}", PacketType::Hello);
        let r_hello_frame: Vec<u8> =
            self.link
                .send_until(&[hello.as_bytes().to_vec()], PacketType::Hello, false)?;
        let r_hello = Hello::deser(&r_hello_frame).ok_or(Error::Malformed(PacketType::Hello))?;
        debug!("responder ZID: 0x{}", r_hello.zid());

        let commit = Commit::ser(&self.session, &self.zid);
        debug!("sending packet: {:?}", PacketType::Commit);
        let mut r_dh_frames: [Vec<u8>; DHPART_FRAMES] = core::array::from_fn(|_| Vec::new());
        r_dh_frames[0] =
            self.link
                .send_until(&[commit.as_bytes().to_vec()], PacketType::DhPart11, false)?;
        for idx in 1..DHPART_FRAMES {
            r_dh_frames[idx] = self.link.wait_until(DhGroup::One.frame_type(idx), false)?;
        }
        let r_dhpart = DhPart::deser(&r_dh_frames, DhGroup::One)
            .ok_or(Error::Malformed(PacketType::DhPart11))?;

        // the responder's HELLO MAC is keyed by its h2, obtained by hashing
        // the h1 it just revealed
        let r_h1: [u8; 32] = r_dhpart.h1();
        let r_h2: [u8; 32] = crypto::sha256(&r_h1);
        if !crypto::verify_packet_hmac(&r_h2, r_hello.signed(), &r_hello.mac()) {
            error!("HMAC failed in responders HELLO packet");
            return Err(Error::Hmac(PacketType::Hello));
        }
        if !crypto::verify_hash(&r_h2, &r_hello.h3()) {
            error!("hash chain verification failed: sha256(h2) != h3");
            return Err(Error::HashChain);
        }

        let dhpart2: [Vec<u8>; DHPART_FRAMES] = DhPart::ser(&self.session, DhGroup::Two);

        self.session.set_partner_public_key(&r_dhpart.public_key());
        let mut transcript: Vec<u8> = Vec::new();
        transcript.extend_from_slice(r_hello.as_bytes());
        transcript.extend_from_slice(commit.as_bytes());
        for (idx, frame) in r_dh_frames.iter().enumerate() {
            transcript.extend_from_slice(&frame[..DHPART_FRAME_LENS[idx]]);
        }
        for frame in &dhpart2 {
            transcript.extend_from_slice(frame);
        }
        self.session.set_transcript(&transcript);
        self.session.compute_secret(&self.zid, &r_hello.zid());
        self.session.derive_keys();

        debug!("sending packets for DH-part2");
        let r_confirm_frame: Vec<u8> =
            self.link
                .send_until(&dhpart2, PacketType::Confirm1, false)?;
        let r_confirm = Confirm::deser(&r_confirm_frame, PacketType::Confirm1)
            .ok_or(Error::Malformed(PacketType::Confirm1))?;

        if !crypto::verify_packet_hmac(
            self.session.peer_hmac_key(),
            &r_confirm.enc_h0(),
            &r_confirm.mac(),
        ) {
            error!("HMAC failed in responders CONFIRM1 packet");
            return Err(Error::Hmac(PacketType::Confirm1));
        }
        let mut r_h0: [u8; 32] = r_confirm.enc_h0();
        self.session.decrypt(&mut r_h0);
        if !crypto::verify_hash(&r_h0, &r_h1) {
            error!("hash chain verification failed: sha256(h0) != h1");
            return Err(Error::HashChain);
        }
        // h0 is disclosed; the DHPART MAC keyed by it is finally checkable
        if !crypto::verify_packet_hmac(&r_h0, r_dhpart.signed(), &r_dhpart.mac()) {
            error!("HMAC failed in responders DHPART1 packets");
            return Err(Error::Hmac(PacketType::DhPart11));
        }

        let confirm2 = Confirm::ser(&mut self.session, PacketType::Confirm2);
        debug!("sending packet: {:?}", PacketType::Confirm2);
        self.link.send_burst(confirm2.as_bytes(), CONFIRM2_REPEATS)?;
        Ok(())
    }

    fn respond(&mut self) -> Result<(), Error<M::Error>> {
        debug!("starting response procedure");

        let i_hello_frame: Vec<u8> = self.link.wait_until(PacketType::Hello, true)?;
        let i_hello = Hello::deser(&i_hello_frame).ok_or(Error::Malformed(PacketType::Hello))?;
        debug!("initiator ZID: 0x{}", i_hello.zid());

        let hello = Hello::ser(&self.session, &self.zid);
        debug!("sending packet: {:?}", PacketType::Hello);
        let i_commit_frame: Vec<u8> =
            self.link
                .send_until(&[hello.as_bytes().to_vec()], PacketType::Commit, false)?;
        let i_commit =
            Commit::deser(&i_commit_frame).ok_or(Error::Malformed(PacketType::Commit))?;

        if i_commit.zid() != i_hello.zid() {
            error!(
                "COMMIT ZID 0x{} does not match HELLO ZID 0x{}",
                i_commit.zid(),
                i_hello.zid()
            );
            return Err(Error::ZidMismatch);
        }
        let i_h2: [u8; 32] = i_commit.h2();
        if !crypto::verify_packet_hmac(&i_h2, i_hello.signed(), &i_hello.mac()) {
            error!("HMAC failed in initiators HELLO packet");
            return Err(Error::Hmac(PacketType::Hello));
        }
        if !crypto::verify_hash(&i_h2, &i_hello.h3()) {
            error!("hash chain verification failed: sha256(h2) != h3");
            return Err(Error::HashChain);
        }
        debug!("valid {:?} packet", PacketType::Commit);
        self.session.set_counter_suffix(i_commit.counter_suffix());

        let dhpart1: [Vec<u8>; DHPART_FRAMES] = DhPart::ser(&self.session, DhGroup::One);
        debug!("sending packets for DH-part1");
        let mut i_dh_frames: [Vec<u8>; DHPART_FRAMES] = core::array::from_fn(|_| Vec::new());
        i_dh_frames[0] = self
            .link
            .send_until(&dhpart1, PacketType::DhPart21, false)?;
        for idx in 1..DHPART_FRAMES {
            i_dh_frames[idx] = self.link.wait_until(DhGroup::Two.frame_type(idx), false)?;
        }
        let i_dhpart = DhPart::deser(&i_dh_frames, DhGroup::Two)
            .ok_or(Error::Malformed(PacketType::DhPart21))?;

        // h1 is now revealed, unlocking the COMMIT MAC and its chain link
        let i_h1: [u8; 32] = i_dhpart.h1();
        if !crypto::verify_packet_hmac(&i_h1, i_commit.signed(), &i_commit.mac()) {
            error!("HMAC failed in initiators COMMIT packet");
            return Err(Error::Hmac(PacketType::Commit));
        }
        if !crypto::verify_hash(&i_h1, &i_h2) {
            error!("hash chain verification failed: sha256(h1) != h2");
            return Err(Error::HashChain);
        }

        self.session.set_partner_public_key(&i_dhpart.public_key());
        let mut transcript: Vec<u8> = Vec::new();
        transcript.extend_from_slice(hello.as_bytes());
        transcript.extend_from_slice(i_commit.as_bytes());
        for frame in &dhpart1 {
            transcript.extend_from_slice(frame);
        }
        for (idx, frame) in i_dh_frames.iter().enumerate() {
            transcript.extend_from_slice(&frame[..DHPART_FRAME_LENS[idx]]);
        }
        self.session.set_transcript(&transcript);
        self.session.compute_secret(&i_hello.zid(), &self.zid);
        self.session.derive_keys();

        let confirm1 = Confirm::ser(&mut self.session, PacketType::Confirm1);
        debug!("sending packet: {:?}", PacketType::Confirm1);
        let i_confirm_frame: Vec<u8> =
            self.link
                .send_until(&[confirm1.as_bytes().to_vec()], PacketType::Confirm2, false)?;
        let i_confirm = Confirm::deser(&i_confirm_frame, PacketType::Confirm2)
            .ok_or(Error::Malformed(PacketType::Confirm2))?;

        if !crypto::verify_packet_hmac(
            self.session.peer_hmac_key(),
            &i_confirm.enc_h0(),
            &i_confirm.mac(),
        ) {
            error!("HMAC failed in initiators CONFIRM2 packet");
            return Err(Error::Hmac(PacketType::Confirm2));
        }
        let mut i_h0: [u8; 32] = i_confirm.enc_h0();
        self.session.decrypt(&mut i_h0);
        if !crypto::verify_hash(&i_h0, &i_h1) {
            error!("hash chain verification failed: sha256(h0) != h1");
            return Err(Error::HashChain);
        }
        if !crypto::verify_packet_hmac(&i_h0, i_dhpart.signed(), &i_dhpart.mac()) {
            error!("HMAC failed in initiators DHPART2 packets");
            return Err(Error::Hmac(PacketType::DhPart21));
        }
        Ok(())
    }
}

/// A completed handshake, ready for the voice phase.
pub struct Established<M: Modem> {
    pub(crate) link: Link<M>,
    pub(crate) session: Session,
}

impl<M: Modem> Established<M> {
    /// The session root secret, for cross-role assertions in tests.
    #[cfg(any(test, feature = "testing"))]
    pub fn session_secret(&self) -> [u8; 32] {
        // a handshake cannot complete without computing the secret
        self.session.session_secret().unwrap()
    }
}
