//! Voice-phase relay.
//!
//! After the handshake both peers run the same loop: pull compressed frames
//! from the external encoder, encrypt and transmit them; poll the transport,
//! decrypt and deliver inbound frames to the external decoder.
//!
//! Voice frames carry no per-frame MAC. The only integrity check is the tag
//! byte recovered by decryption; a mismatch is logged and the frame dropped,
//! and the session continues. Frames arrive duplicated and reordered - each
//! names its own counter prefix, and the receiver keeps no expectation of
//! monotonicity, so replayed frames decrypt (and play) again.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::handshake::Established;
use crate::link::Link;
use crate::modem::Modem;
use crate::pkt::{Codec2, PacketType, VOICE_PAYLOAD_LEN};
use crate::session::Session;
use crate::Error;

/// Voice frames expect no acknowledgement; each is simply transmitted this
/// many times for loss tolerance.
const VOICE_REPEATS: usize = 2;

/// Compressed-voice producer, typically the stdout pipe of an external
/// encoder process.
pub trait VoiceSource {
    /// The next chunk of compressed voice, of any length; `Ok(None)` when no
    /// data has accumulated yet. Would-block conditions on the underlying
    /// pipe are absorbed here, not surfaced.
    fn read(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Compressed-voice consumer, typically the stdin pipe of an external
/// decoder process.
pub trait VoiceSink {
    /// Deliver one decrypted [`VOICE_PAYLOAD_LEN`]-byte frame.
    fn write(&mut self, payload: &[u8]) -> io::Result<()>;

    /// A receive poll produced no voice frame; implementations may feed the
    /// decoder silence. The default does nothing.
    fn gap(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The voice-phase relay for one peer.
///
/// A cooperative loop: each [`poll`](Self::poll) reads whatever the encoder
/// has, transmits any complete frames, and drains at most one received
/// frame. Pacing comes from the source (an encoder tied to the microphone
/// period), not from the relay.
pub struct Relay<M: Modem, S: VoiceSource, K: VoiceSink> {
    link: Link<M>,
    session: Session,
    source: S,
    sink: K,
    pending: Vec<u8>,
}

impl<M: Modem, S: VoiceSource, K: VoiceSink> Relay<M, S, K> {
    /// Attach the external codec to an established session.
    pub fn new(established: Established<M>, source: S, sink: K) -> Self {
        Self {
            link: established.link,
            session: established.session,
            source,
            sink,
            pending: Vec::new(),
        }
    }

    /// One relay tick.
    pub fn poll(&mut self) -> Result<(), Error<M::Error>> {
        if let Some(data) = self.source.read().map_err(Error::Io)? {
            self.pending.extend_from_slice(&data);
        }

        while self.pending.len() >= VOICE_PAYLOAD_LEN {
            let mut payload: [u8; VOICE_PAYLOAD_LEN] = [0; VOICE_PAYLOAD_LEN];
            payload.copy_from_slice(&self.pending[..VOICE_PAYLOAD_LEN]);
            self.pending.drain(..VOICE_PAYLOAD_LEN);

            let frame = Codec2::ser(&mut self.session, &payload);
            for _ in 0..VOICE_REPEATS {
                self.link.send_frame(frame.as_bytes())?;
            }
        }

        match self.link.try_recv()? {
            Some(frame) if frame.first().copied() == Some(u8::from(PacketType::Codec2)) => {
                if let Some(codec2) = Codec2::deser(&frame) {
                    self.deliver(&codec2)?;
                }
            }
            Some(frame) => warn!(
                "unanticipated packet with tag {:02X?} in voice phase",
                frame.first()
            ),
            None => self.sink.gap().map_err(Error::Io)?,
        }
        Ok(())
    }

    fn deliver(&mut self, codec2: &Codec2) -> Result<(), Error<M::Error>> {
        let mut inner: [u8; 1 + VOICE_PAYLOAD_LEN] = codec2.ciphertext();
        self.session.decrypt_at(codec2.prefix(), &mut inner);

        if inner[0] != u8::from(PacketType::Codec2) {
            warn!("bad voice frame decrypt, dropping");
            return Ok(());
        }
        self.sink.write(&inner[1..]).map_err(Error::Io)
    }

    /// Run [`poll`](Self::poll) until `stop` is raised.
    ///
    /// There is no graceful in-band teardown; a process-level signal raises
    /// `stop` and the session state is dropped.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), Error<M::Error>> {
        debug!("voice relay running");
        while !stop.load(Ordering::Relaxed) {
            self.poll()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkConfig;
    use crate::testutil::established_pair;
    use std::collections::VecDeque;
    use std::convert::Infallible;

    struct QueueModem {
        inbox: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl QueueModem {
        fn new() -> Self {
            Self {
                inbox: VecDeque::new(),
                sent: Vec::new(),
            }
        }
    }

    impl Modem for QueueModem {
        type Error = Infallible;

        fn send_pkt(&mut self, pkt: &[u8]) -> Result<(), Infallible> {
            self.sent.push(pkt.to_vec());
            Ok(())
        }

        fn recv_pkt(&mut self) -> Result<Option<Vec<u8>>, Infallible> {
            Ok(self.inbox.pop_front())
        }
    }

    struct ScriptedSource {
        chunks: VecDeque<Vec<u8>>,
    }

    impl VoiceSource for ScriptedSource {
        fn read(&mut self) -> io::Result<Option<Vec<u8>>> {
            Ok(self.chunks.pop_front())
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        frames: Vec<Vec<u8>>,
        gaps: usize,
    }

    impl VoiceSink for CollectingSink {
        fn write(&mut self, payload: &[u8]) -> io::Result<()> {
            self.frames.push(payload.to_vec());
            Ok(())
        }

        fn gap(&mut self) -> io::Result<()> {
            self.gaps += 1;
            Ok(())
        }
    }

    fn relay_with(
        session: Session,
        chunks: Vec<Vec<u8>>,
    ) -> Relay<QueueModem, ScriptedSource, CollectingSink> {
        let established = Established {
            link: Link::new(QueueModem::new(), LinkConfig::new()),
            session,
        };
        Relay::new(
            established,
            ScriptedSource {
                chunks: chunks.into(),
            },
            CollectingSink::default(),
        )
    }

    #[test]
    fn accumulates_and_sends_each_frame_twice() {
        let (initiator, mut responder, _, _) = established_pair();

        // 40 + 86 bytes: nothing to send on the first tick, two frames on
        // the second
        let mut relay = relay_with(initiator, vec![vec![0x11; 40], vec![0x22; 86]]);
        relay.poll().unwrap();
        assert!(relay.link.modem().sent.is_empty());
        relay.poll().unwrap();

        let sent = &relay.link.modem().sent;
        assert_eq!(sent.len(), 2 * VOICE_REPEATS);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(sent[0].len(), Codec2::LEN);

        // the peer can decrypt what went out
        let codec2 = Codec2::deser(&sent[0]).unwrap();
        let mut inner = codec2.ciphertext();
        responder.decrypt_at(codec2.prefix(), &mut inner);
        assert_eq!(inner[0], u8::from(PacketType::Codec2));
        assert_eq!(&inner[1..24], &[0x11; 23]);
    }

    #[test]
    fn replayed_frames_play_twice() {
        let (mut initiator, responder, _, _) = established_pair();

        let payload: [u8; VOICE_PAYLOAD_LEN] = [0x55; VOICE_PAYLOAD_LEN];
        let frame = Codec2::ser(&mut initiator, &payload);

        let mut relay = relay_with(responder, vec![]);
        relay.link.modem_mut().inbox.push_back(frame.as_bytes().to_vec());
        relay.link.modem_mut().inbox.push_back(frame.as_bytes().to_vec());

        relay.poll().unwrap();
        relay.poll().unwrap();

        assert_eq!(relay.sink.frames.len(), 2);
        assert_eq!(relay.sink.frames[0], payload);
        assert_eq!(relay.sink.frames[1], payload);
    }

    #[test]
    fn bad_decrypt_drops_frame_and_continues() {
        let (mut initiator, responder, _, _) = established_pair();

        let payload: [u8; VOICE_PAYLOAD_LEN] = [0x66; VOICE_PAYLOAD_LEN];
        let frame = Codec2::ser(&mut initiator, &payload);
        let mut tampered: Vec<u8> = frame.as_bytes().to_vec();
        // a flipped ciphertext bit lands on the inner tag byte after
        // decryption
        tampered[9] ^= 0x01;

        let mut relay = relay_with(responder, vec![]);
        relay.link.modem_mut().inbox.push_back(tampered);
        relay.poll().unwrap();

        assert!(relay.sink.frames.is_empty());
    }

    #[test]
    fn empty_polls_report_gaps() {
        let (initiator, _, _, _) = established_pair();
        let mut relay = relay_with(initiator, vec![]);

        relay.poll().unwrap();
        relay.poll().unwrap();
        assert_eq!(relay.sink.gaps, 2);
    }
}
