//! A complete VoiZ call simulated on your local machine.
//!
//! This does not require a radio, a sound card, or the external voice
//! codec: both peers run on threads over crossed in-memory queues, and the
//! "codec" is a counter spitting out 7-byte frames at the rate of the
//! 1400 bps mode.
//!
//! Run with:
//!
//! ```console
//! cargo run --example call
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use loopsim::{LoopModem, SimRng};
use voiz::identity::Zid;
use voiz::{Handshake, LinkConfig, Relay, Role, VoiceSink, VoiceSource};

// one compressed frame per 40 ms of speech in the 1400 bps mode
const CODEC_FRAME_LEN: usize = 7;
const CALL_SECONDS: usize = 2;
const CODEC_FRAMES: usize = CALL_SECONDS * 25;

struct ToneSource {
    frames: VecDeque<Vec<u8>>,
}

impl ToneSource {
    fn new(seed: u8) -> Self {
        let frames = (0..CODEC_FRAMES)
            .map(|idx| vec![seed.wrapping_add(idx as u8); CODEC_FRAME_LEN])
            .collect();
        Self { frames }
    }
}

impl VoiceSource for ToneSource {
    fn read(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.frames.pop_front())
    }
}

#[derive(Default, Clone)]
struct CountingSink {
    bytes: Arc<std::sync::atomic::AtomicUsize>,
}

impl VoiceSink for CountingSink {
    fn write(&mut self, payload: &[u8]) -> io::Result<()> {
        self.bytes.fetch_add(payload.len(), Ordering::Relaxed);
        Ok(())
    }
}

fn peer(role: Role, modem: LoopModem, seed: u64, stop: Arc<AtomicBool>) -> thread::JoinHandle<usize> {
    thread::spawn(move || {
        let mut rng = SimRng::new(seed);
        let zid = Zid::generate(&mut rng);
        log::info!("{role:?} ZID = 0x{zid}");

        let mut cfg = LinkConfig::new();
        cfg.set_delay(Duration::from_millis(5));

        let established = Handshake::new(role, modem, cfg, zid, &mut rng)
            .run()
            .expect("handshake failed");
        log::info!("{role:?} entering voice phase");

        let sink = CountingSink::default();
        let received = sink.clone();
        let mut relay = Relay::new(established, ToneSource::new(seed as u8), sink);
        while !stop.load(Ordering::Relaxed) {
            relay.poll().expect("relay failed");
            thread::sleep(Duration::from_millis(2));
        }
        received.bytes.load(Ordering::Relaxed)
    })
}

fn main() {
    stderrlog::new()
        .verbosity(4)
        .timestamp(stderrlog::Timestamp::Millisecond)
        .init()
        .unwrap();

    let (i_modem, r_modem) = LoopModem::pair();
    let stop = Arc::new(AtomicBool::new(false));

    let initiator = peer(Role::Initiator, i_modem, 0x1337, stop.clone());
    let responder = peer(Role::Responder, r_modem, 0xBEEF, stop.clone());

    thread::sleep(Duration::from_secs(CALL_SECONDS as u64 + 1));
    stop.store(true, Ordering::Relaxed);

    let i_bytes = initiator.join().unwrap();
    let r_bytes = responder.join().unwrap();
    log::info!("call over: initiator heard {i_bytes} B, responder heard {r_bytes} B");
}
