//! In-memory loopback modem simulation for VoiZ session development.
//!
//! This runs both peers of a session on your local machine with no radio
//! hardware or sound cards: two [`LoopModem`]s share a pair of crossed
//! queues, so whatever one peer transmits the other may receive.
//!
//! It is a best-effort channel like the real thing. Frames sent to a peer
//! that has hung up vanish silently, and per-direction fault hooks can drop
//! or corrupt frames in flight to reproduce the losses and bit errors of an
//! acoustic link.
//!
//! It is not possible to simulate the acoustic channel faithfully without
//! spending a silly amount of time on this crate; this is a best-effort
//! implementation to aid development of session code.

use std::convert::Infallible;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};

use log::trace;
use voiz::rand_core::{self, CryptoRng, RngCore};
use voiz::Modem;

/// Per-direction fault hook.
///
/// Applied to every outbound frame; return `None` to drop it, or a
/// (possibly modified) frame to let it through.
pub type Fault = Box<dyn FnMut(Vec<u8>) -> Option<Vec<u8>> + Send>;

/// One end of a simulated acoustic link.
pub struct LoopModem {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    // sender into our own receive queue, for Injector handles
    loopback: Sender<Vec<u8>>,
    fault: Option<Fault>,
}

impl LoopModem {
    /// Two modems wired to each other.
    pub fn pair() -> (LoopModem, LoopModem) {
        let (a_tx, b_rx) = channel();
        let (b_tx, a_rx) = channel();
        let a_loopback = b_tx.clone();
        let b_loopback = a_tx.clone();
        (
            LoopModem {
                tx: a_tx,
                rx: a_rx,
                loopback: a_loopback,
                fault: None,
            },
            LoopModem {
                tx: b_tx,
                rx: b_rx,
                loopback: b_loopback,
                fault: None,
            },
        )
    }

    /// Install a fault hook on this modem's transmit direction.
    pub fn set_tx_fault<F>(&mut self, fault: F)
    where
        F: FnMut(Vec<u8>) -> Option<Vec<u8>> + Send + 'static,
    {
        self.fault = Some(Box::new(fault));
    }

    /// A handle that splices frames directly into this modem's receive
    /// queue, as if they had arrived over the air.
    pub fn injector(&self) -> Injector {
        Injector {
            tx: self.loopback.clone(),
        }
    }
}

impl Modem for LoopModem {
    type Error = Infallible;

    fn send_pkt(&mut self, pkt: &[u8]) -> Result<(), Infallible> {
        let frame: Vec<u8> = match self.fault.as_mut() {
            Some(fault) => match fault(pkt.to_vec()) {
                Some(frame) => frame,
                None => {
                    trace!("fault hook dropped {} B frame", pkt.len());
                    return Ok(());
                }
            },
            None => pkt.to_vec(),
        };

        // a peer that has hung up looks the same as frames lost on the air
        if self.tx.send(frame).is_err() {
            trace!("peer gone, {} B frame lost", pkt.len());
        }
        Ok(())
    }

    fn recv_pkt(&mut self) -> Result<Option<Vec<u8>>, Infallible> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Ok(None),
        }
    }
}

/// Splices frames into one peer's receive queue.
pub struct Injector {
    tx: Sender<Vec<u8>>,
}

impl Injector {
    /// Deliver `frame` to the modem this handle was taken from.
    pub fn inject(&self, frame: &[u8]) {
        let _ = self.tx.send(frame.to_vec());
    }
}

/// Deterministic generator for simulations.
///
/// Seeded and reproducible, which is exactly what simulated sessions want
/// and real ones must never use: this is **not** a CSPRNG, despite
/// implementing the marker trait so it can stand in for one here.
// sPCG32 from https://www.pcg-random.org/paper.html
pub struct SimRng {
    state: u64,
}

impl SimRng {
    /// A generator with a fixed seed.
    pub const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn step(&mut self) -> u32 {
        const M: u64 = 0xbb2efcec3c39611d;
        const A: u64 = 0x7590ef39;

        let s = self.state.wrapping_mul(M).wrapping_add(A);
        self.state = s;

        let shift = 29 - (s >> 61);
        (s >> shift) as u32
    }
}

impl RngCore for SimRng {
    fn next_u32(&mut self) -> u32 {
        self.step()
    }

    fn next_u64(&mut self) -> u64 {
        (u64::from(self.step()) << 32) | u64::from(self.step())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let word: [u8; 4] = self.step().to_be_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for SimRng {}
