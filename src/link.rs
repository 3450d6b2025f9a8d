//! Reliable delivery over the lossy frame transport.
//!
//! The modem gives one-shot, best-effort delivery with no ordering or
//! acknowledgement. These primitives convert that into the
//! "send until the expected reply arrives" semantics the handshake runs on:
//! transmit round-robin, poll once per tick, discard anything unexpected,
//! give up after a fixed attempt budget.

use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::modem::Modem;
use crate::pkt::{self, PacketType};
use crate::Error;

/// Default tick spacing between transmission attempts.
pub const DELAY: Duration = Duration::from_millis(200);

/// Default per-packet attempt budget expressed as wall-clock time.
pub const TIMEOUT: Duration = Duration::from_secs(15);

// The acoustic channel is half-duplex; triplicating each transmission and
// then listening for several ticks amortises collisions with a peer that is
// still transmitting.
const BACKOFF_SENDS: usize = 3;
const BACKOFF_POLLS: usize = 5;

/// Overlay timing configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    delay: Duration,
    timeout: Duration,
    backoff: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            delay: DELAY,
            timeout: TIMEOUT,
            backoff: false,
        }
    }
}

impl LinkConfig {
    /// Configuration with the default 200 ms tick and 15 s timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tick spacing between attempts.
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// Set the per-packet attempt budget.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Enable the collision-avoidance transmission variant.
    pub fn set_backoff(&mut self, backoff: bool) {
        self.backoff = backoff;
    }

    fn attempts(&self, pkts: usize) -> u64 {
        let per_pkt: u128 = self.timeout.as_millis() / self.delay.as_millis().max(1);
        per_pkt as u64 * pkts as u64
    }
}

/// Reliable-delivery overlay owning the modem.
pub struct Link<M: Modem> {
    modem: M,
    cfg: LinkConfig,
}

impl<M: Modem> Link<M> {
    /// Wrap a modem.
    pub fn new(modem: M, cfg: LinkConfig) -> Self {
        Self { modem, cfg }
    }

    /// The overlay configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.cfg
    }

    /// The wrapped modem.
    pub fn modem(&self) -> &M {
        &self.modem
    }

    /// The wrapped modem, mutably.
    pub fn modem_mut(&mut self) -> &mut M {
        &mut self.modem
    }

    /// Transmit `pkts` round-robin until a frame tagged `expected` arrives.
    ///
    /// One transmission, one receive poll, and one `delay` sleep per tick.
    /// Frames of any other type are logged and discarded, at most one per
    /// tick. The attempt budget is `pkts.len() × timeout / delay`; once it
    /// is spent and `wait_forever` is false the call fails with
    /// [`Error::Timeout`].
    pub fn send_until(
        &mut self,
        pkts: &[Vec<u8>],
        expected: PacketType,
        wait_forever: bool,
    ) -> Result<Vec<u8>, Error<M::Error>> {
        let frames: Vec<Vec<u8>> = pkts.iter().map(|p| pkt::pad(p)).collect();
        let mut attempts: u64 = self.cfg.attempts(frames.len());

        loop {
            for frame in &frames {
                if self.cfg.backoff {
                    for _ in 0..BACKOFF_SENDS {
                        self.modem.send_pkt(frame)?;
                    }
                    for _ in 0..BACKOFF_POLLS {
                        if let Some(got) = self.poll_once(expected)? {
                            return Ok(got);
                        }
                        thread::sleep(self.cfg.delay);
                        attempts = attempts.saturating_sub(1);
                    }
                } else {
                    self.modem.send_pkt(frame)?;
                    if let Some(got) = self.poll_once(expected)? {
                        return Ok(got);
                    }
                    thread::sleep(self.cfg.delay);
                    attempts = attempts.saturating_sub(1);
                }

                if !wait_forever && attempts == 0 {
                    warn!("timeout waiting for {expected:?}");
                    return Err(Error::Timeout);
                }
            }
        }
    }

    /// As [`send_until`](Self::send_until), transmitting nothing.
    pub fn wait_until(
        &mut self,
        expected: PacketType,
        wait_forever: bool,
    ) -> Result<Vec<u8>, Error<M::Error>> {
        let mut attempts: u64 = self.cfg.attempts(1);

        loop {
            if let Some(got) = self.poll_once(expected)? {
                return Ok(got);
            }
            thread::sleep(self.cfg.delay);
            attempts = attempts.saturating_sub(1);

            if !wait_forever && attempts == 0 {
                warn!("timeout waiting for {expected:?}");
                return Err(Error::Timeout);
            }
        }
    }

    /// Transmit `pkt` `count` times, one `delay` apart, expecting no reply.
    pub fn send_burst(&mut self, pkt: &[u8], count: usize) -> Result<(), Error<M::Error>> {
        let frame: Vec<u8> = pkt::pad(pkt);
        for _ in 0..count {
            self.modem.send_pkt(&frame)?;
            thread::sleep(self.cfg.delay);
        }
        Ok(())
    }

    /// Voice-phase passthrough: transmit without padding.
    pub fn send_frame(&mut self, frame: &[u8]) -> Result<(), M::Error> {
        self.modem.send_pkt(frame)
    }

    /// Voice-phase passthrough: next received frame, if any.
    pub fn try_recv(&mut self) -> Result<Option<Vec<u8>>, M::Error> {
        self.modem.recv_pkt()
    }

    // Drain at most one queued frame; return it only if it carries the
    // expected tag.
    fn poll_once(&mut self, expected: PacketType) -> Result<Option<Vec<u8>>, M::Error> {
        let frame: Vec<u8> = match self.modem.recv_pkt()? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        trace!("RX {} B", frame.len());

        match frame.first().copied() {
            Some(tag) if tag == u8::from(expected) => {
                debug!("received packet: {expected:?}");
                return Ok(Some(frame));
            }
            Some(tag) => match PacketType::try_from(tag) {
                Ok(other) => warn!("unanticipated packet {other:?} while waiting for {expected:?}"),
                Err(tag) => {
                    warn!("unanticipated packet with unknown tag 0x{tag:02X} while waiting for {expected:?}")
                }
            },
            None => warn!("empty frame from modem"),
        }
        Ok(None)
    }
}
