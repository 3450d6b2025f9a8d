//! Frame transport provided by an external modem.

/// Fixed wire frame length during the handshake.
///
/// Outbound handshake packets are zero-padded to this length. Voice frames
/// are longer and ride the modem's arbitrary-length path.
pub const PAYLOAD_LEN: usize = 64;

/// Best-effort frame transport.
///
/// Implementations wrap the modem's internal queues; both calls are
/// non-blocking and are made from the session thread only. Frames that fail
/// the modem-level CRC never surface here.
pub trait Modem {
    /// Transport error. Best-effort loss is not an error; this is for the
    /// modem device itself failing.
    type Error;

    /// Enqueue a payload for transmission.
    ///
    /// No delivery or ordering guarantee. Payloads up to [`PAYLOAD_LEN`] use
    /// the fixed GFSK framing; longer payloads use the same path with a
    /// longer burst.
    fn send_pkt(&mut self, pkt: &[u8]) -> Result<(), Self::Error>;

    /// The next complete received payload, if one has arrived since the last
    /// call.
    fn recv_pkt(&mut self) -> Result<Option<Vec<u8>>, Self::Error>;
}
