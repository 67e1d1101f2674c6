//! The three-callback encoder contract every codec implements:
//! `begin` emits whatever container header the format needs, `write`
//! converts one block of interleaved PCM into encoded bytes, and
//! `end` flushes any trailing state. All three push bytes onto the
//! same outbound substream, so none of them need to return anything
//! but what's ready to send right now.

use rdp_protocol::GatewayError;

/// The raw PCM format samples arrive in, negotiated once up front and
/// fixed for the life of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bytes_per_sample: u16,
}

/// One encoder implementation. `mime_type` is what gets matched
/// against the client's advertised candidate list during negotiation.
pub trait AudioEncoder: Send {
    fn mime_type(&self) -> &'static str;

    /// Called once before the first `write`. Returns any header bytes
    /// that must precede the encoded stream (empty for formats whose
    /// header can't be known until the stream ends).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the encoder could not be
    /// initialized for the negotiated [`PcmFormat`].
    fn begin(&mut self) -> Result<Vec<u8>, GatewayError>;

    /// Encode one block of interleaved PCM samples, returning
    /// whatever encoded bytes are ready to forward.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the underlying codec rejects this
    /// block.
    fn write(&mut self, pcm: &[u8]) -> Result<Vec<u8>, GatewayError>;

    /// Called once after the last `write`. Returns any trailing bytes
    /// (container footer, final encoded frames) needed to produce a
    /// valid stream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if finalizing the underlying codec
    /// fails.
    fn end(&mut self) -> Result<Vec<u8>, GatewayError>;
}
