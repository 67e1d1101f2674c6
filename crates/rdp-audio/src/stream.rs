//! The audio pump: accepts raw PCM in fixed-size blocks and drives the
//! negotiated encoder's `begin`/`write`/`end` callbacks, writing the
//! resulting bytes into a chunked `blob`/`end` substream on the
//! outbound display protocol.
//!
//! Frame boundaries are not preserved through the substream — the
//! reader on the other end demuxes by container format, not by blob
//! chunk.

use rdp_protocol::{GatewayError, InstructionWriter};
use tokio::io::AsyncWrite;

use crate::encoder::AudioEncoder;

/// Drives one codec across the lifetime of a session's audio channel.
pub struct AudioStream {
    encoder: Box<dyn AudioEncoder>,
    stream_id: i32,
    begun: bool,
}

impl AudioStream {
    #[must_use]
    pub fn new(encoder: Box<dyn AudioEncoder>, stream_id: i32) -> Self {
        Self { encoder, stream_id, begun: false }
    }

    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        self.encoder.mime_type()
    }

    /// Feed one block of interleaved PCM samples to the encoder and
    /// write whatever bytes it produces (plus container headers on
    /// the first call) as a `blob` chunk.
    ///
    /// # Errors
    ///
    /// Returns whatever [`AudioEncoder::begin`]/[`AudioEncoder::write`]
    /// return, or a transport error from the underlying writer.
    pub async fn write_pcm<W>(
        &mut self,
        writer: &mut InstructionWriter<W>,
        pcm: &[u8],
    ) -> Result<(), GatewayError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut payload = Vec::new();
        if !self.begun {
            payload.extend(self.encoder.begin()?);
            self.begun = true;
        }
        payload.extend(self.encoder.write(pcm)?);

        if !payload.is_empty() {
            writer.write_blob_chunk(self.stream_id, &payload).await?;
        }
        Ok(())
    }

    /// Flush trailing encoder state and terminate the substream with
    /// an `end` instruction.
    ///
    /// # Errors
    ///
    /// Returns whatever [`AudioEncoder::end`] returns, or a transport
    /// error from the underlying writer.
    pub async fn finish<W>(mut self, writer: &mut InstructionWriter<W>) -> Result<(), GatewayError>
    where
        W: AsyncWrite + Unpin,
    {
        if !self.begun {
            self.encoder.begin()?;
        }
        let tail = self.encoder.end()?;
        writer.write_blob_stream(self.stream_id, &tail).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::WavAudioEncoder;
    use crate::encoder::PcmFormat;

    fn format() -> PcmFormat {
        PcmFormat { channels: 1, sample_rate: 8_000, bytes_per_sample: 2 }
    }

    #[tokio::test]
    async fn finish_emits_an_end_instruction_for_its_stream_id() {
        let encoder = Box::new(WavAudioEncoder::new(format()));
        let stream = AudioStream::new(encoder, 3);

        let mut buf = Vec::new();
        let mut writer = InstructionWriter::new(&mut buf);
        stream.finish(&mut writer).await.unwrap();

        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("3.end,1.3;"));
    }

    #[tokio::test]
    async fn write_pcm_before_finish_emits_a_blob_chunk() {
        let encoder = Box::new(WavAudioEncoder::new(format()));
        let mut stream = AudioStream::new(encoder, 1);

        let mut buf = Vec::new();
        let mut writer = InstructionWriter::new(&mut buf);
        let silence = vec![0u8; 32];
        // WAV only emits bytes from `end`, so `write_pcm` itself
        // produces no blob here, but must not error.
        stream.write_pcm(&mut writer, &silence).await.unwrap();
        stream.finish(&mut writer).await.unwrap();

        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("4.blob"));
        assert!(out.trim_end().ends_with("3.end,1.1;"));
    }
}
