//! Ogg Vorbis encoding via `vorbis_rs`.
//!
//! Samples are buffered as de-interleaved `f32` per channel and handed
//! to the encoder once, in `end` — `vorbis_rs`'s block-based API wants
//! whole planar buffers per call, and batching avoids the bookkeeping
//! of slicing a live stream into arbitrarily-sized blocks.

use std::io::Cursor;
use std::num::{NonZeroU32, NonZeroU8};

use rdp_protocol::GatewayError;
use vorbis_rs::VorbisEncoderBuilder;

use crate::encoder::{AudioEncoder, PcmFormat};

pub struct VorbisAudioEncoder {
    format: PcmFormat,
    channel_samples: Vec<Vec<f32>>,
}

impl VorbisAudioEncoder {
    #[must_use]
    pub fn new(format: PcmFormat) -> Self {
        let channels = format.channels.max(1) as usize;
        Self { format, channel_samples: vec![Vec::new(); channels] }
    }

    fn push_interleaved(&mut self, pcm: &[u8]) -> Result<(), GatewayError> {
        let channels = self.channel_samples.len();
        let bytes_per_sample = self.format.bytes_per_sample as usize;
        let frame_bytes = bytes_per_sample * channels;
        if frame_bytes == 0 || pcm.len() % frame_bytes != 0 {
            return Err(GatewayError::BadArgument(
                "PCM block is not a whole number of interleaved frames".into(),
            ));
        }

        for frame in pcm.chunks_exact(frame_bytes) {
            for (ch, bytes) in frame.chunks_exact(bytes_per_sample).enumerate() {
                let sample = match bytes_per_sample {
                    2 => f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / f32::from(i16::MAX),
                    1 => (f32::from(bytes[0]) - 128.0) / 128.0,
                    _ => {
                        return Err(GatewayError::NotSupported(
                            "only 8- or 16-bit PCM can be fed to the Vorbis encoder".into(),
                        ))
                    }
                };
                self.channel_samples[ch].push(sample);
            }
        }
        Ok(())
    }
}

impl AudioEncoder for VorbisAudioEncoder {
    fn mime_type(&self) -> &'static str {
        "audio/ogg"
    }

    fn begin(&mut self) -> Result<Vec<u8>, GatewayError> {
        for channel in &mut self.channel_samples {
            channel.clear();
        }
        Ok(Vec::new())
    }

    fn write(&mut self, pcm: &[u8]) -> Result<Vec<u8>, GatewayError> {
        self.push_interleaved(pcm)?;
        Ok(Vec::new())
    }

    fn end(&mut self) -> Result<Vec<u8>, GatewayError> {
        let sample_rate = NonZeroU32::new(self.format.sample_rate)
            .ok_or_else(|| GatewayError::BadArgument("sample rate must be nonzero".into()))?;
        let channels = NonZeroU8::new(self.channel_samples.len() as u8)
            .ok_or_else(|| GatewayError::BadArgument("channel count must be nonzero".into()))?;

        let mut sink = Cursor::new(Vec::new());
        {
            let mut encoder = VorbisEncoderBuilder::new(sample_rate, channels, &mut sink)
                .map_err(|e| GatewayError::Protocol(format!("vorbis setup: {e}")))?
                .build()
                .map_err(|e| GatewayError::Protocol(format!("vorbis setup: {e}")))?;

            let refs: Vec<&[f32]> = self.channel_samples.iter().map(Vec::as_slice).collect();
            encoder
                .encode_audio_block(&refs)
                .map_err(|e| GatewayError::Protocol(format!("vorbis encode: {e}")))?;
            encoder.finish().map_err(|e| GatewayError::Protocol(format!("vorbis finish: {e}")))?;
        }

        for channel in &mut self.channel_samples {
            channel.clear();
        }
        Ok(sink.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> PcmFormat {
        PcmFormat { channels: 2, sample_rate: 48_000, bytes_per_sample: 2 }
    }

    #[test]
    fn mime_type_is_ogg() {
        let encoder = VorbisAudioEncoder::new(format());
        assert_eq!(encoder.mime_type(), "audio/ogg");
    }

    #[test]
    fn misaligned_block_is_rejected() {
        let mut encoder = VorbisAudioEncoder::new(format());
        // one byte short of a whole stereo 16-bit frame
        assert!(encoder.write(&[0, 1, 2]).is_err());
    }

    #[test]
    fn whole_frames_accumulate_without_error() {
        let mut encoder = VorbisAudioEncoder::new(format());
        let silence = vec![0u8; 4 * 100]; // 100 stereo frames of silence
        assert!(encoder.write(&silence).is_ok());
        assert_eq!(encoder.channel_samples[0].len(), 100);
    }
}
