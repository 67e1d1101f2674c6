//! PCM-in-a-WAV-wrapper encoding via `hound`.
//!
//! The RIFF header carries chunk sizes that aren't known until the
//! stream ends, so unlike Vorbis this encoder can't emit anything
//! useful from `begin`: samples are buffered in memory and the whole
//! container is built once, in `end`.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};
use rdp_protocol::GatewayError;

use crate::encoder::{AudioEncoder, PcmFormat};

pub struct WavAudioEncoder {
    format: PcmFormat,
    buffered: Vec<u8>,
}

impl WavAudioEncoder {
    #[must_use]
    pub fn new(format: PcmFormat) -> Self {
        Self { format, buffered: Vec::new() }
    }
}

impl AudioEncoder for WavAudioEncoder {
    fn mime_type(&self) -> &'static str {
        "audio/L16"
    }

    fn begin(&mut self) -> Result<Vec<u8>, GatewayError> {
        self.buffered.clear();
        Ok(Vec::new())
    }

    fn write(&mut self, pcm: &[u8]) -> Result<Vec<u8>, GatewayError> {
        self.buffered.extend_from_slice(pcm);
        Ok(Vec::new())
    }

    fn end(&mut self) -> Result<Vec<u8>, GatewayError> {
        let spec = WavSpec {
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            bits_per_sample: self.format.bytes_per_sample * 8,
            sample_format: SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec)
                .map_err(|e| GatewayError::Protocol(format!("wav header: {e}")))?;
            write_samples(&mut writer, &self.buffered, self.format.bytes_per_sample)?;
            writer.finalize().map_err(|e| GatewayError::Protocol(format!("wav finalize: {e}")))?;
        }

        self.buffered.clear();
        Ok(cursor.into_inner())
    }
}

fn write_samples<W: std::io::Write + std::io::Seek>(
    writer: &mut WavWriter<W>,
    pcm: &[u8],
    bytes_per_sample: u16,
) -> Result<(), GatewayError> {
    match bytes_per_sample {
        1 => {
            for &byte in pcm {
                writer
                    .write_sample(i16::from(byte) - 128)
                    .map_err(|e| GatewayError::Protocol(format!("wav sample: {e}")))?;
            }
        }
        2 => {
            for chunk in pcm.chunks_exact(2) {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                writer
                    .write_sample(sample)
                    .map_err(|e| GatewayError::Protocol(format!("wav sample: {e}")))?;
            }
        }
        4 => {
            for chunk in pcm.chunks_exact(4) {
                let sample = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                writer
                    .write_sample(sample)
                    .map_err(|e| GatewayError::Protocol(format!("wav sample: {e}")))?;
            }
        }
        other => {
            return Err(GatewayError::NotSupported(format!(
                "{other}-byte PCM samples are not supported by the WAV encoder"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> PcmFormat {
        PcmFormat { channels: 1, sample_rate: 44_100, bytes_per_sample: 2 }
    }

    #[test]
    fn end_to_end_produces_a_valid_wav_with_matching_sample_count() {
        let mut encoder = WavAudioEncoder::new(format());
        encoder.begin().unwrap();
        let samples: Vec<i16> = vec![100, -100, 200, -200];
        let mut pcm = Vec::new();
        for s in &samples {
            pcm.extend_from_slice(&s.to_le_bytes());
        }
        encoder.write(&pcm).unwrap();
        let wav_bytes = encoder.end().unwrap();

        let mut reader = hound::WavReader::new(Cursor::new(wav_bytes)).unwrap();
        let decoded: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn unsupported_sample_width_is_rejected() {
        let mut encoder = WavAudioEncoder::new(PcmFormat {
            channels: 1,
            sample_rate: 8_000,
            bytes_per_sample: 3,
        });
        encoder.begin().unwrap();
        encoder.write(&[0, 0, 0]).unwrap();
        assert!(encoder.end().is_err());
    }
}
