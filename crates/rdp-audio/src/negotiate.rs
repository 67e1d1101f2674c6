//! Codec selection: the gateway has a fixed priority order of codecs
//! it's willing to produce; the client advertises the MIME types it
//! can consume. The first of ours the client accepts wins. No match
//! means audio is disabled for the session, not an error.

use crate::encoder::{AudioEncoder, PcmFormat};
use crate::vorbis::VorbisAudioEncoder;
use crate::wav::WavAudioEncoder;

/// Candidate codecs in descending preference order: compressed
/// before uncompressed, since the wire is the bottleneck.
const CANDIDATE_MIME_TYPES: [&str; 2] = ["audio/ogg", "audio/L16"];

/// Pick an encoder from the gateway's candidate list that appears in
/// `client_mimetypes`, in the gateway's preference order.
///
/// Returns `None` if nothing matches — callers should disable audio
/// for the session rather than treat this as fatal.
#[must_use]
pub fn negotiate_codec(
    client_mimetypes: &[String],
    format: PcmFormat,
) -> Option<Box<dyn AudioEncoder>> {
    for candidate in CANDIDATE_MIME_TYPES {
        if client_mimetypes.iter().any(|m| m == candidate) {
            return Some(build_encoder(candidate, format));
        }
    }
    None
}

fn build_encoder(mime_type: &str, format: PcmFormat) -> Box<dyn AudioEncoder> {
    match mime_type {
        "audio/ogg" => Box::new(VorbisAudioEncoder::new(format)),
        _ => Box::new(WavAudioEncoder::new(format)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> PcmFormat {
        PcmFormat { channels: 2, sample_rate: 44_100, bytes_per_sample: 2 }
    }

    #[test]
    fn prefers_vorbis_when_client_supports_both() {
        let mimetypes = vec!["audio/L16".to_string(), "audio/ogg".to_string()];
        let encoder = negotiate_codec(&mimetypes, format()).unwrap();
        assert_eq!(encoder.mime_type(), "audio/ogg");
    }

    #[test]
    fn falls_back_to_wav_when_only_l16_is_advertised() {
        let mimetypes = vec!["audio/L16".to_string()];
        let encoder = negotiate_codec(&mimetypes, format()).unwrap();
        assert_eq!(encoder.mime_type(), "audio/L16");
    }

    #[test]
    fn no_overlap_disables_audio_without_erroring() {
        let mimetypes = vec!["audio/mystery".to_string()];
        assert!(negotiate_codec(&mimetypes, format()).is_none());
    }

    #[test]
    fn empty_advertisement_disables_audio() {
        assert!(negotiate_codec(&[], format()).is_none());
    }
}
