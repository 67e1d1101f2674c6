//! The outbound audio channel: codec negotiation against a client's
//! advertised MIME types, plus the encoders that turn raw PCM samples
//! into the bytes written to a `blob`/`end` substream.

pub mod encoder;
pub mod negotiate;
pub mod stream;
pub mod vorbis;
pub mod wav;

pub use encoder::{AudioEncoder, PcmFormat};
pub use negotiate::negotiate_codec;
pub use stream::AudioStream;
pub use vorbis::VorbisAudioEncoder;
pub use wav::WavAudioEncoder;
