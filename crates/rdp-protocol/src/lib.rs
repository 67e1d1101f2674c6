//! The line-oriented wire protocol spoken between the gateway and the
//! browser-based thin client, plus the gateway-wide error taxonomy.
//!
//! Each instruction is a comma-separated list of length-prefixed UTF-8
//! fields terminated by a semicolon:
//!
//! ```text
//! LENGTH.OPCODE,LENGTH.ARG1,LENGTH.ARG2,...;
//! ```
//!
//! `LENGTH` is the decimal UTF-8 code-point count of the field that
//! follows it. Binary payloads (PNG images, encoded audio) are
//! base64-encoded, either inline in a single instruction or split across
//! a `blob`/`end` pair for a chunked substream.

pub mod error;
pub mod framing;
pub mod primitive;
pub mod reader;
pub mod writer;

pub use error::{ErrorCode, GatewayError};
pub use primitive::{encode_png_base64, Composite, InboundInstruction, LogLevel, Primitive};
pub use reader::read_instruction;
pub use writer::{InstructionWriter, BLOB_CHUNK_SIZE};
