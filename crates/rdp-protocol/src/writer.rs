//! Serializing [`Primitive`] values onto an async byte sink.
//!
//! `InstructionWriter` is not thread-safe: in steady state the frame
//! pacer is the only producer writing to a given socket, and callers
//! elsewhere (handshake negotiation, shutdown) must hold exclusive
//! access for the duration of their writes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::GatewayError;
use crate::framing::encode_instruction;
use crate::primitive::Primitive;

/// Raw bytes per `blob` chunk before base64 expansion, matching the
/// chunk size the driver core uses so an unbounded clipboard paste or
/// audio frame doesn't block the pacer behind one giant write.
pub const BLOB_CHUNK_SIZE: usize = 6048;

/// Writes [`Primitive`] instructions to an underlying async sink.
pub struct InstructionWriter<W> {
    sink: W,
}

impl<W> InstructionWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    /// Serialize and write one instruction.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the underlying write
    /// fails.
    pub async fn write(&mut self, primitive: &Primitive) -> Result<(), GatewayError> {
        let encoded = encode_instruction(&primitive.to_fields());
        self.sink
            .write_all(encoded.as_bytes())
            .await
            .map_err(GatewayError::Transport)
    }

    /// Flush buffered writes. Call once per frame, after the last
    /// `sync` of that frame, matching the driver core's
    /// end-of-frame-then-socket-flush ordering.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the flush fails.
    pub async fn flush(&mut self) -> Result<(), GatewayError> {
        self.sink.flush().await.map_err(GatewayError::Transport)
    }

    /// Write raw bytes as a chunked `blob`/`end` substream, splitting
    /// into [`BLOB_CHUNK_SIZE`]-byte pieces.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if any underlying write
    /// fails.
    pub async fn write_blob_stream(&mut self, stream: i32, data: &[u8]) -> Result<(), GatewayError> {
        self.write_blob_chunk(stream, data).await?;
        self.write(&Primitive::End { stream }).await
    }

    /// Write `data` as one or more `blob` instructions on `stream`,
    /// without terminating the substream. Callers that push PCM or
    /// other open-ended incremental data use this and send a final
    /// `end` themselves once the stream is done.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if any underlying write
    /// fails.
    pub async fn write_blob_chunk(&mut self, stream: i32, data: &[u8]) -> Result<(), GatewayError> {
        for chunk in data.chunks(BLOB_CHUNK_SIZE) {
            let primitive = Primitive::Blob { stream, data_base64: BASE64.encode(chunk) };
            self.write(&primitive).await?;
        }
        Ok(())
    }

    /// Consume the writer and return the underlying sink.
    pub fn into_inner(self) -> W {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::Composite;

    #[tokio::test]
    async fn writes_encoded_instruction_bytes() {
        let mut buf = Vec::new();
        let mut writer = InstructionWriter::new(&mut buf);
        writer.write(&Primitive::Sync { timestamp_ms: 42 }).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "4.sync,2.42;");
    }

    #[tokio::test]
    async fn writes_multiple_instructions_in_order() {
        let mut buf = Vec::new();
        let mut writer = InstructionWriter::new(&mut buf);
        writer.write(&Primitive::Dispose { layer: 3 }).await.unwrap();
        writer
            .write(&Primitive::Rect { layer: 0, x: 0, y: 0, width: 10, height: 10 })
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "7.dispose,1.3;4.rect,1.0,1.0,1.0,2.10,2.10;"
        );
    }

    #[tokio::test]
    async fn blob_stream_splits_large_payloads_into_chunks() {
        let mut buf = Vec::new();
        let mut writer = InstructionWriter::new(&mut buf);
        let data = vec![0xABu8; BLOB_CHUNK_SIZE + 10];
        writer.write_blob_stream(1, &data).await.unwrap();

        let out = String::from_utf8(buf).unwrap();
        assert_eq!(out.matches("4.blob").count(), 2);
        assert!(out.trim_end().ends_with("3.end,1.1;"));
    }

    #[tokio::test]
    async fn composite_name_appears_verbatim_in_copy_instruction() {
        let mut buf = Vec::new();
        let mut writer = InstructionWriter::new(&mut buf);
        writer
            .write(&Primitive::Copy {
                src_layer: 0,
                sx: 0,
                sy: 0,
                width: 5,
                height: 5,
                composite: Composite::Over,
                dst_layer: 0,
                dx: 10,
                dy: 10,
            })
            .await
            .unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("4.over"));
    }
}
