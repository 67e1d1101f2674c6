//! CLIPRDR backend: serves the thin client's clipboard text to the
//! remote desktop on request. Grounded on `cosmic-rdp-server`'s
//! `clipboard.rs` (same `CliprdrBackend` trait, same UTF-16LE/ANSI
//! format handling and `ClipboardMessage` side-channel shape), adapted
//! from its arboard-backed system-clipboard source to a value pushed
//! in from `rdp-session::ClientSession` over the
//! `RdpInputEvent::Clipboard` channel.
//!
//! Only the paste-into-remote-desktop direction is wired: the display
//! protocol's instruction set has no outbound `clipboard` opcode, so
//! clipboard content copied on the remote desktop is
//! decoded (`on_remote_copy`/`on_format_data_response`) but only
//! logged, never forwarded to the thin client. Flushing this backend's
//! `ClipboardMessage`s (`SendInitiateCopy`/`SendFormatData`) onto the
//! CLIPRDR virtual channel requires `ActiveStage`'s static-channel
//! dispatch path, which no client-role example in the retrieval pack
//! demonstrates; `bridge::run` drains and logs them instead of guessing
//! at that call. See `DESIGN.md`.

use std::sync::{Arc, Mutex};

use ironrdp_cliprdr::backend::{CliprdrBackend, ClipboardMessage};
use ironrdp_cliprdr::pdu::{
    ClipboardFormat, ClipboardFormatId, ClipboardGeneralCapabilityFlags, FileContentsRequest,
    FileContentsResponse, FormatDataRequest, FormatDataResponse, LockDataId,
    OwnedFormatDataResponse,
};
use tokio::sync::mpsc;

/// Shared slot holding the most recent text the thin client asked to
/// place on the remote desktop's clipboard.
#[derive(Clone, Default)]
pub struct ClipboardSlot(Arc<Mutex<Option<String>>>);

impl ClipboardSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, text: String) {
        *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(text);
    }

    fn get(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

pub struct GatewayClipboardBackend {
    slot: ClipboardSlot,
    event_tx: mpsc::UnboundedSender<ClipboardMessage>,
}

impl GatewayClipboardBackend {
    #[must_use]
    pub fn new(slot: ClipboardSlot, event_tx: mpsc::UnboundedSender<ClipboardMessage>) -> Self {
        Self { slot, event_tx }
    }

    fn send(&self, msg: ClipboardMessage) {
        if self.event_tx.send(msg).is_err() {
            tracing::warn!("clipboard event channel closed");
        }
    }

    fn text_formats() -> Vec<ClipboardFormat> {
        vec![ClipboardFormat::new(ClipboardFormatId::CF_UNICODETEXT), ClipboardFormat::new(ClipboardFormatId::CF_TEXT)]
    }
}

impl ironrdp_core::AsAny for GatewayClipboardBackend {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl CliprdrBackend for GatewayClipboardBackend {
    fn temporary_directory(&self) -> &str {
        "/tmp"
    }

    fn client_capabilities(&self) -> ClipboardGeneralCapabilityFlags {
        ClipboardGeneralCapabilityFlags::empty()
    }

    fn on_ready(&mut self) {
        tracing::debug!("CLIPRDR channel ready");
        self.on_request_format_list();
    }

    fn on_request_format_list(&mut self) {
        if self.slot.get().is_some_and(|t| !t.is_empty()) {
            self.send(ClipboardMessage::SendInitiateCopy(Self::text_formats()));
        }
    }

    fn on_process_negotiated_capabilities(&mut self, capabilities: ClipboardGeneralCapabilityFlags) {
        tracing::debug!(?capabilities, "negotiated CLIPRDR capabilities");
    }

    fn on_remote_copy(&mut self, available_formats: &[ClipboardFormat]) {
        tracing::debug!(?available_formats, "remote desktop clipboard updated (not forwarded)");
    }

    fn on_format_data_request(&mut self, request: FormatDataRequest) {
        let response = match self.slot.get() {
            Some(text) if request.format == ClipboardFormatId::CF_UNICODETEXT => {
                OwnedFormatDataResponse::new_unicode_string(&text)
            }
            Some(text) if request.format == ClipboardFormatId::CF_TEXT => {
                OwnedFormatDataResponse::new_string(&text)
            }
            _ => OwnedFormatDataResponse::new_error(),
        };
        self.send(ClipboardMessage::SendFormatData(response));
    }

    fn on_format_data_response(&mut self, response: FormatDataResponse<'_>) {
        if response.is_error() {
            tracing::debug!("remote sent a clipboard error response");
        }
    }

    fn on_file_contents_request(&mut self, _request: FileContentsRequest) {
        tracing::debug!("file contents request ignored (not supported)");
    }

    fn on_file_contents_response(&mut self, _response: FileContentsResponse<'_>) {
        tracing::debug!("file contents response ignored (not supported)");
    }

    fn on_lock(&mut self, _data_id: LockDataId) {}

    fn on_unlock(&mut self, _data_id: LockDataId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_round_trips_the_latest_value() {
        let slot = ClipboardSlot::new();
        assert_eq!(slot.get(), None);
        slot.set("hello".to_string());
        assert_eq!(slot.get(), Some("hello".to_string()));
        slot.set("world".to_string());
        assert_eq!(slot.get(), Some("world".to_string()));
    }

    #[test]
    fn format_data_request_serves_unicode_text() {
        let slot = ClipboardSlot::new();
        slot.set("hi".to_string());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = GatewayClipboardBackend::new(slot, tx);
        backend.on_format_data_request(FormatDataRequest { format: ClipboardFormatId::CF_UNICODETEXT });
        let ClipboardMessage::SendFormatData(resp) = rx.try_recv().expect("message sent") else {
            panic!("expected SendFormatData");
        };
        assert!(!resp.is_error());
    }

    #[test]
    fn format_data_request_errors_with_no_text() {
        let slot = ClipboardSlot::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = GatewayClipboardBackend::new(slot, tx);
        backend.on_format_data_request(FormatDataRequest { format: ClipboardFormatId::CF_UNICODETEXT });
        let ClipboardMessage::SendFormatData(resp) = rx.try_recv().expect("message sent") else {
            panic!("expected SendFormatData");
        };
        assert!(resp.is_error());
    }
}
