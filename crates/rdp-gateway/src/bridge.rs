//! Bridges the live RDP connection to the shadow [`Display`]: drives
//! IronRDP's [`ActiveStage`] across the remote socket, translates its
//! dirty-rectangle output into `Surface` mutations, and accepts input
//! events from attached thin clients over a channel so they can be
//! injected back into the RDP session from the same task that owns
//! `ActiveStage` (it is not `Send` across await points, matching the
//! single-task-owns-it shape in `xBounceIT-janus`'s `session_task.rs`
//! and the `totoshko88` `rdp_client` examples).
//!
//! IronRDP composites every order (`DstBlt`, `MemBlt`, RemoteFX tiles,
//! ...) onto its own [`DecodedImage`] internally and only reports the
//! resulting dirty rectangle — it does not expose a FreeRDP-style
//! per-order callback table the way `rdp-orders::OrderHandlers` is
//! shaped. This bridge therefore drives the shadow surface with a
//! single raw-pixel blit per dirty rectangle (semantically a
//! continuous stream of `MemBlt`/`ScrBlt` SRCCOPY orders over the root
//! surface); `rdp-orders::OrderHandlers` is still exercised for the one
//! update IronRDP *does* expose discretely: the pointer bitmap. See
//! `DESIGN.md` for the full resolution of this fidelity gap.

use std::sync::Arc;

use ironrdp_connector::ConnectionResult;
use ironrdp_graphics::image_processing::PixelFormat;
use ironrdp_session::image::DecodedImage;
use ironrdp_session::{ActiveStage, ActiveStageOutput};
use ironrdp_tokio::{split_tokio_framed, FramedRead, FramedWrite};
use rdp_display::{Display, ROOT_ID};
use rdp_input::ScancodeEntry;
use rdp_orders::{OrderHandlers, OrderProcessor, PointerOrder};
use tokio::sync::{mpsc, Mutex};

use crate::cliprdr::ClipboardSlot;
use crate::connection::{ClipboardEventReceiver, RdpFramed};
use rdp_session::ModifiedFlag;

/// One input event accepted from an attached thin client, queued for
/// the bridge task to inject into the live RDP session.
pub enum RdpInputEvent {
    Key { scancode: ScancodeEntry, pressed: bool },
    MouseMove { x: i32, y: i32 },
    MouseButton { button: u8, pressed: bool },
    Clipboard(String),
}

/// [`rdp_session::RdpInputSink`] implementation that hands events off
/// to the bridge task via an unbounded channel rather than touching
/// `ActiveStage` directly — `ClientSession` may run on a different
/// task than the one driving the RDP socket.
pub struct ChannelInputSink {
    tx: mpsc::UnboundedSender<RdpInputEvent>,
}

impl ChannelInputSink {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<RdpInputEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: RdpInputEvent) -> Result<(), rdp_protocol::GatewayError> {
        self.tx
            .send(event)
            .map_err(|_| rdp_protocol::GatewayError::Transient("RDP bridge is gone".to_string()))
    }
}

#[async_trait::async_trait]
impl rdp_session::RdpInputSink for ChannelInputSink {
    async fn send_key(
        &mut self,
        scancode: ScancodeEntry,
        pressed: bool,
    ) -> Result<(), rdp_protocol::GatewayError> {
        self.send(RdpInputEvent::Key { scancode, pressed })
    }

    async fn send_mouse_move(&mut self, x: i32, y: i32) -> Result<(), rdp_protocol::GatewayError> {
        self.send(RdpInputEvent::MouseMove { x, y })
    }

    async fn send_mouse_button(
        &mut self,
        button: u8,
        pressed: bool,
    ) -> Result<(), rdp_protocol::GatewayError> {
        self.send(RdpInputEvent::MouseButton { button, pressed })
    }

    async fn send_clipboard(&mut self, data: String) -> Result<(), rdp_protocol::GatewayError> {
        self.send(RdpInputEvent::Clipboard(data))
    }

    async fn resize(&mut self, _width: u16, _height: u16) -> Result<(), rdp_protocol::GatewayError> {
        // Server-initiated resize of an already-connected RDP session
        // (Deactivation-Reactivation) is not driven from the client
        // side; the thin client's `size` request only reshapes the
        // layer it already sees. See the Open Question in DESIGN.md.
        Ok(())
    }
}

/// Runs the RDP active stage to completion: reads PDUs from the
/// remote desktop, applies graphics/pointer updates to `display`, and
/// drains `input_rx` for events to inject back, until the remote side
/// terminates the session or `stopping` reports true.
pub async fn run(
    framed: RdpFramed,
    connection_result: ConnectionResult,
    display: Arc<Mutex<Display>>,
    modified: ModifiedFlag,
    clipboard: ClipboardSlot,
    mut input_rx: mpsc::UnboundedReceiver<RdpInputEvent>,
    mut clipboard_events: ClipboardEventReceiver,
    stopping: impl Fn() -> bool,
) -> anyhow::Result<()> {
    let (mut reader, mut writer) = split_tokio_framed(framed);
    let mut image = DecodedImage::new(
        PixelFormat::RgbA32,
        connection_result.desktop_size.width,
        connection_result.desktop_size.height,
    );
    let mut active_stage = ActiveStage::new(connection_result);
    let mut last_pointer_pos = (0i32, 0i32);

    loop {
        if stopping() {
            break;
        }

        tokio::select! {
            read = reader.read_pdu() => {
                let (action, payload) = read.map_err(|e| anyhow::anyhow!("RDP read error: {e}"))?;
                let outputs = active_stage
                    .process(&mut image, action, &payload)
                    .map_err(|e| anyhow::anyhow!("RDP session error: {e}"))?;
                for output in outputs {
                    if handle_output(output, &mut writer, &image, &display, &modified).await? {
                        return Ok(());
                    }
                }
            }
            event = input_rx.recv() => {
                let Some(event) = event else { return Ok(()) };
                if let RdpInputEvent::Clipboard(text) = event {
                    clipboard.set(text);
                    continue;
                }
                if let RdpInputEvent::MouseMove { x, y } = event {
                    last_pointer_pos = (x, y);
                }
                if let Some(bytes) = inject_input(&mut active_stage, &mut image, event, last_pointer_pos) {
                    writer
                        .write_all(&bytes)
                        .await
                        .map_err(|e| anyhow::anyhow!("RDP write error: {e}"))?;
                }
            }
            Some(_event) = clipboard_events.recv() => {
                // Flushing this onto the CLIPRDR virtual channel needs
                // `ActiveStage`'s static-channel dispatch, which no
                // client-role example in the retrieval pack shows; see
                // the module doc and `DESIGN.md`.
                tracing::debug!("clipboard message ready to send but CLIPRDR dispatch is not wired");
            }
        }
    }

    Ok(())
}

/// Applies one [`ActiveStageOutput`]; returns `Ok(true)` if the
/// session should end.
async fn handle_output(
    output: ActiveStageOutput,
    writer: &mut impl FramedWrite,
    image: &DecodedImage,
    display: &Arc<Mutex<Display>>,
    modified: &ModifiedFlag,
) -> anyhow::Result<bool> {
    match output {
        ActiveStageOutput::ResponseFrame(data) => {
            writer.write_all(&data).await.map_err(|e| anyhow::anyhow!("RDP write error: {e}"))?;
        }
        ActiveStageOutput::GraphicsUpdate(region) => {
            apply_graphics_update(display, modified, image, region).await;
        }
        ActiveStageOutput::PointerBitmap(pointer) => {
            let mut guard = display.lock().await;
            let mut processor = OrderProcessor::new(&mut guard);
            let order = PointerOrder {
                cache_index: 0,
                width: u32::from(pointer.width),
                height: u32::from(pointer.height),
                hotspot_x: i32::from(pointer.hotspot_x),
                hotspot_y: i32::from(pointer.hotspot_y),
                pixels: rgba_bytes_to_pixels(&pointer.bitmap_data),
            };
            if let Err(err) = processor.pointer_update(order) {
                tracing::warn!(error = %err, "dropping unsupported pointer update");
            }
            drop(guard);
            modified.notify();
        }
        ActiveStageOutput::PointerDefault | ActiveStageOutput::PointerHidden => {
            tracing::debug!("pointer visibility change has no wire equivalent, ignoring");
        }
        ActiveStageOutput::PointerPosition { .. } => {
            tracing::debug!("server-driven pointer position has no wire equivalent, ignoring");
        }
        ActiveStageOutput::Terminate(reason) => {
            tracing::info!(?reason, "RDP session terminated by remote desktop");
            return Ok(true);
        }
        ActiveStageOutput::DeactivateAll(_) => {
            tracing::warn!("remote desktop requested reactivation; ending session (unsupported)");
            return Ok(true);
        }
    }
    Ok(false)
}

async fn apply_graphics_update(
    display: &Arc<Mutex<Display>>,
    modified: &ModifiedFlag,
    image: &DecodedImage,
    region: ironrdp_pdu::geometry::InclusiveRectangle,
) {
    let x = i32::from(region.left);
    let y = i32::from(region.top);
    let width = i32::from(region.right.saturating_sub(region.left)) + 1;
    let height = i32::from(region.bottom.saturating_sub(region.top)) + 1;
    if width <= 0 || height <= 0 {
        return;
    }

    let pixels = extract_region_pixels(image, x, y, width, height);
    if pixels.is_empty() {
        return;
    }

    let mut guard = display.lock().await;
    if let Some(surface) = guard.surface_mut(ROOT_ID) {
        surface.draw_image(x, y, &pixels, width, height);
    }
    drop(guard);
    modified.notify();
}

/// Extracts one rectangle's worth of pixels from IronRDP's decoded
/// framebuffer and converts them from tightly packed RGBA8 to this
/// codebase's `0xAARRGGBB` pixel convention.
fn extract_region_pixels(image: &DecodedImage, x: i32, y: i32, width: i32, height: i32) -> Vec<u32> {
    let img_width = i32::from(image.width());
    let img_height = i32::from(image.height());
    let data = image.data();

    let x = x.clamp(0, img_width);
    let y = y.clamp(0, img_height);
    let width = width.min(img_width - x);
    let height = height.min(img_height - y);
    if width <= 0 || height <= 0 {
        return Vec::new();
    }

    let stride = img_width as usize * 4;
    let mut out = Vec::with_capacity((width * height) as usize);
    for row in 0..height {
        let row_start = (y as usize + row as usize) * stride + x as usize * 4;
        for col in 0..width {
            let idx = row_start + col as usize * 4;
            if idx + 4 > data.len() {
                out.push(0);
                continue;
            }
            out.push(rgba_pixel(data[idx], data[idx + 1], data[idx + 2], data[idx + 3]));
        }
    }
    out
}

fn rgba_bytes_to_pixels(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4).map(|c| rgba_pixel(c[0], c[1], c[2], c[3])).collect()
}

fn rgba_pixel(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (u32::from(a) << 24) | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// Translates one queued input event into the fast-path input bytes
/// IronRDP expects and feeds it through `ActiveStage`. Returns the
/// response bytes to write back to the remote desktop, if any.
///
/// `pointer_pos` is the last known `(x, y)` reported by `MouseMove`;
/// button events carry it alongside the button flags because
/// `TS_FASTPATH_POINTEREVENT` always transmits a position, not just a
/// button-state delta (a button PDU with no position would snap the
/// remote cursor to 0,0 on every click).
fn inject_input(
    active_stage: &mut ActiveStage,
    image: &mut DecodedImage,
    event: RdpInputEvent,
    pointer_pos: (i32, i32),
) -> Option<Vec<u8>> {
    use ironrdp_pdu::input::fast_path::{FastPathInputEvent, KeyboardFlags, PointerFlags};

    let fastpath_event = match event {
        RdpInputEvent::Key { scancode, pressed } => {
            let mut flags = KeyboardFlags::empty();
            if !pressed {
                flags |= KeyboardFlags::RELEASE;
            }
            if scancode.flags.extended {
                flags |= KeyboardFlags::EXTENDED;
            }
            FastPathInputEvent::KeyboardEvent(flags, scancode.code)
        }
        RdpInputEvent::MouseMove { x, y } => FastPathInputEvent::MouseEvent(ironrdp_pdu::input::mouse::PointerEvent {
            flags: PointerFlags::MOVE,
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            number_of_wheel_rotation_units: 0,
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            x_position: x.clamp(0, i32::from(u16::MAX)) as u16,
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            y_position: y.clamp(0, i32::from(u16::MAX)) as u16,
        }),
        RdpInputEvent::MouseButton { button, pressed } => {
            let flags = match (button, pressed) {
                (0, true) => PointerFlags::LEFT_BUTTON | PointerFlags::DOWN,
                (0, false) => PointerFlags::LEFT_BUTTON,
                (1, true) => PointerFlags::RIGHT_BUTTON | PointerFlags::DOWN,
                (1, false) => PointerFlags::RIGHT_BUTTON,
                (2, true) => PointerFlags::MIDDLE_BUTTON_OR_WHEEL | PointerFlags::DOWN,
                (2, false) => PointerFlags::MIDDLE_BUTTON_OR_WHEEL,
                _ => return None,
            };
            let (x, y) = pointer_pos;
            FastPathInputEvent::MouseEvent(ironrdp_pdu::input::mouse::PointerEvent {
                flags,
                number_of_wheel_rotation_units: 0,
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                x_position: x.clamp(0, i32::from(u16::MAX)) as u16,
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                y_position: y.clamp(0, i32::from(u16::MAX)) as u16,
            })
        }
        RdpInputEvent::Clipboard(_text) => {
            // CLIPRDR data transfer happens on a static virtual channel,
            // not the fast-path input stream; see `cliprdr.rs`.
            return None;
        }
    };

    match active_stage.process_fastpath_input(image, &[fastpath_event]) {
        Ok(outputs) => {
            for output in outputs {
                if let ActiveStageOutput::ResponseFrame(bytes) = output {
                    return Some(bytes);
                }
            }
            None
        }
        Err(err) => {
            tracing::debug!(error = %err, "dropping input event the RDP session rejected");
            None
        }
    }
}
