//! The frame pacer: owns the flush cadence for one display, batching
//! bursts of drawing-order mutations into a single outbound frame
//! without indefinite delay, and throttling itself against a slow
//! client instead of growing an unbounded backlog.
//!
//! The `modified` flag and its [`tokio::sync::Notify`] are the sole
//! synchronization point between producers (drawing-order handlers,
//! driver hooks) and this loop.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rdp_display::{CursorDelta, Display, DisplayFlush, LayerEvent};
use rdp_protocol::{encode_png_base64, Composite, GatewayError, InstructionWriter, Primitive};
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use crate::wire::pixels_to_rgba;

/// How long the wait-for-work phase idles with nothing dirty before
/// looping to re-check shutdown state.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);
/// Upper bound on how long a single frame keeps accumulating work
/// before it must be flushed.
pub const DEFAULT_MAX_FRAME_DURATION: Duration = Duration::from_millis(40);
/// A client write slower than this is logged as throttling the
/// producer.
pub const DEFAULT_LAG_THRESHOLD: Duration = Duration::from_millis(100);
/// Poll interval used while filling a frame.
const FRAME_FILL_POLL: Duration = Duration::from_millis(10);

pub struct PacerConfig {
    pub wait_timeout: Duration,
    pub max_frame_duration: Duration,
    pub lag_threshold: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            max_frame_duration: DEFAULT_MAX_FRAME_DURATION,
            lag_threshold: DEFAULT_LAG_THRESHOLD,
        }
    }
}

/// The "modified" condition shared between producers and the pacer.
#[derive(Clone, Default)]
pub struct ModifiedFlag(Arc<Notify>);

impl ModifiedFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the pacer. Safe to call from any producer.
    pub fn notify(&self) {
        self.0.notify_one();
    }

    /// Wait up to `wait` for a notification; returns whether one
    /// arrived before the timeout.
    async fn wait(&self, wait: Duration) -> bool {
        matches!(timeout(wait, self.0.notified()).await, Ok(()))
    }
}

/// One client attached to this display's pacer, registered on join and
/// removed on leave or write failure.
pub struct ClientWriter<W> {
    id: u64,
    writer: InstructionWriter<W>,
    last_write_lag: Duration,
}

impl<W> ClientWriter<W>
where
    W: AsyncWrite + Unpin,
{
    #[must_use]
    pub fn new(id: u64, writer: InstructionWriter<W>) -> Self {
        Self { id, writer, last_write_lag: Duration::ZERO }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Drives the flush cadence for one display and fans each frame out to
/// every attached client.
pub struct FramePacer<W> {
    display: Arc<Mutex<Display>>,
    modified: ModifiedFlag,
    clients: Arc<Mutex<Vec<ClientWriter<W>>>>,
    config: PacerConfig,
}

impl<W> FramePacer<W>
where
    W: AsyncWrite + Unpin,
{
    #[must_use]
    pub fn new(
        display: Arc<Mutex<Display>>,
        modified: ModifiedFlag,
        clients: Arc<Mutex<Vec<ClientWriter<W>>>>,
        config: PacerConfig,
    ) -> Self {
        Self { display, modified, clients, config }
    }

    /// Run the pacer loop until `stopping` returns true. Checked once
    /// per iteration, matching the cooperative-cancellation model: no
    /// thread is ever forcibly killed.
    pub async fn run(mut self, stopping: impl Fn() -> bool) {
        while !stopping() {
            if !self.modified.wait(self.config.wait_timeout).await {
                continue;
            }
            self.fill_frame().await;
            self.flush_frame().await;
        }
    }

    async fn fill_frame(&self) {
        let frame_start = Instant::now();
        loop {
            if frame_start.elapsed() >= self.config.max_frame_duration {
                if self.max_client_lag().await <= self.config.lag_threshold {
                    return;
                }
                tracing::warn!("throttling frame flush: a client is lagging behind");
            }
            self.modified.wait(FRAME_FILL_POLL).await;
        }
    }

    async fn max_client_lag(&self) -> Duration {
        self.clients.lock().await.iter().map(|c| c.last_write_lag).max().unwrap_or_default()
    }

    async fn flush_frame(&mut self) {
        let flush = self.display.lock().await.flush();
        let mut instructions = to_instructions(&flush);
        instructions.push(Primitive::Sync { timestamp_ms: now_ms() });

        let mut clients = self.clients.lock().await;
        let mut dead = Vec::new();
        for (index, client) in clients.iter_mut().enumerate() {
            let started = Instant::now();
            if let Err(err) = write_frame(&mut client.writer, &instructions).await {
                tracing::warn!(client = client.id, error = %err, "dropping client after write failure");
                dead.push(index);
                continue;
            }
            client.last_write_lag = started.elapsed();
            if client.last_write_lag > self.config.lag_threshold {
                tracing::debug!(client = client.id, lag_ms = client.last_write_lag.as_millis(), "client write exceeded lag threshold");
            }
        }
        for index in dead.into_iter().rev() {
            clients.remove(index);
        }
    }
}

async fn write_frame<W>(
    writer: &mut InstructionWriter<W>,
    instructions: &[Primitive],
) -> Result<(), GatewayError>
where
    W: AsyncWrite + Unpin,
{
    for primitive in instructions {
        writer.write(primitive).await?;
    }
    writer.flush().await
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Convert one frame's drained [`DisplayFlush`] into the wire
/// primitives that replicate it, in dependency order: structural
/// events first (so a referenced layer is never moved/shaded before it
/// exists on the wire), then each layer's pixel content.
fn to_instructions(flush: &DisplayFlush) -> Vec<Primitive> {
    let mut out = Vec::new();

    for event in &flush.events {
        match *event {
            LayerEvent::Created { id, parent, x, y, z, width, height } => {
                out.push(Primitive::Move { layer: id, parent, x, y, z });
                out.push(Primitive::Size { layer: id, width, height });
            }
            LayerEvent::Moved { id, parent, x, y, z } => {
                out.push(Primitive::Move { layer: id, parent, x, y, z });
            }
            LayerEvent::Shaded { id, opacity } => {
                out.push(Primitive::Shade { layer: id, opacity });
            }
            LayerEvent::Resized { id, width, height } => {
                out.push(Primitive::Size { layer: id, width, height });
            }
            LayerEvent::Disposed { id } => {
                out.push(Primitive::Dispose { layer: id });
            }
        }
    }

    for layer in &flush.layers {
        if let Some((rect, pixels)) = &layer.delta.image {
            match encode_png_base64(rect.width as u32, rect.height as u32, &pixels_to_rgba(pixels)) {
                Ok(data_base64) => out.push(Primitive::Png {
                    composite: Composite::Over,
                    layer: layer.id,
                    x: rect.x,
                    y: rect.y,
                    data_base64,
                }),
                Err(err) => tracing::warn!(layer = layer.id, error = %err, "dropping unencodable image update"),
            }
        }
        for copy in &layer.delta.copies {
            out.push(Primitive::Copy {
                src_layer: layer.id,
                sx: copy.src.x,
                sy: copy.src.y,
                width: copy.src.width,
                height: copy.src.height,
                composite: Composite::Over,
                dst_layer: layer.id,
                dx: copy.dest_x,
                dy: copy.dest_y,
            });
        }
    }

    if let Some(CursorDelta { pixels, width, height, hotspot_x, hotspot_y }) = &flush.cursor {
        match encode_png_base64(*width, *height, &pixels_to_rgba(pixels)) {
            Ok(data_base64) => {
                out.push(Primitive::Cursor { hot_x: *hotspot_x, hot_y: *hotspot_y, data_base64 });
            }
            Err(err) => tracing::warn!(error = %err, "dropping unencodable cursor update"),
        }
    }

    out
}
