//! Per-connection lifecycle: handshake, initial display replay, and the
//! steady-state input loop that dispatches client events and releases
//! resources on the way out.

use std::sync::Arc;
use std::time::Duration;

use rdp_display::{CursorDelta, Display, ROOT_ID};
use rdp_input::{us_qwerty_base, KeyStateMachine, Keymap, MouseOutput, MouseStateMachine, ScancodeEntry};
use rdp_protocol::{
    encode_png_base64, Composite, GatewayError, InboundInstruction, InstructionWriter, Primitive,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::pacer::ModifiedFlag;
use crate::wire::pixels_to_rgba;

/// Handshake steps time out after this long; steady-state reads block
/// indefinitely, driven entirely by the client.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Parameter names advertised in response to `select`, in the order the
/// client's `connect` instruction must supply them. Mirrors the CLI
/// surface this gateway exposes on the RDP side.
const ADVERTISED_PARAMS: &[&str] = &[
    "hostname",
    "port",
    "domain",
    "username",
    "password",
    "width",
    "height",
    "initial-program",
    "color-depth",
    "disable-audio",
    "console",
    "console-audio",
];

/// The negotiated `connect` parameters for one session.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub hostname: String,
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub width: u16,
    pub height: u16,
    pub color_depth: u8,
}

/// Dispatch target for translated client input: decouples this session
/// from the exact RDP connector type, the way `rdp_orders::OrderHandlers`
/// decouples drawing-order translation from the exact decoded-PDU layout.
#[async_trait::async_trait]
pub trait RdpInputSink: Send {
    async fn send_key(&mut self, scancode: ScancodeEntry, pressed: bool) -> Result<(), GatewayError>;
    async fn send_mouse_move(&mut self, x: i32, y: i32) -> Result<(), GatewayError>;
    async fn send_mouse_button(&mut self, button: u8, pressed: bool) -> Result<(), GatewayError>;
    async fn send_clipboard(&mut self, data: String) -> Result<(), GatewayError>;
    async fn resize(&mut self, width: u16, height: u16) -> Result<(), GatewayError>;
}

/// One connected thin client: owns the outbound writer used for
/// handshake and synchronization (the pacer takes over outbound writes
/// once steady state begins), the input state machines, and the sink
/// that forwards translated input to the RDP side.
pub struct ClientSession<W, S> {
    id: u64,
    display: Arc<Mutex<Display>>,
    modified: ModifiedFlag,
    writer: Option<InstructionWriter<W>>,
    keystate: KeyStateMachine,
    mousestate: MouseStateMachine,
    input_sink: S,
    params: ConnectParams,
}

impl<W, S> ClientSession<W, S>
where
    W: AsyncWrite + Unpin,
    S: RdpInputSink,
{
    #[must_use]
    pub fn new(
        id: u64,
        display: Arc<Mutex<Display>>,
        modified: ModifiedFlag,
        writer: InstructionWriter<W>,
        input_sink: S,
    ) -> Self {
        Self {
            id,
            display,
            modified,
            writer: Some(writer),
            keystate: KeyStateMachine::new(Keymap::new(us_qwerty_base())),
            mousestate: MouseStateMachine::new(),
            input_sink,
            params: ConnectParams::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn connect_params(&self) -> &ConnectParams {
        &self.params
    }

    fn writer(&mut self) -> &mut InstructionWriter<W> {
        self.writer.as_mut().expect("writer used after being taken for the frame pacer")
    }

    /// Hands the outbound writer over to the caller, for the frame
    /// pacer to take over once the handshake and initial `synchronize`
    /// have completed. Must not be called more than once, nor before
    /// `synchronize`.
    ///
    /// # Panics
    ///
    /// Panics if the writer has already been taken.
    #[must_use]
    pub fn take_writer(&mut self) -> InstructionWriter<W> {
        self.writer.take().expect("writer already taken")
    }

    /// Run the `select` → `args` → `size`/`audio`/`video` → `connect`
    /// exchange. Each read is bounded by [`HANDSHAKE_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Timeout`] if a step doesn't arrive in
    /// time, [`GatewayError::Protocol`] for an out-of-order or malformed
    /// instruction, and [`GatewayError::BadArgument`] for an
    /// unsupported protocol name or a missing hostname.
    pub async fn handshake<R>(&mut self, reader: &mut R) -> Result<(), GatewayError>
    where
        R: AsyncRead + Unpin,
    {
        match parse_step(&read_step(reader).await?)? {
            InboundInstruction::Select { protocol } if protocol == "rdp" => {}
            InboundInstruction::Select { protocol } => {
                return Err(GatewayError::BadArgument(format!(
                    "unsupported protocol: {protocol}"
                )));
            }
            _ => return Err(GatewayError::Protocol("expected select".into())),
        }

        let names = ADVERTISED_PARAMS.iter().map(|s| (*s).to_string()).collect();
        self.writer().write(&Primitive::Args { names }).await?;
        self.writer().flush().await?;

        let (negotiated_width, negotiated_height) = match parse_step(&read_step(reader).await?)? {
            InboundInstruction::Size { width, height } => (width, height),
            _ => return Err(GatewayError::Protocol("expected size".into())),
        };

        match parse_step(&read_step(reader).await?)? {
            InboundInstruction::Audio { .. } => {}
            _ => return Err(GatewayError::Protocol("expected audio".into())),
        }
        match parse_step(&read_step(reader).await?)? {
            InboundInstruction::Video { .. } => {}
            _ => return Err(GatewayError::Protocol("expected video".into())),
        }

        let params = match parse_step(&read_step(reader).await?)? {
            InboundInstruction::Connect { params } => params,
            _ => return Err(GatewayError::Protocol("expected connect".into())),
        };

        self.params = parse_connect_params(&params, negotiated_width, negotiated_height)?;
        Ok(())
    }

    /// Replay the current display state: for each composed layer, in
    /// dependency order, a move (skipped for the root, which the client
    /// already has), a size, a shade, and a full-image update; then the
    /// current cursor, if one has been set.
    pub async fn synchronize(&mut self) -> Result<(), GatewayError> {
        let snapshot = {
            let display = self.display.lock().await;
            let mut layers = Vec::new();
            for id in display.composition_order() {
                let surface = display
                    .surface(id)
                    .expect("composition_order only names currently-allocated layers");
                layers.push((
                    id,
                    display.parent(id),
                    display.position(id).unwrap_or((0, 0, 0)),
                    display.opacity(id).unwrap_or(255),
                    surface.width(),
                    surface.height(),
                    surface.pixels().to_vec(),
                ));
            }
            (layers, display.cursor_snapshot())
        };
        let (layers, cursor) = snapshot;

        for (id, parent, (x, y, z), opacity, width, height, pixels) in layers {
            if id != ROOT_ID {
                let parent = parent.unwrap_or(ROOT_ID);
                self.writer().write(&Primitive::Move { layer: id, parent, x, y, z }).await?;
            }
            self.writer().write(&Primitive::Size { layer: id, width, height }).await?;
            self.writer().write(&Primitive::Shade { layer: id, opacity }).await?;

            let rgba = pixels_to_rgba(&pixels);
            let data_base64 = encode_png_base64(width as u32, height as u32, &rgba)?;
            self.writer()
                .write(&Primitive::Png { composite: Composite::Over, layer: id, x: 0, y: 0, data_base64 })
                .await?;
        }

        if let Some(CursorDelta { pixels, width, height, hotspot_x, hotspot_y }) = cursor {
            let rgba = pixels_to_rgba(&pixels);
            let data_base64 = encode_png_base64(width, height, &rgba)?;
            self.writer()
                .write(&Primitive::Cursor { hot_x: hotspot_x, hot_y: hotspot_y, data_base64 })
                .await?;
        }

        self.writer().flush().await
    }

    /// Read and dispatch inbound instructions until the client
    /// disconnects, the socket closes, `stopping` reports true, or an
    /// instruction is malformed. Checked once per loop iteration, per
    /// the cooperative-cancellation model.
    pub async fn steady_state<R>(
        &mut self,
        reader: &mut R,
        stopping: impl Fn() -> bool,
    ) -> Result<(), GatewayError>
    where
        R: AsyncRead + Unpin,
    {
        while !stopping() {
            let Some(fields) = rdp_protocol::read_instruction(reader).await? else {
                return Ok(());
            };
            let instruction = InboundInstruction::from_fields(&fields)?;
            if matches!(instruction, InboundInstruction::Disconnect) {
                return Ok(());
            }
            self.dispatch(instruction).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, instruction: InboundInstruction) -> Result<(), GatewayError> {
        match instruction {
            InboundInstruction::Mouse { x, y, mask } => {
                for event in self.mousestate.process(x, y, mask) {
                    match event {
                        MouseOutput::Motion { x, y } => self.input_sink.send_mouse_move(x, y).await?,
                        MouseOutput::Button { button, pressed } => {
                            self.input_sink.send_mouse_button(button, pressed).await?
                        }
                    }
                }
                Ok(())
            }
            InboundInstruction::Key { keysym, pressed } => {
                for (scancode, down) in self.keystate.process(keysym, pressed) {
                    self.input_sink.send_key(scancode, down).await?;
                }
                Ok(())
            }
            InboundInstruction::Size { width, height } => {
                let width = round_up_to_4(width);
                self.display
                    .lock()
                    .await
                    .resize_layer(ROOT_ID, i32::from(width), i32::from(height))?;
                self.modified.notify();
                self.input_sink.resize(width, height).await
            }
            InboundInstruction::Clipboard { data } => self.input_sink.send_clipboard(data).await,
            InboundInstruction::Select { .. }
            | InboundInstruction::Audio { .. }
            | InboundInstruction::Video { .. }
            | InboundInstruction::Connect { .. }
            | InboundInstruction::Disconnect => {
                Err(GatewayError::Protocol("unexpected instruction during steady state".into()))
            }
        }
    }

    /// Release every key still held down, in reverse press order, and
    /// hand back the input sink so the caller can close the RDP side
    /// and free resources in reverse allocation order.
    pub async fn shutdown(mut self) -> S {
        for (scancode, pressed) in self.keystate.release_all_on_shutdown() {
            if let Err(err) = self.input_sink.send_key(scancode, pressed).await {
                tracing::warn!(client = self.id, error = %err, "failed releasing key during shutdown");
            }
        }
        self.input_sink
    }
}

async fn read_step<R>(reader: &mut R) -> Result<Vec<String>, GatewayError>
where
    R: AsyncRead + Unpin,
{
    match timeout(HANDSHAKE_TIMEOUT, rdp_protocol::read_instruction(reader)).await {
        Ok(Ok(Some(fields))) => Ok(fields),
        Ok(Ok(None)) => Err(GatewayError::Protocol("connection closed during handshake".into())),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(GatewayError::Timeout("handshake step timed out".into())),
    }
}

fn parse_step(fields: &[String]) -> Result<InboundInstruction, GatewayError> {
    InboundInstruction::from_fields(fields)
}

fn round_up_to_4(value: u16) -> u16 {
    (value + 3) & !3
}

fn parse_connect_params(
    values: &[String],
    negotiated_width: u16,
    negotiated_height: u16,
) -> Result<ConnectParams, GatewayError> {
    let get = |i: usize| values.get(i).map(String::as_str).unwrap_or("");

    let hostname = get(0).to_string();
    if hostname.is_empty() {
        return Err(GatewayError::BadArgument("connect: hostname is required".into()));
    }

    let width = round_up_to_4(get(5).parse().unwrap_or(negotiated_width));
    let height = get(6).parse().unwrap_or(negotiated_height);

    let color_depth = match get(8).parse::<u8>() {
        Ok(depth @ (8 | 16 | 24 | 32)) => depth,
        Ok(other) => {
            tracing::warn!(requested = other, "invalid color-depth, falling back to 16");
            16
        }
        Err(_) => 16,
    };

    Ok(ConnectParams {
        hostname,
        domain: non_empty(get(2)),
        username: non_empty(get(3)),
        password: non_empty(get(4)),
        width,
        height,
        color_depth,
    })
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        keys: Vec<(ScancodeEntry, bool)>,
        mouse_moves: Vec<(i32, i32)>,
        mouse_buttons: Vec<(u8, bool)>,
        resizes: Vec<(u16, u16)>,
    }

    #[async_trait::async_trait]
    impl RdpInputSink for RecordingSink {
        async fn send_key(&mut self, scancode: ScancodeEntry, pressed: bool) -> Result<(), GatewayError> {
            self.keys.push((scancode, pressed));
            Ok(())
        }
        async fn send_mouse_move(&mut self, x: i32, y: i32) -> Result<(), GatewayError> {
            self.mouse_moves.push((x, y));
            Ok(())
        }
        async fn send_mouse_button(&mut self, button: u8, pressed: bool) -> Result<(), GatewayError> {
            self.mouse_buttons.push((button, pressed));
            Ok(())
        }
        async fn send_clipboard(&mut self, _data: String) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn resize(&mut self, width: u16, height: u16) -> Result<(), GatewayError> {
            self.resizes.push((width, height));
            Ok(())
        }
    }

    fn session() -> ClientSession<Vec<u8>, RecordingSink> {
        ClientSession::new(
            1,
            Arc::new(Mutex::new(Display::new(800, 600))),
            ModifiedFlag::new(),
            InstructionWriter::new(Vec::new()),
            RecordingSink::default(),
        )
    }

    #[test]
    fn round_up_to_4_snaps_to_the_next_multiple() {
        assert_eq!(round_up_to_4(801), 804);
        assert_eq!(round_up_to_4(800), 800);
    }

    #[test]
    fn connect_params_requires_a_hostname() {
        let values = vec![String::new()];
        assert!(parse_connect_params(&values, 800, 600).is_err());
    }

    #[test]
    fn connect_params_falls_back_to_negotiated_size_and_default_depth() {
        let values = vec!["desktop.example".to_string()];
        let params = parse_connect_params(&values, 801, 600).unwrap();
        assert_eq!(params.hostname, "desktop.example");
        assert_eq!(params.width, 804); // rounded up to the next multiple of 4
        assert_eq!(params.height, 600);
        assert_eq!(params.color_depth, 16);
    }

    #[test]
    fn connect_params_rejects_invalid_color_depth_with_a_16_bit_fallback() {
        let mut values = vec![String::new(); 9];
        values[0] = "desktop.example".to_string();
        values[8] = "17".to_string();
        let params = parse_connect_params(&values, 800, 600).unwrap();
        assert_eq!(params.color_depth, 16);
    }

    #[tokio::test]
    async fn mouse_instruction_dispatches_motion_then_button() {
        let mut session = session();
        session.dispatch(InboundInstruction::Mouse { x: 10, y: 20, mask: 0b1 }).await.unwrap();
        assert_eq!(session.input_sink.mouse_moves, vec![(10, 20)]);
        assert_eq!(session.input_sink.mouse_buttons, vec![(0, true)]);
    }

    #[tokio::test]
    async fn key_instruction_dispatches_translated_scancode() {
        let mut session = session();
        session.dispatch(InboundInstruction::Key { keysym: 0x0061, pressed: true }).await.unwrap();
        assert_eq!(session.input_sink.keys, vec![(ScancodeEntry::new(0x1E), true)]);
    }

    #[tokio::test]
    async fn size_instruction_resizes_the_root_layer_and_notifies_the_pacer() {
        let mut session = session();
        session.dispatch(InboundInstruction::Size { width: 801, height: 600 }).await.unwrap();
        assert_eq!(session.input_sink.resizes, vec![(804, 600)]);
        let display = session.display.lock().await;
        assert_eq!(display.surface(ROOT_ID).unwrap().width(), 804);
    }

    #[tokio::test]
    async fn connect_instruction_is_rejected_during_steady_state() {
        let mut session = session();
        let err = session.dispatch(InboundInstruction::Connect { params: Vec::new() }).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn shutdown_releases_pressed_keys_in_reverse_order() {
        let mut session = session();
        session.dispatch(InboundInstruction::Key { keysym: 0x0061, pressed: true }).await.unwrap(); // 'a'
        session.dispatch(InboundInstruction::Key { keysym: 0x0062, pressed: true }).await.unwrap(); // 'b'
        session.input_sink.keys.clear();

        let sink = session.shutdown().await;
        assert_eq!(
            sink.keys,
            vec![(ScancodeEntry::new(0x30), false), (ScancodeEntry::new(0x1E), false)]
        );
    }

    #[tokio::test]
    async fn handshake_parses_the_full_exchange() {
        let input = concat!(
            "6.select,3.rdp;",
            "4.size,3.801,3.600;",
            "5.audio,9.audio/ogg;",
            "5.video;",
            "7.connect,15.desktop.example,0.,0.,0.,0.,0.,0.,0.,0.,0.,0.,0.;",
        );
        let mut reader = input.as_bytes();
        let mut session = session();
        session.handshake(&mut reader).await.unwrap();

        assert_eq!(session.connect_params().hostname, "desktop.example");
        assert_eq!(session.connect_params().width, 804);
        assert_eq!(session.connect_params().height, 600);

        let written = String::from_utf8(session.writer.unwrap().into_inner()).unwrap();
        assert!(written.starts_with("4.args,"));
        assert!(written.contains("8.hostname"));
    }
}
