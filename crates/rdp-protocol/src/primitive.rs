//! Outbound and inbound instruction payloads.
//!
//! [`Primitive`] covers the opcodes this core ever emits (§6 of the
//! spec this protocol implements: `size`, `move`, `shade`, `dispose`,
//! `rect`, `cfill`, `lfill`, `copy`, `png`, `cursor`, `sync`, `error`,
//! `args`, `name`, `log`, `blob`, `end`). [`InboundInstruction`] covers
//! the opcodes it ever receives (`select`, `size`, `audio`, `video`,
//! `connect`, `mouse`, `key`, `clipboard`, `disconnect`).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{ErrorCode, GatewayError};

/// The ternary compositing channel an operation writes through.
///
/// Named after the two channels the driver core actually uses:
/// `Src` replaces destination pixels outright (used when clearing a
/// buffer slot to transparent on destroy), `Over` alpha-composites
/// (the default for ordinary drawing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composite {
    Src,
    Over,
}

impl Composite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Src => "src",
            Self::Over => "over",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// An outbound instruction destined for the thin client.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Size { layer: i32, width: i32, height: i32 },
    Move { layer: i32, parent: i32, x: i32, y: i32, z: i32 },
    Shade { layer: i32, opacity: u8 },
    Dispose { layer: i32 },
    Rect { layer: i32, x: i32, y: i32, width: i32, height: i32 },
    Cfill { composite: Composite, layer: i32, r: u8, g: u8, b: u8, a: u8 },
    Lfill { composite: Composite, layer: i32, fill_layer: i32 },
    Copy {
        src_layer: i32,
        sx: i32,
        sy: i32,
        width: i32,
        height: i32,
        composite: Composite,
        dst_layer: i32,
        dx: i32,
        dy: i32,
    },
    Png { composite: Composite, layer: i32, x: i32, y: i32, data_base64: String },
    Cursor { hot_x: i32, hot_y: i32, data_base64: String },
    Sync { timestamp_ms: u64 },
    Error { message: String, code: ErrorCode },
    Args { names: Vec<String> },
    Name { session_name: String },
    Log { level: LogLevel, message: String },
    Blob { stream: i32, data_base64: String },
    End { stream: i32 },
}

impl Primitive {
    /// Render this primitive as `[opcode, arg1, arg2, ...]`, ready for
    /// [`crate::framing::encode_instruction`].
    #[must_use]
    pub fn to_fields(&self) -> Vec<String> {
        match self {
            Self::Size { layer, width, height } => {
                fields(["size", &layer.to_string(), &width.to_string(), &height.to_string()])
            }
            Self::Move { layer, parent, x, y, z } => fields([
                "move",
                &layer.to_string(),
                &parent.to_string(),
                &x.to_string(),
                &y.to_string(),
                &z.to_string(),
            ]),
            Self::Shade { layer, opacity } => {
                fields(["shade", &layer.to_string(), &opacity.to_string()])
            }
            Self::Dispose { layer } => fields(["dispose", &layer.to_string()]),
            Self::Rect { layer, x, y, width, height } => fields([
                "rect",
                &layer.to_string(),
                &x.to_string(),
                &y.to_string(),
                &width.to_string(),
                &height.to_string(),
            ]),
            Self::Cfill { composite, layer, r, g, b, a } => fields([
                "cfill",
                composite.as_str(),
                &layer.to_string(),
                &r.to_string(),
                &g.to_string(),
                &b.to_string(),
                &a.to_string(),
            ]),
            Self::Lfill { composite, layer, fill_layer } => fields([
                "lfill",
                composite.as_str(),
                &layer.to_string(),
                &fill_layer.to_string(),
            ]),
            Self::Copy { src_layer, sx, sy, width, height, composite, dst_layer, dx, dy } => {
                fields([
                    "copy",
                    &src_layer.to_string(),
                    &sx.to_string(),
                    &sy.to_string(),
                    &width.to_string(),
                    &height.to_string(),
                    composite.as_str(),
                    &dst_layer.to_string(),
                    &dx.to_string(),
                    &dy.to_string(),
                ])
            }
            Self::Png { composite, layer, x, y, data_base64 } => fields([
                "png",
                composite.as_str(),
                &layer.to_string(),
                &x.to_string(),
                &y.to_string(),
                data_base64,
            ]),
            Self::Cursor { hot_x, hot_y, data_base64 } => {
                fields(["cursor", &hot_x.to_string(), &hot_y.to_string(), data_base64])
            }
            Self::Sync { timestamp_ms } => fields(["sync", &timestamp_ms.to_string()]),
            Self::Error { message, code } => {
                fields(["error", message, &code.0.to_string()])
            }
            Self::Args { names } => {
                let mut v = vec!["args".to_string()];
                v.extend(names.iter().cloned());
                v
            }
            Self::Name { session_name } => fields(["name", session_name]),
            Self::Log { level, message } => fields(["log", level.as_str(), message]),
            Self::Blob { stream, data_base64 } => {
                fields(["blob", &stream.to_string(), data_base64])
            }
            Self::End { stream } => fields(["end", &stream.to_string()]),
        }
    }
}

fn fields<const N: usize>(values: [&str; N]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

/// PNG-encode an RGBA buffer and base64-wrap it for inline embedding in
/// a `png`/`cursor` instruction.
///
/// # Errors
///
/// Returns [`GatewayError::ResourceExhausted`] if the buffer does not
/// match `width * height * 4` bytes, or [`GatewayError::Protocol`] if
/// the PNG encoder itself fails.
pub fn encode_png_base64(width: u32, height: u32, rgba: &[u8]) -> Result<String, GatewayError> {
    let expected = (width as usize) * (height as usize) * 4;
    if rgba.len() != expected {
        return Err(GatewayError::ResourceExhausted(format!(
            "png source buffer is {} bytes, expected {expected}",
            rgba.len()
        )));
    }

    let mut buf = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buf, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| GatewayError::Protocol(format!("png header: {e}")))?;
        writer
            .write_image_data(rgba)
            .map_err(|e| GatewayError::Protocol(format!("png data: {e}")))?;
    }

    Ok(BASE64.encode(buf))
}

/// An inbound instruction received from the thin client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundInstruction {
    Select { protocol: String },
    Size { width: u16, height: u16 },
    Audio { mimetypes: Vec<String> },
    Video { mimetypes: Vec<String> },
    Connect { params: Vec<String> },
    Mouse { x: i32, y: i32, mask: u8 },
    Key { keysym: u32, pressed: bool },
    Clipboard { data: String },
    Disconnect,
}

impl InboundInstruction {
    /// Parse a decoded field list (opcode first) into a typed
    /// instruction.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] for an unrecognized opcode or
    /// a malformed argument.
    pub fn from_fields(fields: &[String]) -> Result<Self, GatewayError> {
        let [opcode, args @ ..] = fields else {
            return Err(GatewayError::Protocol("empty instruction".to_string()));
        };

        match opcode.as_str() {
            "select" => {
                let protocol = arg(args, 0, "select")?.clone();
                Ok(Self::Select { protocol })
            }
            "size" => Ok(Self::Size {
                width: parse_arg(args, 0, "size.width")?,
                height: parse_arg(args, 1, "size.height")?,
            }),
            "audio" => Ok(Self::Audio { mimetypes: args.to_vec() }),
            "video" => Ok(Self::Video { mimetypes: args.to_vec() }),
            "connect" => Ok(Self::Connect { params: args.to_vec() }),
            "mouse" => Ok(Self::Mouse {
                x: parse_arg(args, 0, "mouse.x")?,
                y: parse_arg(args, 1, "mouse.y")?,
                mask: parse_arg(args, 2, "mouse.mask")?,
            }),
            "key" => {
                let keysym: u32 = parse_hex_or_dec(arg(args, 0, "key.keysym")?)?;
                let pressed_raw: u8 = parse_arg(args, 1, "key.pressed")?;
                Ok(Self::Key { keysym, pressed: pressed_raw != 0 })
            }
            "clipboard" => Ok(Self::Clipboard { data: arg(args, 0, "clipboard.data")?.clone() }),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(GatewayError::Protocol(format!("unrecognized opcode: {other}"))),
        }
    }
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a String, GatewayError> {
    args.get(index)
        .ok_or_else(|| GatewayError::Protocol(format!("missing argument: {what}")))
}

fn parse_arg<T: std::str::FromStr>(
    args: &[String],
    index: usize,
    what: &str,
) -> Result<T, GatewayError> {
    arg(args, index, what)?
        .parse()
        .map_err(|_| GatewayError::Protocol(format!("malformed argument: {what}")))
}

fn parse_hex_or_dec(s: &str) -> Result<u32, GatewayError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
            .map_err(|_| GatewayError::Protocol(format!("malformed keysym: {s}")))
    } else {
        s.parse()
            .map_err(|_| GatewayError::Protocol(format!("malformed keysym: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_fields_round_trip_values() {
        let p = Primitive::Rect { layer: 0, x: 100, y: 100, width: 200, height: 200 };
        assert_eq!(p.to_fields(), vec!["rect", "0", "100", "100", "200", "200"]);
    }

    #[test]
    fn cfill_encodes_composite_as_name() {
        let p = Primitive::Cfill {
            composite: Composite::Src,
            layer: 0,
            r: 255,
            g: 0,
            b: 0,
            a: 255,
        };
        assert_eq!(p.to_fields(), vec!["cfill", "src", "0", "255", "0", "0", "255"]);
    }

    #[test]
    fn mouse_instruction_parses() {
        let fields = vec!["mouse".to_string(), "12".to_string(), "34".to_string(), "5".to_string()];
        assert_eq!(
            InboundInstruction::from_fields(&fields).unwrap(),
            InboundInstruction::Mouse { x: 12, y: 34, mask: 5 }
        );
    }

    #[test]
    fn key_instruction_parses_hex_keysym() {
        let fields = vec!["key".to_string(), "0xFFE5".to_string(), "1".to_string()];
        assert_eq!(
            InboundInstruction::from_fields(&fields).unwrap(),
            InboundInstruction::Key { keysym: 0xFFE5, pressed: true }
        );
    }

    #[test]
    fn unknown_opcode_is_a_protocol_error() {
        let fields = vec!["bogus".to_string()];
        assert!(InboundInstruction::from_fields(&fields).is_err());
    }

    #[test]
    fn png_roundtrips_dimensions() {
        let rgba = vec![0u8; 4 * 4 * 4];
        let encoded = encode_png_base64(4, 4, &rgba).unwrap();
        assert!(!encoded.is_empty());
    }

    #[test]
    fn png_rejects_mismatched_buffer() {
        let rgba = vec![0u8; 3];
        assert!(encode_png_base64(4, 4, &rgba).is_err());
    }
}
