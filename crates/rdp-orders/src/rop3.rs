//! Ternary raster-op (ROP3) translation.
//!
//! RDP drawing orders carry a raw ROP3 byte — one of 256 possible
//! boolean functions of pattern, source, and destination pixels. The
//! shadow display doesn't implement arbitrary boolean compositing; it
//! implements the small set of modes the original driver core actually
//! produces on the wire, and maps every ROP3 value onto the closest of
//! those (falling back to `SrcCopy` for anything with no direct
//! equivalent, as spec'd).

/// The compositing modes the display protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// Fill with opaque black, ignoring both operands.
    Black,
    /// Fill with opaque white, ignoring both operands.
    White,
    /// Destination is left unchanged.
    NoOp,
    /// Destination bits are inverted.
    DstInvert,
    /// Destination takes the source (or pattern) value outright.
    SrcCopy,
    /// Destination is OR'd with the source.
    SrcPaint,
    /// Destination takes the brush pattern outright.
    PatCopy,
}

/// Translate a ROP3 byte to the closest [`CompositeMode`], logging at
/// debug level whenever the byte has no exact mapping and a
/// `SrcCopy` fallback is used.
///
/// Two values (`0x5A`, `0xA5`) are left as undefined upstream behavior
/// per the source material this is ported from; they fall through to
/// the same `SrcCopy` fallback as any other unmapped byte, and are not
/// logged differently.
#[must_use]
pub fn translate_rop3(rop3: u8) -> CompositeMode {
    match rop3 {
        0x00 => CompositeMode::Black,
        0x55 => CompositeMode::DstInvert,
        0xAA => CompositeMode::NoOp,
        0xCC => CompositeMode::SrcCopy,
        0xEE => CompositeMode::SrcPaint,
        0xF0 => CompositeMode::PatCopy,
        0xFF => CompositeMode::White,
        other => {
            tracing::debug!(rop3 = format!("{other:#04x}"), "unmapped ROP3, falling back to SRCCOPY");
            CompositeMode::SrcCopy
        }
    }
}

/// Apply `mode` to one pixel. `other` is the source pixel for
/// `SrcCopy`/`SrcPaint`, or the brush pattern pixel for `PatCopy`;
/// it's ignored by the modes that don't need it.
#[must_use]
pub fn apply_composite(mode: CompositeMode, dest: u32, other: u32) -> u32 {
    match mode {
        CompositeMode::Black => 0xFF00_0000,
        CompositeMode::White => 0xFFFF_FFFF,
        CompositeMode::NoOp => dest,
        CompositeMode::DstInvert => dest ^ 0x00FF_FFFF,
        CompositeMode::SrcCopy | CompositeMode::PatCopy => other,
        CompositeMode::SrcPaint => dest | other,
    }
}

/// Apply `mode` across two equal-length pixel buffers (destination,
/// other-operand), returning the composited result.
#[must_use]
pub fn apply_composite_buffers(mode: CompositeMode, dest: &[u32], other: &[u32]) -> Vec<u32> {
    dest.iter()
        .zip(other.iter())
        .map(|(&d, &o)| apply_composite(mode, d, o))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_values_map_exactly() {
        assert_eq!(translate_rop3(0x00), CompositeMode::Black);
        assert_eq!(translate_rop3(0x55), CompositeMode::DstInvert);
        assert_eq!(translate_rop3(0xAA), CompositeMode::NoOp);
        assert_eq!(translate_rop3(0xCC), CompositeMode::SrcCopy);
        assert_eq!(translate_rop3(0xEE), CompositeMode::SrcPaint);
        assert_eq!(translate_rop3(0xF0), CompositeMode::PatCopy);
        assert_eq!(translate_rop3(0xFF), CompositeMode::White);
    }

    #[test]
    fn unmapped_value_falls_back_to_srccopy() {
        assert_eq!(translate_rop3(0x37), CompositeMode::SrcCopy);
    }

    #[test]
    fn undefined_behavior_values_also_fall_back_to_srccopy() {
        assert_eq!(translate_rop3(0x5A), CompositeMode::SrcCopy);
        assert_eq!(translate_rop3(0xA5), CompositeMode::SrcCopy);
    }

    #[test]
    fn dst_invert_flips_rgb_but_not_alpha() {
        let result = apply_composite(CompositeMode::DstInvert, 0xFF00_00FF, 0);
        assert_eq!(result, 0xFFFF_FF00);
    }

    #[test]
    fn black_and_white_ignore_both_operands() {
        assert_eq!(apply_composite(CompositeMode::Black, 0xFFFF_FFFF, 0xFFFF_FFFF), 0xFF00_0000);
        assert_eq!(apply_composite(CompositeMode::White, 0, 0), 0xFFFF_FFFF);
    }

    #[test]
    fn src_paint_ors_channels() {
        let result = apply_composite(CompositeMode::SrcPaint, 0xFF0F_0F0F, 0xFFF0_F0F0);
        assert_eq!(result, 0xFFFF_FFFF);
    }
}
