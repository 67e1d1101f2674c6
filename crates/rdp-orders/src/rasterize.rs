//! Software rasterization for the two order kinds that don't reduce
//! to a rectangular blit: polylines (thin connected line segments) and
//! glyph runs (1-bit masks composited through a foreground color).

use rdp_display::Rect;

/// Render a connected polyline into a dense painted-mask covering its
/// bounding box, returning the mask alongside the box it covers.
/// Callers combine the result with the destination's existing pixels
/// before calling [`Surface::draw_image`] (a `true` cell means "paint
/// the stroke color here", a `false` cell means "leave the destination
/// pixel untouched" — a pixel-value sentinel can't carry that
/// distinction because the stroke color itself may legitimately be
/// any value, transparent black included). Each segment is drawn with
/// integer Bresenham.
#[must_use]
pub fn rasterize_polyline(points: &[(i32, i32)]) -> Option<(Rect, Vec<bool>)> {
    if points.len() < 2 {
        return None;
    }

    let min_x = points.iter().map(|p| p.0).min()?;
    let min_y = points.iter().map(|p| p.1).min()?;
    let max_x = points.iter().map(|p| p.0).max()?;
    let max_y = points.iter().map(|p| p.1).max()?;
    let width = max_x - min_x + 1;
    let height = max_y - min_y + 1;
    if width <= 0 || height <= 0 {
        return None;
    }

    let mut mask = vec![false; (width * height) as usize];
    let mut plot = |x: i32, y: i32| {
        let (lx, ly) = (x - min_x, y - min_y);
        if lx >= 0 && ly >= 0 && lx < width && ly < height {
            mask[(ly * width + lx) as usize] = true;
        }
    };

    for pair in points.windows(2) {
        bresenham(pair[0], pair[1], &mut plot);
    }

    Some((Rect::new(min_x, min_y, width, height), mask))
}

fn bresenham((x0, y0): (i32, i32), (x1, y1): (i32, i32), plot: &mut impl FnMut(i32, i32)) {
    let (mut x, mut y) = (x0, y0);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        plot(x, y);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Composite a run of 1-bit glyph masks, laid out left to right
/// starting at the origin, over a `background`-filled canvas the size
/// of `(width, height)`. Each glyph's own `(origin_x, origin_y)` is
/// relative to its own top-left corner within the run, and a set mask
/// bit paints `foreground`.
#[must_use]
pub fn rasterize_glyph_run(
    width: i32,
    height: i32,
    background: u32,
    foreground: u32,
    glyphs: &[GlyphPlacement<'_>],
) -> Vec<u32> {
    let mut buffer = vec![background; (width.max(0) * height.max(0)) as usize];

    for glyph in glyphs {
        let stride = (glyph.width as usize).div_ceil(8);
        for row in 0..glyph.height as i32 {
            for col in 0..glyph.width as i32 {
                let byte = glyph.mask[(row as usize) * stride + (col as usize / 8)];
                let bit_set = byte & (0x80 >> (col % 8)) != 0;
                if !bit_set {
                    continue;
                }
                let px = glyph.pen_x + glyph.origin_x + col;
                let py = glyph.pen_y + glyph.origin_y + row;
                if px >= 0 && py >= 0 && px < width && py < height {
                    buffer[(py * width + px) as usize] = foreground;
                }
            }
        }
    }

    buffer
}

/// One glyph's mask plus where its pen position lands within the run
/// being rasterized.
pub struct GlyphPlacement<'a> {
    pub mask: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub origin_x: i32,
    pub origin_y: i32,
    pub pen_x: i32,
    pub pen_y: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment_covers_its_bounding_box() {
        let (rect, mask) = rasterize_polyline(&[(0, 0), (3, 0)]).unwrap();
        assert_eq!(rect, Rect::new(0, 0, 4, 1));
        assert!(mask.iter().all(|&painted| painted));
    }

    #[test]
    fn fewer_than_two_points_produces_nothing() {
        assert!(rasterize_polyline(&[(0, 0)]).is_none());
    }

    #[test]
    fn diagonal_segment_stays_within_bounds() {
        let (rect, mask) = rasterize_polyline(&[(0, 0), (2, 2)]).unwrap();
        assert_eq!(rect, Rect::new(0, 0, 3, 3));
        assert_eq!(mask.len(), 9);
    }

    #[test]
    fn zero_value_color_is_not_mistaken_for_unpainted() {
        // A stroke color of 0 (transparent black) must still be
        // distinguishable from an unpainted cell; the mask carries
        // that distinction instead of the pixel value.
        let (_, mask) = rasterize_polyline(&[(0, 0), (1, 0)]).unwrap();
        assert_eq!(mask, vec![true, true]);
    }

    #[test]
    fn glyph_run_paints_foreground_where_mask_bit_is_set() {
        // 1x1 glyph, single set bit.
        let glyph = GlyphPlacement {
            mask: &[0x80],
            width: 1,
            height: 1,
            origin_x: 0,
            origin_y: 0,
            pen_x: 0,
            pen_y: 0,
        };
        let buffer = rasterize_glyph_run(1, 1, 0xFF00_0000, 0xFFFF_FFFF, &[glyph]);
        assert_eq!(buffer, vec![0xFFFF_FFFF]);
    }

    #[test]
    fn glyph_run_leaves_unset_bits_as_background() {
        let glyph = GlyphPlacement {
            mask: &[0x00],
            width: 1,
            height: 1,
            origin_x: 0,
            origin_y: 0,
            pen_x: 0,
            pen_y: 0,
        };
        let buffer = rasterize_glyph_run(1, 1, 0xFF00_0000, 0xFFFF_FFFF, &[glyph]);
        assert_eq!(buffer, vec![0xFF00_0000]);
    }
}
