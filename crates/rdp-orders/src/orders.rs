//! Decoded-order payloads. These mirror the fields the callback table
//! hands the core once the third-party RDP library has parsed the
//! wire form of each order (MS-RDPEGDI primary drawing orders plus the
//! cache-populate secondary orders); this crate never touches the wire
//! itself.

use rdp_display::cache::{CacheId, EntryId};

/// DSTBLT: a destination-only ROP3 operation. No source pixels are
/// involved — only `BLACK`/`WHITE`/`NOP`/`DSTINVERT`-family ROP3s are
/// meaningful here, but any ROP3 the wire sends is translated the same
/// way as every other order (falling back to `SrcCopy` against the
/// surface's own current pixels, which degrades to a no-op-ish copy).
pub struct DstBltOrder {
    pub surface: i32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub rop3: u8,
}

/// PATBLT: fills a rectangle using a cached brush pattern (or a solid
/// foreground color for a 1x1 "brush"), combined with the destination
/// via ROP3.
pub struct PatBltOrder {
    pub surface: i32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub rop3: u8,
    pub brush_entry: EntryId,
    pub foreground: u32,
}

/// SCRBLT: copies a rectangle from elsewhere on the same surface
/// (on-screen scroll/shift), combined with the destination via ROP3.
pub struct ScrBltOrder {
    pub surface: i32,
    pub src_x: i32,
    pub src_y: i32,
    pub width: i32,
    pub height: i32,
    pub dst_x: i32,
    pub dst_y: i32,
    pub rop3: u8,
}

/// MEMBLT: copies a cached bitmap onto a surface, combined with the
/// destination via ROP3.
pub struct MemBltOrder {
    pub surface: i32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub rop3: u8,
    pub cache_id: CacheId,
    pub cache_index: EntryId,
}

/// OPAQUE RECT: an unconditional solid fill (no ROP3 — always an
/// outright overwrite).
pub struct OpaqueRectOrder {
    pub surface: i32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub color: u32,
}

/// POLYLINE: a sequence of connected line segments in a single color.
pub struct PolylineOrder {
    pub surface: i32,
    pub points: Vec<(i32, i32)>,
    pub color: u32,
}

/// GLYPH INDEX: draws a run of cached 1-bit glyphs left to right,
/// compositing the foreground color through each glyph's mask over an
/// opaque background fill.
pub struct GlyphIndexOrder {
    pub surface: i32,
    pub x: i32,
    pub y: i32,
    pub background_x: i32,
    pub background_y: i32,
    pub background_width: i32,
    pub background_height: i32,
    pub cache_id: CacheId,
    pub glyph_ids: Vec<EntryId>,
    pub foreground: u32,
    pub background: u32,
}

/// CACHE BITMAP secondary order: populates the bitmap cache.
pub struct CacheBitmapOrder {
    pub cache_id: CacheId,
    pub cache_index: EntryId,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// CACHE GLYPH secondary order: populates the glyph cache.
pub struct CacheGlyphOrder {
    pub cache_id: CacheId,
    pub cache_index: EntryId,
    pub width: u32,
    pub height: u32,
    pub origin_x: i32,
    pub origin_y: i32,
    pub mask: Vec<u8>,
}

/// CACHE BRUSH secondary order: populates the brush cache.
pub struct CacheBrushOrder {
    pub cache_index: EntryId,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// CACHE COLOR TABLE secondary order: populates the palette.
pub struct CacheColorTableOrder {
    pub entries: [(u8, u8, u8); 256],
}

/// POINTER (NEW/CACHED/COLOR) updates: populates the pointer cache
/// and/or selects the active cursor image.
pub struct PointerOrder {
    pub cache_index: EntryId,
    pub width: u32,
    pub height: u32,
    pub hotspot_x: i32,
    pub hotspot_y: i32,
    pub pixels: Vec<u32>,
}
