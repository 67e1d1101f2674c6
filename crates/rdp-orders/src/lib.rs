//! Translation of decoded RDP drawing orders into mutations against a
//! shadow display: ROP3 compositing, cache-populate bookkeeping, and
//! software rasterization for the two order kinds that aren't simple
//! rectangular blits.

pub mod handlers;
pub mod orders;
pub mod rasterize;
pub mod rop3;

pub use handlers::{OrderHandlers, OrderProcessor};
pub use orders::{
    CacheBitmapOrder, CacheBrushOrder, CacheColorTableOrder, CacheGlyphOrder, DstBltOrder,
    GlyphIndexOrder, MemBltOrder, OpaqueRectOrder, PatBltOrder, PointerOrder, PolylineOrder,
    ScrBltOrder,
};
pub use rasterize::{rasterize_glyph_run, rasterize_polyline, GlyphPlacement};
pub use rop3::{apply_composite, apply_composite_buffers, translate_rop3, CompositeMode};
