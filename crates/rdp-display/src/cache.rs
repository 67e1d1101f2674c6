//! The six bounded caches the RDP protocol assumes are pre-populated
//! before any order can reference them.
//!
//! The server negotiates capacity at connection setup and then simply
//! assumes every index it references was previously written; the
//! cache is a passive store, not a policy engine — except for the
//! pointer cache, which is the one table upstream actually evicts
//! (LRU) and substitutes a default image for on miss.

use std::collections::{HashMap, VecDeque};

use rdp_protocol::GatewayError;

pub type CacheId = u16;
pub type EntryId = u32;

/// A raw bitmap as stored in the bitmap cache: pixels plus the
/// dimensions needed to interpret them.
#[derive(Debug, Clone)]
pub struct BitmapEntry {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// A 1-bit glyph mask plus its origin within the destination.
#[derive(Debug, Clone)]
pub struct GlyphEntry {
    pub width: u32,
    pub height: u32,
    pub origin_x: i32,
    pub origin_y: i32,
    pub mask: Vec<u8>,
}

/// An ARGB cursor image plus the hotspot offset.
#[derive(Debug, Clone)]
pub struct PointerEntry {
    pub width: u32,
    pub height: u32,
    pub hotspot_x: i32,
    pub hotspot_y: i32,
    pub pixels: Vec<u32>,
}

/// An 8x8 or 16x16 tiled pattern.
#[derive(Debug, Clone)]
pub struct BrushEntry {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// 256 RGB triples.
pub type Palette = [(u8, u8, u8); 256];

fn zero_palette() -> Palette {
    [(0, 0, 0); 256]
}

/// Upper bound on distinct pointer images retained before the oldest
/// unreferenced one is evicted.
const POINTER_CACHE_CAPACITY: usize = 64;

fn fatal_miss(cache: &str, cache_id: CacheId, entry_id: EntryId) -> GatewayError {
    GatewayError::Protocol(format!(
        "{cache} cache miss: no entry at ({cache_id}, {entry_id})"
    ))
}

/// The six caches a session maintains across its lifetime.
#[derive(Debug, Default)]
pub struct CacheSet {
    bitmap: HashMap<(CacheId, EntryId), BitmapEntry>,
    glyph: HashMap<(CacheId, EntryId), GlyphEntry>,
    pointer: HashMap<EntryId, PointerEntry>,
    pointer_order: VecDeque<EntryId>,
    brush: HashMap<EntryId, BrushEntry>,
    offscreen: HashMap<i32, ()>,
    palette: Option<Palette>,
}

impl CacheSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // --- bitmap: fatal on miss, no eviction ---

    pub fn insert_bitmap(&mut self, cache_id: CacheId, entry_id: EntryId, entry: BitmapEntry) {
        self.bitmap.insert((cache_id, entry_id), entry);
    }

    pub fn get_bitmap(
        &self,
        cache_id: CacheId,
        entry_id: EntryId,
    ) -> Result<&BitmapEntry, GatewayError> {
        self.bitmap
            .get(&(cache_id, entry_id))
            .ok_or_else(|| fatal_miss("bitmap", cache_id, entry_id))
    }

    // --- glyph: fatal on miss, no eviction ---

    pub fn insert_glyph(&mut self, cache_id: CacheId, entry_id: EntryId, entry: GlyphEntry) {
        self.glyph.insert((cache_id, entry_id), entry);
    }

    pub fn get_glyph(
        &self,
        cache_id: CacheId,
        entry_id: EntryId,
    ) -> Result<&GlyphEntry, GatewayError> {
        self.glyph
            .get(&(cache_id, entry_id))
            .ok_or_else(|| fatal_miss("glyph", cache_id, entry_id))
    }

    // --- pointer: single table, LRU on insert, default render on miss ---

    pub fn insert_pointer(&mut self, entry_id: EntryId, entry: PointerEntry) {
        if !self.pointer.contains_key(&entry_id) && self.pointer.len() >= POINTER_CACHE_CAPACITY {
            if let Some(oldest) = self.pointer_order.pop_front() {
                self.pointer.remove(&oldest);
            }
        }
        self.pointer_order.retain(|id| *id != entry_id);
        self.pointer_order.push_back(entry_id);
        self.pointer.insert(entry_id, entry);
    }

    /// Returns the cached pointer, or the built-in default arrow if
    /// this entry was never populated (or was evicted).
    #[must_use]
    pub fn get_pointer_or_default(&self, entry_id: EntryId) -> PointerEntry {
        self.pointer
            .get(&entry_id)
            .cloned()
            .unwrap_or_else(default_pointer)
    }

    // --- brush: fatal on miss, no eviction ---

    pub fn insert_brush(&mut self, entry_id: EntryId, entry: BrushEntry) {
        self.brush.insert(entry_id, entry);
    }

    pub fn get_brush(&self, entry_id: EntryId) -> Result<&BrushEntry, GatewayError> {
        self.brush
            .get(&entry_id)
            .ok_or_else(|| fatal_miss("brush", 0, entry_id))
    }

    // --- offscreen: explicit delete, fatal on miss ---

    pub fn register_offscreen(&mut self, surface_id: i32) {
        self.offscreen.insert(surface_id, ());
    }

    pub fn delete_offscreen(&mut self, surface_id: i32) {
        self.offscreen.remove(&surface_id);
    }

    pub fn check_offscreen(&self, surface_id: i32) -> Result<(), GatewayError> {
        if self.offscreen.contains_key(&surface_id) {
            Ok(())
        } else {
            Err(GatewayError::Protocol(format!(
                "offscreen cache miss: surface {surface_id} was never registered"
            )))
        }
    }

    // --- palette: single slot, overwrite, zero palette on miss ---

    pub fn set_palette(&mut self, palette: Palette) {
        self.palette = Some(palette);
    }

    #[must_use]
    pub fn get_palette(&self) -> Palette {
        self.palette.unwrap_or_else(zero_palette)
    }
}

/// A minimal 1-bit arrow used as the pointer image before any real
/// cursor has been cached, modeled on the driver core's embedded
/// default pointer bitmap.
fn default_pointer() -> PointerEntry {
    const SIZE: u32 = 8;
    let mut pixels = vec![0u32; (SIZE * SIZE) as usize];
    // A simple diagonal arrow silhouette: opaque black along and below
    // the main diagonal, transparent elsewhere.
    for row in 0..SIZE {
        for col in 0..=row.min(SIZE - 1) {
            pixels[(row * SIZE + col) as usize] = 0xFF00_0000;
        }
    }
    PointerEntry { width: SIZE, height: SIZE, hotspot_x: 0, hotspot_y: 0, pixels }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_miss_is_fatal() {
        let cache = CacheSet::new();
        assert!(cache.get_bitmap(0, 1).is_err());
    }

    #[test]
    fn bitmap_hit_after_insert() {
        let mut cache = CacheSet::new();
        cache.insert_bitmap(0, 1, BitmapEntry { width: 2, height: 2, pixels: vec![0; 4] });
        assert!(cache.get_bitmap(0, 1).is_ok());
    }

    #[test]
    fn pointer_miss_renders_default_instead_of_erroring() {
        let cache = CacheSet::new();
        let pointer = cache.get_pointer_or_default(7);
        assert_eq!(pointer.width, 8);
    }

    #[test]
    fn pointer_cache_evicts_oldest_beyond_capacity() {
        let mut cache = CacheSet::new();
        for id in 0..POINTER_CACHE_CAPACITY as u32 {
            cache.insert_pointer(
                id,
                PointerEntry { width: 1, height: 1, hotspot_x: 0, hotspot_y: 0, pixels: vec![0] },
            );
        }
        // Entry 0 is the oldest; one more insert should evict it.
        cache.insert_pointer(
            POINTER_CACHE_CAPACITY as u32,
            PointerEntry { width: 1, height: 1, hotspot_x: 0, hotspot_y: 0, pixels: vec![0] },
        );
        let evicted = cache.get_pointer_or_default(0);
        assert_eq!(evicted.width, 8); // fell back to the default, not the inserted 1x1
    }

    #[test]
    fn offscreen_miss_is_fatal_until_registered() {
        let mut cache = CacheSet::new();
        assert!(cache.check_offscreen(-1).is_err());
        cache.register_offscreen(-1);
        assert!(cache.check_offscreen(-1).is_ok());
        cache.delete_offscreen(-1);
        assert!(cache.check_offscreen(-1).is_err());
    }

    #[test]
    fn palette_defaults_to_zero() {
        let cache = CacheSet::new();
        assert_eq!(cache.get_palette()[0], (0, 0, 0));
    }

    #[test]
    fn palette_overwrites_wholesale() {
        let mut cache = CacheSet::new();
        let mut palette = [(0u8, 0u8, 0u8); 256];
        palette[5] = (10, 20, 30);
        cache.set_palette(palette);
        assert_eq!(cache.get_palette()[5], (10, 20, 30));
    }
}
