//! A dirty-tracked pixel buffer: the unit that accumulates drawing
//! primitives and reduces them to the minimum outbound update.

use std::collections::VecDeque;

use rdp_protocol::GatewayError;

use crate::rect::{Intersection, Rect};

/// Where a queued copy reads its source pixels from.
#[derive(Debug, Clone)]
pub enum CopySource {
    /// Read from this same surface's buffer, as it stands when the
    /// queue entry is processed at flush time (so chained scrolls see
    /// each other's effects in order).
    SameSurface,
    /// A snapshot of another surface's pixels, captured at the time
    /// `copy_rect` was called.
    External { pixels: Vec<u32>, width: i32 },
}

#[derive(Debug, Clone)]
struct QueuedCopy {
    source: CopySource,
    sx: i32,
    sy: i32,
    width: i32,
    height: i32,
    dx: i32,
    dy: i32,
}

/// One copy that survived to be emitted as a `copy` wire primitive
/// rather than folded into the image update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyDelta {
    pub src: Rect,
    pub dest_x: i32,
    pub dest_y: i32,
}

/// What a [`Surface::flush`] produced: at most one image update and
/// zero or more copy primitives.
#[derive(Debug, Default)]
pub struct SurfaceDelta {
    pub image: Option<(Rect, Vec<u32>)>,
    pub copies: Vec<CopyDelta>,
}

impl SurfaceDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.copies.is_empty()
    }
}

const DEFAULT_COPY_QUEUE_CAPACITY: usize = 256;
const DEFAULT_GRID_CELL_SIZE: i32 = 64;

pub struct Surface {
    id: i32,
    width: i32,
    height: i32,
    pixels: Vec<u32>,
    bounds: Option<Rect>,
    image_dirty: Option<Rect>,
    copy_queue: VecDeque<QueuedCopy>,
    grid_cell_size: i32,
}

impl Surface {
    #[must_use]
    pub fn new(id: i32, width: i32, height: i32) -> Self {
        Self {
            id,
            width,
            height,
            pixels: vec![0; (width.max(0) as usize) * (height.max(0) as usize)],
            bounds: None,
            image_dirty: None,
            copy_queue: VecDeque::new(),
            grid_cell_size: DEFAULT_GRID_CELL_SIZE,
        }
    }

    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    #[must_use]
    pub fn width(&self) -> i32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> i32 {
        self.height
    }

    #[must_use]
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.image_dirty.is_some() || !self.copy_queue.is_empty()
    }

    #[must_use]
    fn full_rect(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    fn extend_dirty(&mut self, rect: Rect) {
        match &mut self.image_dirty {
            Some(d) => d.extend(&rect),
            None => self.image_dirty = Some(rect),
        }
    }

    /// Clip `rect` to the current bounds (if any) and then to the
    /// surface's own extents. Returns `None` if nothing of `rect`
    /// survives — callers treat that as a no-op.
    fn clip_to_operating_area(&self, rect: Rect) -> Option<Rect> {
        let area = self.bounds.unwrap_or_else(|| self.full_rect());
        let within_bounds = clip_to_bounds(rect, &area)?;
        clip_to_bounds(within_bounds, &self.full_rect())
    }

    /// Sets a clip rectangle applied to all subsequent operations
    /// until cleared with `None`.
    pub fn set_bounds(&mut self, bounds: Option<Rect>) {
        self.bounds = bounds;
    }

    pub fn set_rect(&mut self, x: i32, y: i32, width: i32, height: i32, rgba: u32) {
        let Some(clipped) = self.clip_to_operating_area(Rect::new(x, y, width, height)) else {
            return;
        };
        self.fill(&clipped, rgba);
        self.extend_dirty(clipped);
    }

    fn fill(&mut self, rect: &Rect, rgba: u32) {
        for row in 0..rect.height {
            let start = (((rect.y + row) * self.width) + rect.x) as usize;
            let end = start + rect.width as usize;
            self.pixels[start..end].fill(rgba);
        }
    }

    /// Blit an external image at `(x, y)`. `src` is `src_width *
    /// src_height` pixels, tightly packed (row-major, no padding).
    pub fn draw_image(&mut self, x: i32, y: i32, src: &[u32], src_width: i32, src_height: i32) {
        let Some(clipped) = self.clip_to_operating_area(Rect::new(x, y, src_width, src_height))
        else {
            return;
        };
        let off_x = clipped.x - x;
        let off_y = clipped.y - y;
        for row in 0..clipped.height {
            let src_start = (((off_y + row) * src_width) + off_x) as usize;
            let dst_start = (((clipped.y + row) * self.width) + clipped.x) as usize;
            let w = clipped.width as usize;
            self.pixels[dst_start..dst_start + w].copy_from_slice(&src[src_start..src_start + w]);
        }
        self.extend_dirty(clipped);
    }

    /// Queue a copy of a `width x height` region from `source` onto
    /// this surface at `(dx, dy)`. Not applied to pixel memory until
    /// [`Surface::flush`].
    pub fn copy_rect(
        &mut self,
        source: CopySource,
        sx: i32,
        sy: i32,
        width: i32,
        height: i32,
        dx: i32,
        dy: i32,
    ) {
        if matches!(source, CopySource::SameSurface) && sx == dx && sy == dy {
            return; // identity copy: no-op, mutates nothing
        }

        let Some(clipped_dest) = self.clip_to_operating_area(Rect::new(dx, dy, width, height))
        else {
            return;
        };

        let off_x = clipped_dest.x - dx;
        let off_y = clipped_dest.y - dy;

        self.enqueue_copy(QueuedCopy {
            source,
            sx: sx + off_x,
            sy: sy + off_y,
            width: clipped_dest.width,
            height: clipped_dest.height,
            dx: clipped_dest.x,
            dy: clipped_dest.y,
        });
    }

    fn enqueue_copy(&mut self, entry: QueuedCopy) {
        self.copy_queue.push_back(entry);
        while self.copy_queue.len() > DEFAULT_COPY_QUEUE_CAPACITY {
            if let Some(oldest) = self.copy_queue.pop_front() {
                self.materialize_eagerly(oldest);
            }
        }
    }

    /// Apply an overflowed queue entry straight to pixel memory and
    /// fold its destination into the raster-dirty rect, since it no
    /// longer has a chance to be emitted as a `copy` primitive.
    fn materialize_eagerly(&mut self, entry: QueuedCopy) {
        let pixels = self.sample_source(&entry);
        self.blit(entry.dx, entry.dy, entry.width, entry.height, &pixels);
        self.extend_dirty(Rect::new(entry.dx, entry.dy, entry.width, entry.height));
    }

    fn sample_source(&self, entry: &QueuedCopy) -> Vec<u32> {
        match &entry.source {
            CopySource::SameSurface => self.sample(entry.sx, entry.sy, entry.width, entry.height),
            CopySource::External { pixels, width } => {
                sample_buffer(pixels, *width, entry.sx, entry.sy, entry.width, entry.height)
            }
        }
    }

    fn sample(&self, x: i32, y: i32, width: i32, height: i32) -> Vec<u32> {
        sample_buffer(&self.pixels, self.width, x, y, width, height)
    }

    /// Read back a region's current pixels, clamped to the surface's
    /// own extents (not to `bounds`). Order handlers that combine a
    /// ROP3-derived compositing mode with existing destination pixels
    /// (DSTINVERT, SRCPAINT) need this; ordinary drawing never does.
    #[must_use]
    pub fn read_rect(&self, x: i32, y: i32, width: i32, height: i32) -> Vec<u32> {
        let Some(clipped) = clip_to_bounds(Rect::new(x, y, width, height), &self.full_rect())
        else {
            return Vec::new();
        };
        self.sample(clipped.x, clipped.y, clipped.width, clipped.height)
    }

    fn blit(&mut self, x: i32, y: i32, width: i32, height: i32, src: &[u32]) {
        for row in 0..height {
            let dst_start = (((y + row) * self.width) + x) as usize;
            let src_start = (row * width) as usize;
            let w = width as usize;
            self.pixels[dst_start..dst_start + w].copy_from_slice(&src[src_start..src_start + w]);
        }
    }

    /// Resize the surface. Contents outside the new rectangle are
    /// discarded; the whole new area is marked dirty since the client
    /// must re-synchronize to the new dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BadArgument`] for a non-positive width
    /// or height.
    pub fn resize(&mut self, width: i32, height: i32) -> Result<(), GatewayError> {
        if width <= 0 || height <= 0 {
            return Err(GatewayError::BadArgument(format!(
                "resize to non-positive dimensions {width}x{height}"
            )));
        }

        let mut new_pixels = vec![0u32; (width * height) as usize];
        let copy_w = width.min(self.width) as usize;
        let copy_h = height.min(self.height);
        for row in 0..copy_h {
            let src_start = (row * self.width) as usize;
            let dst_start = (row * width) as usize;
            new_pixels[dst_start..dst_start + copy_w]
                .copy_from_slice(&self.pixels[src_start..src_start + copy_w]);
        }

        self.pixels = new_pixels;
        self.width = width;
        self.height = height;
        self.copy_queue.clear();
        self.image_dirty = Some(Rect::new(0, 0, width, height));
        if let Some(bounds) = &mut self.bounds {
            bounds.constrain(&Rect::new(0, 0, width, height));
        }
        Ok(())
    }

    /// Drain pending mutations into the minimal set of primitives
    /// needed to replicate them, applying the intersecting-copy
    /// downgrade rule as the queue is processed. Returns `None` if
    /// nothing was dirty.
    pub fn flush(&mut self) -> Option<SurfaceDelta> {
        if self.image_dirty.is_none() && self.copy_queue.is_empty() {
            return None;
        }

        let mut touched = self.image_dirty;
        let mut image_dirty = self.image_dirty;
        let mut copies = Vec::new();

        while let Some(entry) = self.copy_queue.pop_front() {
            let src_rect = Rect::new(entry.sx, entry.sy, entry.width, entry.height);
            let overlaps_earlier_change = touched
                .map(|t| t.intersects(&src_rect) != Intersection::None)
                .unwrap_or(false);

            let pixels = self.sample_source(&entry);
            self.blit(entry.dx, entry.dy, entry.width, entry.height, &pixels);

            let dest_rect = Rect::new(entry.dx, entry.dy, entry.width, entry.height);
            touched = Some(extend(touched, dest_rect));

            if overlaps_earlier_change {
                image_dirty = Some(extend(image_dirty, dest_rect));
            } else {
                copies.push(CopyDelta { src: src_rect, dest_x: entry.dx, dest_y: entry.dy });
            }
        }

        let image = image_dirty.map(|mut rect| {
            rect.expand_to_grid(self.grid_cell_size, &self.full_rect());
            rect.constrain(&self.full_rect());
            let pixels = self.sample(rect.x, rect.y, rect.width, rect.height);
            (rect, pixels)
        });

        self.image_dirty = None;
        Some(SurfaceDelta { image, copies })
    }
}

fn extend(existing: Option<Rect>, addition: Rect) -> Rect {
    match existing {
        Some(mut rect) => {
            rect.extend(&addition);
            rect
        }
        None => addition,
    }
}

/// Clip `rect` against `bounds` using the clip-split algorithm,
/// iterating until nothing left to split off. Returns `None` if
/// `rect` doesn't intersect `bounds` at all.
fn clip_to_bounds(rect: Rect, bounds: &Rect) -> Option<Rect> {
    match rect.intersects(bounds) {
        Intersection::None => None,
        Intersection::Complete => Some(rect),
        Intersection::Partial => {
            let mut remaining = rect;
            loop {
                if remaining.clip_and_split(bounds).is_none() {
                    return Some(remaining);
                }
            }
        }
    }
}

fn sample_buffer(buf: &[u32], stride: i32, x: i32, y: i32, width: i32, height: i32) -> Vec<u32> {
    let mut out = Vec::with_capacity((width * height).max(0) as usize);
    for row in 0..height {
        let start = (((y + row) * stride) + x) as usize;
        out.extend_from_slice(&buf[start..start + width as usize]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_with_no_mutations_returns_none() {
        let mut surface = Surface::new(0, 100, 100);
        assert!(surface.flush().is_none());
    }

    #[test]
    fn read_rect_clamps_to_surface_extents() {
        let mut surface = Surface::new(0, 4, 4);
        surface.set_rect(0, 0, 4, 4, 0xFF11_2233);
        let pixels = surface.read_rect(0, 0, 10, 10);
        assert_eq!(pixels.len(), 16);
        assert_eq!(pixels[0], 0xFF11_2233);
    }

    #[test]
    fn read_rect_outside_surface_is_empty() {
        let surface = Surface::new(0, 4, 4);
        assert!(surface.read_rect(100, 100, 10, 10).is_empty());
    }

    #[test]
    fn simple_fill_produces_one_image_delta() {
        let mut surface = Surface::new(0, 1024, 768);
        surface.set_rect(100, 100, 200, 200, 0xFFFF_0000);
        assert!(surface.is_dirty());

        let delta = surface.flush().unwrap();
        assert!(delta.copies.is_empty());
        let (rect, _pixels) = delta.image.unwrap();
        // grid-snapped to 64px, so the emitted rect is a superset of
        // the requested 100,100,200,200 region.
        assert!(rect.x <= 100 && rect.y <= 100);
        assert!(rect.right() >= 300 && rect.bottom() >= 300);
        assert!(!surface.is_dirty());
    }

    #[test]
    fn flush_clears_dirty_state() {
        let mut surface = Surface::new(0, 100, 100);
        surface.set_rect(0, 0, 10, 10, 0xFF00_00FF);
        surface.flush();
        assert!(!surface.is_dirty());
        assert!(surface.flush().is_none());
    }

    #[test]
    fn identity_copy_is_a_no_op() {
        let mut surface = Surface::new(0, 100, 100);
        surface.set_rect(0, 0, 50, 50, 0xFFAA_AAAA);
        surface.flush();

        surface.copy_rect(CopySource::SameSurface, 10, 10, 20, 20, 10, 10);
        assert!(!surface.is_dirty());
    }

    #[test]
    fn disjoint_copy_emits_copy_primitive_not_image() {
        let mut surface = Surface::new(0, 200, 200);
        surface.set_rect(150, 150, 10, 10, 0xFF12_3456);
        surface.flush(); // clears dirty state from the initial fill

        surface.copy_rect(CopySource::SameSurface, 150, 150, 10, 10, 0, 0);
        let delta = surface.flush().unwrap();
        assert_eq!(delta.copies.len(), 1);
        assert!(delta.image.is_none());
    }

    #[test]
    fn overlapping_copy_of_freshly_dirtied_source_downgrades_to_image() {
        let mut surface = Surface::new(0, 200, 200);
        surface.set_rect(0, 0, 100, 100, 0xFF00_00FF);
        surface.copy_rect(CopySource::SameSurface, 0, 0, 100, 100, 50, 50);

        let delta = surface.flush().unwrap();
        assert!(delta.copies.is_empty(), "overlap with this-frame dirty source must downgrade");
        assert!(delta.image.is_some());
    }

    #[test]
    fn set_rect_wholly_outside_bounds_is_a_no_op() {
        let mut surface = Surface::new(0, 100, 100);
        surface.set_bounds(Some(Rect::new(0, 0, 50, 50)));
        surface.set_rect(60, 60, 10, 10, 0xFFFF_FFFF);
        assert!(!surface.is_dirty());
    }

    #[test]
    fn resize_rejects_non_positive_dimensions() {
        let mut surface = Surface::new(0, 100, 100);
        assert!(surface.resize(0, 50).is_err());
        assert!(surface.resize(50, 0).is_err());
    }

    #[test]
    fn resize_preserves_overlapping_pixels() {
        let mut surface = Surface::new(0, 4, 4);
        surface.set_rect(0, 0, 4, 4, 0xFF00_00FF);
        surface.flush();
        surface.resize(2, 2).unwrap();
        assert_eq!(surface.pixels()[0], 0xFF00_00FF);
    }
}
