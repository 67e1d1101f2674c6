//! Aggregation of surfaces into a composed display: the layer tree,
//! z-ordering, offscreen buffer bookkeeping, and the shared cursor
//! state.

use std::collections::HashMap;

use rdp_protocol::GatewayError;

use crate::cache::CacheSet;
use crate::surface::{Surface, SurfaceDelta};

/// Identifier of the root surface. Always present, never destroyed.
pub const ROOT_ID: i32 = 0;

struct LayerMeta {
    /// `None` only for the root. Positive-id layers always have a
    /// parent (root or another layer); offscreen buffers have none —
    /// they are not part of the composition tree.
    parent: Option<i32>,
    x: i32,
    y: i32,
    z: i32,
    opacity: u8,
}

/// What a flushed layer contributed to this frame.
pub struct LayerFlush {
    pub id: i32,
    pub delta: SurfaceDelta,
}

/// A structural change to the layer tree, queued as it happens and
/// drained by the next [`Display::flush`]. Pixel content changes are
/// carried by [`LayerFlush`] instead; this is everything a client needs
/// to keep its own copy of the tree (not the pixels) in sync.
#[derive(Debug, Clone, Copy)]
pub enum LayerEvent {
    Created { id: i32, parent: i32, x: i32, y: i32, z: i32, width: i32, height: i32 },
    Moved { id: i32, parent: i32, x: i32, y: i32, z: i32 },
    Shaded { id: i32, opacity: u8 },
    Resized { id: i32, width: i32, height: i32 },
    Disposed { id: i32 },
}

/// How a layer left the display: a composed layer issues a `dispose`,
/// an offscreen buffer issues a clear-to-transparent so its slot can
/// be reused.
pub enum DestroyKind {
    DisposeLayer,
    ClearOffscreen,
}

#[derive(Debug, Clone)]
pub struct CursorDelta {
    pub pixels: Vec<u32>,
    pub width: u32,
    pub height: u32,
    pub hotspot_x: i32,
    pub hotspot_y: i32,
}

struct CursorState {
    image: CursorDelta,
    dirty: bool,
}

/// Everything produced by one [`Display::flush`].
pub struct DisplayFlush {
    /// Parents always precede their children; siblings are ordered by
    /// ascending z, ties broken by id.
    pub layers: Vec<LayerFlush>,
    pub cursor: Option<CursorDelta>,
    /// Structural tree changes since the last flush, in the order they
    /// occurred.
    pub events: Vec<LayerEvent>,
}

pub struct Display {
    surfaces: HashMap<i32, Surface>,
    meta: HashMap<i32, LayerMeta>,
    next_layer_id: i32,
    next_offscreen_id: i32,
    cache: CacheSet,
    cursor: Option<CursorState>,
    events: Vec<LayerEvent>,
}

impl Display {
    #[must_use]
    pub fn new(width: i32, height: i32) -> Self {
        let mut surfaces = HashMap::new();
        surfaces.insert(ROOT_ID, Surface::new(ROOT_ID, width, height));
        let mut meta = HashMap::new();
        meta.insert(ROOT_ID, LayerMeta { parent: None, x: 0, y: 0, z: 0, opacity: 255 });

        Self {
            surfaces,
            meta,
            next_layer_id: 1,
            next_offscreen_id: -1,
            cache: CacheSet::new(),
            cursor: None,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &CacheSet {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut CacheSet {
        &mut self.cache
    }

    #[must_use]
    pub fn surface(&self, id: i32) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    pub fn surface_mut(&mut self, id: i32) -> Option<&mut Surface> {
        self.surfaces.get_mut(&id)
    }

    /// Create a new composed layer. Positive ids are assigned in
    /// increasing order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BadArgument`] if `parent` does not name
    /// an existing layer (or the root).
    pub fn create_layer(
        &mut self,
        parent: i32,
        x: i32,
        y: i32,
        z: i32,
        width: i32,
        height: i32,
        opacity: u8,
    ) -> Result<i32, GatewayError> {
        if !self.meta.contains_key(&parent) {
            return Err(GatewayError::BadArgument(format!(
                "create_layer: parent {parent} does not exist"
            )));
        }

        let id = self.next_layer_id;
        self.next_layer_id += 1;

        self.surfaces.insert(id, Surface::new(id, width, height));
        self.meta.insert(id, LayerMeta { parent: Some(parent), x, y, z, opacity });
        self.events.push(LayerEvent::Created { id, parent, x, y, z, width, height });
        Ok(id)
    }

    /// Allocate an offscreen buffer (a negative id, not part of the
    /// composition tree) and register it with the cache set.
    pub fn create_offscreen(&mut self, width: i32, height: i32) -> i32 {
        let id = self.next_offscreen_id;
        self.next_offscreen_id -= 1;
        self.surfaces.insert(id, Surface::new(id, width, height));
        self.cache.register_offscreen(id);
        id
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::BadArgument`] for the root id, or
    /// [`GatewayError::Protocol`] for an id that was never allocated.
    pub fn destroy_layer(&mut self, id: i32) -> Result<DestroyKind, GatewayError> {
        if id == ROOT_ID {
            return Err(GatewayError::BadArgument("the root surface cannot be destroyed".into()));
        }
        if !self.surfaces.contains_key(&id) {
            return Err(GatewayError::Protocol(format!("destroy of unknown surface {id}")));
        }

        self.surfaces.remove(&id);
        self.meta.remove(&id);

        if id < 0 {
            self.cache.delete_offscreen(id);
            Ok(DestroyKind::ClearOffscreen)
        } else {
            self.events.push(LayerEvent::Disposed { id });
            Ok(DestroyKind::DisposeLayer)
        }
    }

    /// Move a layer to a new parent/position/z. Rejects any move that
    /// would introduce a cycle in the parent chain.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BadArgument`] for the root id, an
    /// unknown target parent, or a cycle, and
    /// [`GatewayError::Protocol`] for an unknown `id`.
    pub fn move_layer(
        &mut self,
        id: i32,
        new_parent: i32,
        x: i32,
        y: i32,
        z: i32,
    ) -> Result<(), GatewayError> {
        if id == ROOT_ID {
            return Err(GatewayError::BadArgument("the root surface cannot be moved".into()));
        }
        if !self.meta.contains_key(&id) {
            return Err(GatewayError::Protocol(format!("move of unknown layer {id}")));
        }
        if !self.meta.contains_key(&new_parent) {
            return Err(GatewayError::BadArgument(format!(
                "move to unknown parent {new_parent}"
            )));
        }

        let mut cursor = Some(new_parent);
        while let Some(current) = cursor {
            if current == id {
                return Err(GatewayError::BadArgument(format!(
                    "move of {id} under {new_parent} would create a cycle"
                )));
            }
            cursor = self.meta.get(&current).and_then(|m| m.parent);
        }

        let meta = self.meta.get_mut(&id).expect("checked above");
        meta.parent = Some(new_parent);
        meta.x = x;
        meta.y = y;
        meta.z = z;
        self.events.push(LayerEvent::Moved { id, parent: new_parent, x, y, z });
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] for an unknown `id`.
    pub fn set_opacity(&mut self, id: i32, opacity: u8) -> Result<(), GatewayError> {
        self.meta
            .get_mut(&id)
            .ok_or_else(|| GatewayError::Protocol(format!("set_opacity of unknown layer {id}")))?
            .opacity = opacity;
        self.events.push(LayerEvent::Shaded { id, opacity });
        Ok(())
    }

    #[must_use]
    pub fn opacity(&self, id: i32) -> Option<u8> {
        self.meta.get(&id).map(|m| m.opacity)
    }

    #[must_use]
    pub fn position(&self, id: i32) -> Option<(i32, i32, i32)> {
        self.meta.get(&id).map(|m| (m.x, m.y, m.z))
    }

    #[must_use]
    pub fn parent(&self, id: i32) -> Option<i32> {
        self.meta.get(&id).and_then(|m| m.parent)
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] for an unknown `id`, or
    /// whatever [`Surface::resize`] returns for invalid dimensions.
    pub fn resize_layer(&mut self, id: i32, width: i32, height: i32) -> Result<(), GatewayError> {
        self.surfaces
            .get_mut(&id)
            .ok_or_else(|| GatewayError::Protocol(format!("resize of unknown surface {id}")))?
            .resize(width, height)?;
        self.events.push(LayerEvent::Resized { id, width, height });
        Ok(())
    }

    pub fn set_cursor(
        &mut self,
        pixels: Vec<u32>,
        width: u32,
        height: u32,
        hotspot_x: i32,
        hotspot_y: i32,
    ) {
        self.cursor = Some(CursorState {
            image: CursorDelta { pixels, width, height, hotspot_x, hotspot_y },
            dirty: true,
        });
    }

    /// The composed layer tree in the order a client must see it
    /// created: parents always precede their children, siblings
    /// ordered by ascending z (ties broken by id). Does not include
    /// offscreen buffers, which are never part of the visible
    /// composition.
    #[must_use]
    pub fn composition_order(&self) -> Vec<i32> {
        let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
        for (&id, meta) in &self.meta {
            if let Some(parent) = meta.parent {
                children.entry(parent).or_default().push(id);
            }
        }
        for list in children.values_mut() {
            list.sort_by_key(|id| (self.meta[id].z, *id));
        }

        let mut order = Vec::new();
        Self::preorder(ROOT_ID, &children, &mut order);
        order
    }

    /// The current pointer image, if one has ever been set, without
    /// consuming its dirty flag. Used to replay the cursor to a
    /// client that joins mid-session.
    #[must_use]
    pub fn cursor_snapshot(&self) -> Option<CursorDelta> {
        self.cursor.as_ref().map(|state| state.image.clone())
    }

    /// Flush every dirty surface, in an order where parents always
    /// precede their children, siblings ordered by ascending z (ties
    /// broken by id). Offscreen buffers (not part of the composition
    /// tree) are flushed after the visible layer tree in id order.
    pub fn flush(&mut self) -> DisplayFlush {
        let mut order = self.composition_order();

        let mut offscreen_ids: Vec<i32> =
            self.surfaces.keys().copied().filter(|id| *id < 0).collect();
        offscreen_ids.sort_unstable();
        order.extend(offscreen_ids);

        let mut layers = Vec::new();
        for id in order {
            if let Some(surface) = self.surfaces.get_mut(&id) {
                if let Some(delta) = surface.flush() {
                    layers.push(LayerFlush { id, delta });
                }
            }
        }

        let cursor = self.cursor.as_mut().and_then(|state| {
            if state.dirty {
                state.dirty = false;
                Some(state.image.clone())
            } else {
                None
            }
        });

        let events = std::mem::take(&mut self.events);

        DisplayFlush { layers, cursor, events }
    }

    fn preorder(id: i32, children: &HashMap<i32, Vec<i32>>, out: &mut Vec<i32>) {
        out.push(id);
        if let Some(kids) = children.get(&id) {
            for &kid in kids {
                Self::preorder(kid, children, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_exists_from_construction_and_cannot_be_destroyed() {
        let mut display = Display::new(1024, 768);
        assert!(display.surface(ROOT_ID).is_some());
        assert!(display.destroy_layer(ROOT_ID).is_err());
    }

    #[test]
    fn create_layer_rejects_unknown_parent() {
        let mut display = Display::new(800, 600);
        assert!(display.create_layer(42, 0, 0, 1, 100, 100, 255).is_err());
    }

    #[test]
    fn move_detects_cycles() {
        let mut display = Display::new(800, 600);
        let a = display.create_layer(ROOT_ID, 0, 0, 1, 50, 50, 255).unwrap();
        let b = display.create_layer(a, 0, 0, 1, 50, 50, 255).unwrap();
        // Moving `a` under its own child `b` would create a cycle.
        assert!(display.move_layer(a, b, 0, 0, 1).is_err());
    }

    #[test]
    fn flush_orders_parents_before_children() {
        let mut display = Display::new(800, 600);
        let parent = display.create_layer(ROOT_ID, 0, 0, 1, 50, 50, 255).unwrap();
        let child = display.create_layer(parent, 0, 0, 1, 20, 20, 255).unwrap();

        display.surface_mut(parent).unwrap().set_rect(0, 0, 10, 10, 0xFF00_00FF);
        display.surface_mut(child).unwrap().set_rect(0, 0, 5, 5, 0xFF00_FF00);

        let flush = display.flush();
        let parent_pos = flush.layers.iter().position(|l| l.id == parent).unwrap();
        let child_pos = flush.layers.iter().position(|l| l.id == child).unwrap();
        assert!(parent_pos < child_pos);
    }

    #[test]
    fn flush_drains_structural_events_since_the_last_flush() {
        let mut display = Display::new(800, 600);
        let layer = display.create_layer(ROOT_ID, 0, 0, 1, 20, 20, 255).unwrap();
        display.set_opacity(layer, 128).unwrap();

        let flush = display.flush();
        assert_eq!(flush.events.len(), 2);
        assert!(matches!(flush.events[0], LayerEvent::Created { id, .. } if id == layer));
        assert!(matches!(flush.events[1], LayerEvent::Shaded { id, opacity: 128 } if id == layer));

        // events don't recur on the next flush once drained
        assert!(display.flush().events.is_empty());
    }

    #[test]
    fn destroy_layer_reports_dispose_for_positive_ids_and_clear_for_offscreen() {
        let mut display = Display::new(800, 600);
        let layer = display.create_layer(ROOT_ID, 0, 0, 1, 20, 20, 255).unwrap();
        let offscreen = display.create_offscreen(20, 20);

        assert!(matches!(display.destroy_layer(layer).unwrap(), DestroyKind::DisposeLayer));
        assert!(matches!(
            display.destroy_layer(offscreen).unwrap(),
            DestroyKind::ClearOffscreen
        ));
    }

    #[test]
    fn composition_order_excludes_offscreen_and_orders_parent_before_child() {
        let mut display = Display::new(800, 600);
        let parent = display.create_layer(ROOT_ID, 0, 0, 1, 50, 50, 255).unwrap();
        let child = display.create_layer(parent, 0, 0, 1, 20, 20, 255).unwrap();
        let offscreen = display.create_offscreen(20, 20);

        let order = display.composition_order();
        assert!(!order.contains(&offscreen));
        let parent_pos = order.iter().position(|id| *id == parent).unwrap();
        let child_pos = order.iter().position(|id| *id == child).unwrap();
        assert!(parent_pos < child_pos);
    }

    #[test]
    fn cursor_snapshot_does_not_consume_dirty_flag() {
        let mut display = Display::new(800, 600);
        display.set_cursor(vec![0xFFFF_FFFF; 4], 2, 2, 0, 0);

        assert!(display.cursor_snapshot().is_some());
        let flush = display.flush();
        // the normal flush-dirty handshake is untouched by snapshotting
        assert!(flush.cursor.is_some());
    }

    #[test]
    fn cursor_is_reported_once_then_not_again_until_changed() {
        let mut display = Display::new(800, 600);
        display.set_cursor(vec![0xFFFF_FFFF; 4], 2, 2, 0, 0);

        let first = display.flush();
        assert!(first.cursor.is_some());

        let second = display.flush();
        assert!(second.cursor.is_none());
    }
}
