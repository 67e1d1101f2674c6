//! The shadow display model: dirty-tracked surfaces, the six bounded
//! caches the RDP protocol assumes are pre-populated, and the layer
//! tree that composes them into one output.

pub mod cache;
pub mod display;
pub mod rect;
pub mod surface;

pub use cache::CacheSet;
pub use display::{CursorDelta, Display, DisplayFlush, DestroyKind, LayerEvent, LayerFlush, ROOT_ID};
pub use rect::{Intersection, Rect};
pub use surface::{CopyDelta, CopySource, Surface, SurfaceDelta};
