//! Native collision shapes: building, ownership, caching and persistence

pub mod builder;
pub mod cache;
pub mod handle;
pub mod store;

pub use builder::{build_collision_shape, part_count};
pub use cache::{ShapeCache, ShapeCacheStats};
pub use handle::{BodyHandle, ShapeHandle};
pub use store::{FileShapeStore, MemoryShapeStore, PersistentShapeStore};
