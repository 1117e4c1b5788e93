//! Collaborator seams: world data, physics engine, body registry

use crate::chunk::ChunkKey;
use crate::error::Result;
use crate::shape::BodyHandle;
use crate::snapshot::ChunkSnapshot;
use crate::tracker::TrackedBody;
use glam::Vec3;
use rapier3d::prelude::SharedShape;

/// Authoritative voxel data. Only ever called on the thread that owns it.
pub trait WorldSource {
    /// Capture the collidable voxels of one chunk.
    ///
    /// `None` means the region is not available yet (not generated, not
    /// loaded); the chunk falls back to `Unloaded` and is retried later.
    fn capture_snapshot(&mut self, key: ChunkKey) -> Option<ChunkSnapshot>;
}

/// Physics engine mutations. Only ever called on the physics thread.
pub trait PhysicsBackend {
    /// Create a fixed body at `origin` carrying `shape`, outside the active
    /// simulation.
    fn create_static_body(&mut self, shape: SharedShape, origin: Vec3) -> Result<BodyHandle>;

    /// Destroy a body and its colliders. Consumes the handle.
    fn destroy_body(&mut self, body: BodyHandle);

    /// Replace the collision shape of an existing body
    fn swap_shape(&mut self, body: &BodyHandle, shape: SharedShape) -> Result<()>;

    fn add_to_simulation(&mut self, body: &BodyHandle);

    fn remove_from_simulation(&mut self, body: &BodyHandle);

    fn is_added(&self, body: &BodyHandle) -> bool;
}

/// Source of the moving bodies the tracker follows
pub trait BodyRegistry {
    fn all_tracked_bodies(&self) -> Vec<TrackedBody>;
}
