//! Single-owner handles for native physics resources
//!
//! Neither handle is `Clone`. A record holds at most one of each; replacing
//! a shape hands back the old one, and a body can only be destroyed by moving
//! its handle into [`crate::PhysicsBackend::destroy_body`].

use crate::snapshot::ContentHash;
use rapier3d::prelude::{RigidBodyHandle, SharedShape};
use std::fmt;

/// Owned reference to a built collision shape
///
/// The underlying rapier shape is reference counted and may also be held by
/// the [`crate::ShapeCache`]. Dropping the handle releases this owner's
/// reference exactly once.
pub struct ShapeHandle {
    shape: SharedShape,
    hash: ContentHash,
}

impl ShapeHandle {
    pub fn new(shape: SharedShape, hash: ContentHash) -> Self {
        Self { shape, hash }
    }

    /// Content hash of the voxels this shape was built from
    pub fn content_hash(&self) -> ContentHash {
        self.hash
    }
}

impl fmt::Debug for ShapeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeHandle")
            .field("hash", &self.hash)
            .field("shape_type", &self.shape.shape_type())
            .finish()
    }
}

/// Owned static body in the physics engine
#[must_use = "a body handle must be passed to destroy_body or stored"]
#[derive(Debug, PartialEq, Eq)]
pub struct BodyHandle(RigidBodyHandle);

impl BodyHandle {
    pub fn from_rapier(handle: RigidBodyHandle) -> Self {
        Self(handle)
    }

    /// The raw rapier handle, for lookups in the body set
    pub fn rapier(&self) -> RigidBodyHandle {
        self.0
    }
}
