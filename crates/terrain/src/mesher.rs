//! Greedy box meshing of chunk occupancy
//!
//! Collision does not need faces, only solid volume, so instead of a surface
//! mesh the mesher merges collidable voxels into axis-aligned boxes. The
//! merge is greedy (x, then y, then z) and not a minimal cover, but it is
//! deterministic: identical occupancy always yields the identical box list.

use crate::chunk::{CHUNK_SIZE, CHUNK_VOLUME};
use crate::snapshot::{voxel_index, ChunkSnapshot, ContentHash};
use glam::Vec3;
use serde::{Deserialize, Serialize};

const N: usize = CHUNK_SIZE as usize;

/// Axis-aligned box in chunk-local voxel units
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct ShapeBox {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl ShapeBox {
    /// Box covering voxels `min .. min + size`
    pub fn from_voxel_run(min: [usize; 3], size: [usize; 3]) -> Self {
        let min = Vec3::new(min[0] as f32, min[1] as f32, min[2] as f32);
        let half_extents = Vec3::new(size[0] as f32, size[1] as f32, size[2] as f32) * 0.5;
        Self {
            center: min + half_extents,
            half_extents,
        }
    }

    /// Number of voxels covered
    pub fn volume(&self) -> f32 {
        let size = self.half_extents * 2.0;
        size.x * size.y * size.z
    }

    /// Finite with strictly positive extents
    pub fn is_well_formed(&self) -> bool {
        self.center.is_finite()
            && self.half_extents.is_finite()
            && self.half_extents.cmpgt(Vec3::ZERO).all()
    }
}

/// Box list for one chunk's content
#[derive(Clone, PartialEq, Debug)]
pub struct GeneratedShape {
    pub boxes: Vec<ShapeBox>,
    pub content_hash: ContentHash,
}

impl GeneratedShape {
    pub fn box_count(&self) -> usize {
        self.boxes.len()
    }
}

/// Greedy run-length box merger
pub struct GreedyMesher;

impl GreedyMesher {
    /// Mesh a snapshot. Returns `None` when nothing is collidable.
    pub fn mesh(snapshot: &ChunkSnapshot) -> Option<GeneratedShape> {
        if snapshot.is_empty() {
            return None;
        }

        let content_hash = snapshot.content_hash();
        if snapshot.is_full() {
            return Some(GeneratedShape {
                boxes: vec![ShapeBox::from_voxel_run([0, 0, 0], [N, N, N])],
                content_hash,
            });
        }

        let solid = |x: usize, y: usize, z: usize| snapshot.is_collidable(x, y, z);
        let mut visited = vec![false; CHUNK_VOLUME];
        let mut boxes = Vec::new();

        for y in 0..N {
            for z in 0..N {
                for x in 0..N {
                    if visited[voxel_index(x, y, z)] || !solid(x, y, z) {
                        continue;
                    }

                    let open = |x: usize, y: usize, z: usize, visited: &[bool]| {
                        solid(x, y, z) && !visited[voxel_index(x, y, z)]
                    };

                    // Extend along x
                    let mut width = 1;
                    while x + width < N && open(x + width, y, z, &visited) {
                        width += 1;
                    }

                    // Extend along y while the whole x-run stays open
                    let mut height = 1;
                    while y + height < N
                        && (x..x + width).all(|xx| open(xx, y + height, z, &visited))
                    {
                        height += 1;
                    }

                    // Extend along z while the whole x*y rectangle stays open
                    let mut depth = 1;
                    while z + depth < N
                        && (y..y + height).all(|yy| {
                            (x..x + width).all(|xx| open(xx, yy, z + depth, &visited))
                        })
                    {
                        depth += 1;
                    }

                    for yy in y..y + height {
                        for zz in z..z + depth {
                            for xx in x..x + width {
                                visited[voxel_index(xx, yy, zz)] = true;
                            }
                        }
                    }

                    boxes.push(ShapeBox::from_voxel_run([x, y, z], [width, height, depth]));
                }
            }
        }

        tracing::trace!(
            "meshed {} collidable voxels of {} into {} boxes",
            snapshot.collidable_count(),
            snapshot.key(),
            boxes.len()
        );

        Some(GeneratedShape {
            boxes,
            content_hash,
        })
    }
}
