//! Immutable chunk snapshots
//!
//! A snapshot is what the world thread hands to the rest of the pipeline: a
//! dense occupancy bitset for one chunk plus the materials of non-empty
//! voxels. Once built it never changes and can be moved to any thread.

use crate::chunk::{ChunkKey, CHUNK_SIZE, CHUNK_VOLUME};
use glam::IVec3;
use sha2::{Digest, Sha256};
use std::fmt;

const WORDS: usize = CHUNK_VOLUME / 64;

/// Order-independent hash of a snapshot's collidable occupancy
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ContentHash(pub u64);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One non-empty voxel as reported by the world
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Voxel {
    pub material: u16,
    pub collidable: bool,
}

impl Voxel {
    pub fn solid(material: u16) -> Self {
        Self {
            material,
            collidable: true,
        }
    }

    /// A voxel with a material but no collision (foliage, fluids, ...)
    pub fn passable(material: u16) -> Self {
        Self {
            material,
            collidable: false,
        }
    }
}

/// Linear voxel index: x fastest, then z, then y
#[inline]
pub fn voxel_index(x: usize, y: usize, z: usize) -> usize {
    x + CHUNK_SIZE as usize * (z + CHUNK_SIZE as usize * y)
}

#[inline]
fn in_chunk(local: IVec3) -> bool {
    local.cmpge(IVec3::ZERO).all() && local.cmplt(IVec3::splat(CHUNK_SIZE)).all()
}

/// Captured collidable voxels of one chunk
#[derive(Clone)]
pub struct ChunkSnapshot {
    key: ChunkKey,
    occupancy: [u64; WORDS],
    /// (voxel index, material), sorted by index
    materials: Vec<(u16, u16)>,
    collidable_count: u32,
    hash: ContentHash,
}

impl ChunkSnapshot {
    pub fn builder(key: ChunkKey) -> SnapshotBuilder {
        SnapshotBuilder::new(key)
    }

    /// Snapshot with no voxels at all
    pub fn empty(key: ChunkKey) -> Self {
        SnapshotBuilder::new(key).build()
    }

    /// Snapshot with every voxel solid
    pub fn solid(key: ChunkKey, material: u16) -> Self {
        Self::from_fn(key, |_| Some(Voxel::solid(material)))
    }

    /// Build by sampling every local position in scan order
    pub fn from_fn(key: ChunkKey, mut sample: impl FnMut(IVec3) -> Option<Voxel>) -> Self {
        let mut builder = SnapshotBuilder::new(key);
        for y in 0..CHUNK_SIZE {
            for z in 0..CHUNK_SIZE {
                for x in 0..CHUNK_SIZE {
                    let local = IVec3::new(x, y, z);
                    if let Some(voxel) = sample(local) {
                        builder.set(local, voxel);
                    }
                }
            }
        }
        builder.build()
    }

    pub fn key(&self) -> ChunkKey {
        self.key
    }

    /// Whether the voxel at local coordinates blocks movement.
    /// Coordinates must be below `CHUNK_SIZE`.
    #[inline]
    pub(crate) fn is_collidable(&self, x: usize, y: usize, z: usize) -> bool {
        let size = CHUNK_SIZE as usize;
        debug_assert!(x < size && y < size && z < size, "({x}, {y}, {z}) outside chunk");
        let index = voxel_index(x, y, z);
        self.occupancy[index / 64] & (1 << (index % 64)) != 0
    }

    /// Material of a non-empty voxel at local coordinates
    pub fn material_at(&self, local: IVec3) -> Option<u16> {
        if !in_chunk(local) {
            return None;
        }
        let index = voxel_index(local.x as usize, local.y as usize, local.z as usize) as u16;
        self.materials
            .binary_search_by_key(&index, |&(i, _)| i)
            .ok()
            .map(|pos| self.materials[pos].1)
    }

    /// Number of collidable voxels
    pub fn collidable_count(&self) -> usize {
        self.collidable_count as usize
    }

    /// No collidable voxels
    pub fn is_empty(&self) -> bool {
        self.collidable_count == 0
    }

    /// Every voxel collidable
    pub fn is_full(&self) -> bool {
        self.collidable_count as usize == CHUNK_VOLUME
    }

    /// Hash of the collidable occupancy, independent of position and of the
    /// order voxels were inserted in
    pub fn content_hash(&self) -> ContentHash {
        self.hash
    }

    pub(crate) fn occupancy(&self) -> &[u64; WORDS] {
        &self.occupancy
    }
}

impl fmt::Debug for ChunkSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSnapshot")
            .field("key", &self.key)
            .field("collidable", &self.collidable_count)
            .field("materials", &self.materials.len())
            .field("hash", &self.hash)
            .finish()
    }
}

/// Accumulates voxels in any order, then freezes them into a snapshot
pub struct SnapshotBuilder {
    key: ChunkKey,
    occupancy: [u64; WORDS],
    materials: Vec<(u16, u16)>,
}

impl SnapshotBuilder {
    pub fn new(key: ChunkKey) -> Self {
        Self {
            key,
            occupancy: [0; WORDS],
            materials: Vec::new(),
        }
    }

    /// Record a voxel at local coordinates. Out-of-chunk positions are ignored.
    pub fn set(&mut self, local: IVec3, voxel: Voxel) -> &mut Self {
        if !in_chunk(local) {
            tracing::trace!("ignoring voxel {local} outside chunk {}", self.key);
            return self;
        }
        let index = voxel_index(local.x as usize, local.y as usize, local.z as usize);
        let bit = 1u64 << (index % 64);
        if voxel.collidable {
            self.occupancy[index / 64] |= bit;
        } else {
            self.occupancy[index / 64] &= !bit;
        }
        self.materials.push((index as u16, voxel.material));
        self
    }

    /// Record a voxel at world voxel coordinates
    pub fn set_world(&mut self, pos: IVec3, voxel: Voxel) -> &mut Self {
        let local = pos - self.key.voxel_origin();
        self.set(local, voxel)
    }

    pub fn build(mut self) -> ChunkSnapshot {
        // Last write wins for duplicate positions; sort_by_key is stable.
        self.materials.sort_by_key(|&(i, _)| i);
        let mut deduped: Vec<(u16, u16)> = Vec::with_capacity(self.materials.len());
        for entry in self.materials {
            match deduped.last_mut() {
                Some(last) if last.0 == entry.0 => *last = entry,
                _ => deduped.push(entry),
            }
        }

        let collidable_count = self.occupancy.iter().map(|w| w.count_ones()).sum();
        let hash = hash_occupancy(&self.occupancy);

        ChunkSnapshot {
            key: self.key,
            occupancy: self.occupancy,
            materials: deduped,
            collidable_count,
            hash,
        }
    }
}

/// SHA-256 over the bitset words in index order, truncated to 64 bits.
///
/// The bitset is the canonical sorted form of the voxel set, so the hash does
/// not depend on how the snapshot was assembled.
fn hash_occupancy(occupancy: &[u64; WORDS]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update((CHUNK_SIZE as u32).to_le_bytes());
    for word in occupancy {
        hasher.update(word.to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    ContentHash(u64::from_le_bytes(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(key: ChunkKey) -> ChunkSnapshot {
        ChunkSnapshot::from_fn(key, |p| ((p.x + p.y + p.z) % 2 == 0).then(|| Voxel::solid(1)))
    }

    #[test]
    fn test_empty_and_solid() {
        let empty = ChunkSnapshot::empty(ChunkKey::new(0, 0, 0));
        let solid = ChunkSnapshot::solid(ChunkKey::new(0, 0, 0), 3);

        assert!(empty.is_empty());
        assert!(!empty.is_full());
        assert!(solid.is_full());
        assert_eq!(solid.collidable_count(), CHUNK_VOLUME);
        assert_eq!(solid.material_at(IVec3::new(15, 15, 15)), Some(3));
        assert_ne!(empty.content_hash(), solid.content_hash());
    }

    #[test]
    fn test_hash_independent_of_position() {
        let a = checkerboard(ChunkKey::new(0, 0, 0));
        let b = checkerboard(ChunkKey::new(-40, 3, 900));
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_hash_independent_of_insertion_order() {
        let key = ChunkKey::new(1, 2, 3);
        let mut positions: Vec<IVec3> = (0..200)
            .map(|i| IVec3::new(i % 16, (i / 16) % 16, (i * 7) % 16))
            .collect();

        let mut forward = SnapshotBuilder::new(key);
        for &p in &positions {
            forward.set(p, Voxel::solid(2));
        }

        positions.reverse();
        positions.rotate_left(37);
        let mut shuffled = SnapshotBuilder::new(key);
        for &p in &positions {
            shuffled.set(p, Voxel::solid(2));
        }

        assert_eq!(forward.build().content_hash(), shuffled.build().content_hash());
    }

    #[test]
    fn test_hash_ignores_material() {
        let key = ChunkKey::new(0, 0, 0);
        let stone = ChunkSnapshot::from_fn(key, |p| (p.y < 4).then(|| Voxel::solid(1)));
        let dirt = ChunkSnapshot::from_fn(key, |p| (p.y < 4).then(|| Voxel::solid(2)));
        assert_eq!(stone.content_hash(), dirt.content_hash());
    }

    #[test]
    fn test_passable_voxels_not_collidable() {
        let key = ChunkKey::new(0, 0, 0);
        let mut builder = SnapshotBuilder::new(key);
        builder.set(IVec3::new(1, 1, 1), Voxel::passable(9));
        let snapshot = builder.build();

        assert!(snapshot.is_empty());
        assert!(!snapshot.is_collidable(1, 1, 1));
        assert_eq!(snapshot.material_at(IVec3::new(1, 1, 1)), Some(9));
    }

    #[test]
    fn test_last_write_wins() {
        let key = ChunkKey::new(0, 0, 0);
        let mut builder = SnapshotBuilder::new(key);
        builder
            .set(IVec3::new(2, 3, 4), Voxel::solid(1))
            .set(IVec3::new(2, 3, 4), Voxel::passable(5));
        let snapshot = builder.build();

        assert!(!snapshot.is_collidable(2, 3, 4));
        assert_eq!(snapshot.material_at(IVec3::new(2, 3, 4)), Some(5));
    }

    #[test]
    fn test_set_world_and_out_of_range() {
        let key = ChunkKey::new(-1, 0, 0);
        let mut builder = SnapshotBuilder::new(key);
        builder.set_world(IVec3::new(-1, 0, 0), Voxel::solid(1));
        builder.set(IVec3::new(16, 0, 0), Voxel::solid(1));
        let snapshot = builder.build();

        assert_eq!(snapshot.collidable_count(), 1);
        assert!(snapshot.is_collidable(15, 0, 0));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside chunk")]
    fn test_is_collidable_rejects_out_of_chunk_coordinates() {
        let snapshot = ChunkSnapshot::solid(ChunkKey::new(0, 0, 0), 1);
        snapshot.is_collidable(16, 0, 0);
    }
}
