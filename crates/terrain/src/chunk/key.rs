//! Chunk identification and packing
//!
//! A chunk is a 16³ cube of voxels addressed by its integer section
//! coordinates. Keys pack into a single `u64` for hashing and for passing
//! through channels.

use glam::{IVec3, Vec3};
use std::fmt;

/// Edge length of a chunk in voxels
pub const CHUNK_SIZE: i32 = 16;

/// Number of voxels in one chunk
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;

/// Identifies a chunk by section coordinates
///
/// # Bit Layout
/// Bits: [x:22][z:22][y:20]
/// - x, z: 22 bits each, signed (-2^21 .. 2^21)
/// - y: 20 bits, signed (-2^19 .. 2^19)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ChunkKey {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkKey {
    const X_SHIFT: u32 = 42;
    const Z_SHIFT: u32 = 20;
    const XZ_MASK: u64 = (1 << 22) - 1;
    const Y_MASK: u64 = (1 << 20) - 1;

    /// Largest |x| / |z| that packs losslessly
    pub const HORIZONTAL_LIMIT: i32 = 1 << 21;
    /// Largest |y| that packs losslessly
    pub const VERTICAL_LIMIT: i32 = 1 << 19;

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn as_ivec3(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    /// Whether the key lies inside the losslessly packable range
    pub fn is_packable(&self) -> bool {
        (-Self::HORIZONTAL_LIMIT..Self::HORIZONTAL_LIMIT).contains(&self.x)
            && (-Self::HORIZONTAL_LIMIT..Self::HORIZONTAL_LIMIT).contains(&self.z)
            && (-Self::VERTICAL_LIMIT..Self::VERTICAL_LIMIT).contains(&self.y)
    }

    /// Pack into a single integer
    ///
    /// # Panics
    /// Debug-panics if the key is outside the packable range
    pub fn pack(&self) -> u64 {
        debug_assert!(self.is_packable(), "chunk key {self} out of packable range");

        ((self.x as i64 as u64 & Self::XZ_MASK) << Self::X_SHIFT)
            | ((self.z as i64 as u64 & Self::XZ_MASK) << Self::Z_SHIFT)
            | (self.y as i64 as u64 & Self::Y_MASK)
    }

    /// Inverse of [`ChunkKey::pack`]
    pub fn unpack(packed: u64) -> Self {
        // Shift each field to the top of the word, then arithmetic-shift back
        // down to sign-extend it.
        let x = (packed as i64) >> Self::X_SHIFT;
        let z = ((packed << 22) as i64) >> 42;
        let y = ((packed << 44) as i64) >> 44;
        Self::new(x as i32, y as i32, z as i32)
    }

    /// Chunk containing a voxel position
    pub fn from_voxel(pos: IVec3) -> Self {
        Self::new(
            pos.x.div_euclid(CHUNK_SIZE),
            pos.y.div_euclid(CHUNK_SIZE),
            pos.z.div_euclid(CHUNK_SIZE),
        )
    }

    /// Chunk containing a world-space point
    ///
    /// Non-finite or huge coordinates saturate; callers filter those first.
    pub fn from_world(pos: Vec3) -> Self {
        let c = (pos / CHUNK_SIZE as f32).floor();
        Self::new(c.x as i32, c.y as i32, c.z as i32)
    }

    /// World-space position of the chunk's minimum corner
    pub fn world_origin(&self) -> Vec3 {
        self.as_ivec3().as_vec3() * CHUNK_SIZE as f32
    }

    /// Voxel coordinate of the chunk's minimum corner
    pub fn voxel_origin(&self) -> IVec3 {
        self.as_ivec3() * CHUNK_SIZE
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}

impl From<ChunkKey> for u64 {
    fn from(value: ChunkKey) -> Self {
        value.pack()
    }
}

impl From<u64> for ChunkKey {
    fn from(value: u64) -> Self {
        Self::unpack(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_roundtrip_signed() {
        let keys = [
            ChunkKey::new(0, 0, 0),
            ChunkKey::new(-1, -1, -1),
            ChunkKey::new(12, -4, -300),
            ChunkKey::new(-1_875_000, 511, 1_875_000),
        ];
        for key in keys {
            assert_eq!(ChunkKey::unpack(key.pack()), key, "roundtrip failed for {key}");
        }
    }

    #[test]
    fn test_pack_extremes() {
        let min = ChunkKey::new(
            -ChunkKey::HORIZONTAL_LIMIT,
            -ChunkKey::VERTICAL_LIMIT,
            -ChunkKey::HORIZONTAL_LIMIT,
        );
        let max = ChunkKey::new(
            ChunkKey::HORIZONTAL_LIMIT - 1,
            ChunkKey::VERTICAL_LIMIT - 1,
            ChunkKey::HORIZONTAL_LIMIT - 1,
        );

        assert_eq!(ChunkKey::unpack(min.pack()), min);
        assert_eq!(ChunkKey::unpack(max.pack()), max);
        assert_ne!(min.pack(), max.pack());
    }

    #[test]
    fn test_distinct_keys_pack_distinct() {
        let a = ChunkKey::new(1, 0, 0).pack();
        let b = ChunkKey::new(0, 1, 0).pack();
        let c = ChunkKey::new(0, 0, 1).pack();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_from_voxel_floors_negative() {
        assert_eq!(ChunkKey::from_voxel(IVec3::new(0, 15, 16)), ChunkKey::new(0, 0, 1));
        assert_eq!(ChunkKey::from_voxel(IVec3::new(-1, -16, -17)), ChunkKey::new(-1, -1, -2));
    }

    #[test]
    fn test_from_world_and_origin() {
        let key = ChunkKey::from_world(Vec3::new(-0.5, 31.9, 32.0));
        assert_eq!(key, ChunkKey::new(-1, 1, 2));
        assert_eq!(key.world_origin(), Vec3::new(-16.0, 16.0, 32.0));
        assert_eq!(key.voxel_origin(), IVec3::new(-16, 16, 32));
    }
}
