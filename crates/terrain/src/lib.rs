//! Streams a voxel world into on-demand rapier collision geometry.
//!
//! Bodies drive a [`SpatialTracker`], which tells the [`TerrainManager`]
//! which chunks to load and activate. The manager captures snapshots on the
//! world thread, meshes them into boxes on a worker pool and applies the
//! resulting shapes on the physics thread.

pub mod backend;
pub mod chunk;
pub mod collision;
pub mod config;
pub mod error;
pub mod jobs;
pub mod manager;
pub mod mesher;
pub mod shape;
pub mod snapshot;
pub mod tracker;
mod world;

pub use backend::{BodyRegistry, PhysicsBackend, WorldSource};
pub use chunk::{ChunkDataStore, ChunkKey, ChunkState, CHUNK_SIZE, CHUNK_VOLUME};
pub use config::TerrainConfig;
pub use error::{Result, StoreError, TerrainError};
pub use jobs::{JobContext, JobPriority, TerrainJobSystem};
pub use manager::{ChunkInfo, PipelineStatsSnapshot, TerrainManager};
pub use mesher::{GeneratedShape, GreedyMesher, ShapeBox};
pub use shape::{
    BodyHandle, FileShapeStore, MemoryShapeStore, PersistentShapeStore, ShapeCache,
    ShapeCacheStats, ShapeHandle,
};
pub use snapshot::{ChunkSnapshot, ContentHash, SnapshotBuilder, Voxel};
pub use tracker::{ChunkSink, SpatialTracker, TickReport, TrackedBody};
pub use world::PhysicsWorld;

// Re-export for convenience
pub use glam;
pub use rapier3d;
