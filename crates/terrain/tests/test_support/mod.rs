//! Shared fixtures for the pipeline integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use terrain_stream::glam::{IVec3, Vec3};
use terrain_stream::rapier3d::prelude::{RigidBodyHandle, SharedShape};
use terrain_stream::{
    BodyHandle, ChunkKey, ChunkSnapshot, ContentHash, MemoryShapeStore, PersistentShapeStore,
    PhysicsBackend, Result, ShapeBox, StoreError, TerrainConfig, TerrainError, TerrainManager,
    Voxel, WorldSource,
};

/// One body as the mock engine sees it
pub struct MockBody {
    pub shape: SharedShape,
    pub origin: Vec3,
    pub added: bool,
}

/// Physics backend that records every call and panics on misuse
#[derive(Default)]
pub struct MockPhysics {
    next_id: u32,
    pub bodies: HashMap<u32, MockBody>,
    pub created: usize,
    pub destroyed: usize,
    pub swaps: usize,
    pub adds: usize,
    pub removes: usize,
    pub fail_create: bool,
    pub fail_swap: bool,
}

impl MockPhysics {
    pub fn new() -> Self {
        Self::default()
    }

    fn id(body: &BodyHandle) -> u32 {
        body.rapier().into_raw_parts().0
    }

    /// The only live body; panics unless exactly one exists
    pub fn single_body(&self) -> &MockBody {
        assert_eq!(self.bodies.len(), 1, "expected exactly one body");
        self.bodies.values().next().unwrap()
    }

    pub fn body_at(&self, origin: Vec3) -> Option<&MockBody> {
        self.bodies.values().find(|b| b.origin == origin)
    }

    pub fn added_count(&self) -> usize {
        self.bodies.values().filter(|b| b.added).count()
    }
}

impl PhysicsBackend for MockPhysics {
    fn create_static_body(&mut self, shape: SharedShape, origin: Vec3) -> Result<BodyHandle> {
        if self.fail_create {
            return Err(TerrainError::Physics("mock refused body".into()));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.bodies.insert(
            id,
            MockBody {
                shape,
                origin,
                added: false,
            },
        );
        self.created += 1;
        Ok(BodyHandle::from_rapier(RigidBodyHandle::from_raw_parts(id, 0)))
    }

    fn destroy_body(&mut self, body: BodyHandle) {
        let id = Self::id(&body);
        assert!(self.bodies.remove(&id).is_some(), "body {id} destroyed twice");
        self.destroyed += 1;
    }

    fn swap_shape(&mut self, body: &BodyHandle, shape: SharedShape) -> Result<()> {
        if self.fail_swap {
            return Err(TerrainError::Physics("mock refused shape swap".into()));
        }
        let id = Self::id(body);
        let entry = self.bodies.get_mut(&id).expect("swap on destroyed body");
        entry.shape = shape;
        self.swaps += 1;
        Ok(())
    }

    fn add_to_simulation(&mut self, body: &BodyHandle) {
        let id = Self::id(body);
        let entry = self.bodies.get_mut(&id).expect("add on destroyed body");
        assert!(!entry.added, "body {id} added twice");
        entry.added = true;
        self.adds += 1;
    }

    fn remove_from_simulation(&mut self, body: &BodyHandle) {
        let id = Self::id(body);
        let entry = self.bodies.get_mut(&id).expect("remove on destroyed body");
        assert!(entry.added, "body {id} removed while not added");
        entry.added = false;
        self.removes += 1;
    }

    fn is_added(&self, body: &BodyHandle) -> bool {
        self.bodies.get(&Self::id(body)).is_some_and(|b| b.added)
    }
}

/// World whose chunks are air unless set otherwise
#[derive(Default)]
pub struct MockWorld {
    chunks: HashMap<ChunkKey, ChunkSnapshot>,
    unavailable: HashSet<ChunkKey>,
    pub captures: usize,
}

impl MockWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, snapshot: ChunkSnapshot) {
        self.chunks.insert(snapshot.key(), snapshot);
    }

    pub fn clear(&mut self, key: ChunkKey) {
        self.chunks.remove(&key);
    }

    pub fn set_unavailable(&mut self, key: ChunkKey, unavailable: bool) {
        if unavailable {
            self.unavailable.insert(key);
        } else {
            self.unavailable.remove(&key);
        }
    }
}

impl WorldSource for MockWorld {
    fn capture_snapshot(&mut self, key: ChunkKey) -> Option<ChunkSnapshot> {
        if self.unavailable.contains(&key) {
            return None;
        }
        self.captures += 1;
        Some(
            self.chunks
                .get(&key)
                .cloned()
                .unwrap_or_else(|| ChunkSnapshot::empty(key)),
        )
    }
}

/// Shape store whose lookups panic a set number of times, then behave
#[derive(Default)]
pub struct PanickingStore {
    inner: MemoryShapeStore,
    panics_left: AtomicUsize,
    lookups: AtomicUsize,
}

impl PanickingStore {
    pub fn new(panics: usize) -> Self {
        Self {
            panics_left: AtomicUsize::new(panics),
            ..Self::default()
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl PersistentShapeStore for PanickingStore {
    fn get_shape_data(
        &self,
        key: ChunkKey,
        hash: ContentHash,
    ) -> std::result::Result<Option<Vec<ShapeBox>>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let armed = self
            .panics_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            panic!("shape store lookup for {key} blew up");
        }
        self.inner.get_shape_data(key, hash)
    }

    fn store_shape_data(
        &self,
        key: ChunkKey,
        hash: ContentHash,
        boxes: &[ShapeBox],
    ) -> std::result::Result<(), StoreError> {
        self.inner.store_shape_data(key, hash, boxes)
    }

    fn remove_shape_data(&self, key: ChunkKey) -> std::result::Result<(), StoreError> {
        self.inner.remove_shape_data(key)
    }
}

/// Single-threaded config: jobs run inline on the world thread
pub fn inline_config() -> TerrainConfig {
    TerrainConfig {
        worker_threads: 0,
        ..TerrainConfig::default()
    }
}

pub fn inline_manager() -> TerrainManager {
    TerrainManager::new(inline_config()).unwrap()
}

pub fn checkerboard(key: ChunkKey) -> ChunkSnapshot {
    ChunkSnapshot::from_fn(key, |p| ((p.x + p.y + p.z) % 2 == 0).then(|| Voxel::solid(1)))
}

pub fn slab(key: ChunkKey, height: i32) -> ChunkSnapshot {
    ChunkSnapshot::from_fn(key, |p: IVec3| (p.y < height).then(|| Voxel::solid(1)))
}

/// Drain both threads' queues until nothing is left
pub fn pump(manager: &TerrainManager, world: &mut MockWorld, physics: &mut MockPhysics) {
    loop {
        let w = manager.process_world_tasks(world);
        let p = manager.process_physics_tasks(physics);
        if w == 0 && p == 0 {
            break;
        }
    }
}

/// Like [`pump`], but waits for worker threads until `done` holds
pub fn pump_until(
    manager: &TerrainManager,
    world: &mut MockWorld,
    physics: &mut MockPhysics,
    done: impl Fn(&TerrainManager) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        manager.process_world_tasks(world);
        manager.process_physics_tasks(physics);
        if done(manager) {
            return;
        }
        assert!(Instant::now() < deadline, "pipeline did not settle in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}
