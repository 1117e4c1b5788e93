//! Chunk lifecycle orchestration
//!
//! The manager owns the slot table and the three hand-off channels:
//!
//! ```text
//! request/rebuild ──► world channel ──► WorldSource::capture_snapshot
//!                                          │
//!                                          ▼
//!                         job pool: cache / store / GreedyMesher
//!                                          │
//!                                          ▼
//!                 physics channel ──► PhysicsBackend (apply, cleanup, sync)
//! ```
//!
//! Request, release, rebuild and activation calls may come from any thread.
//! [`TerrainManager::process_world_tasks`] must run on the thread that owns
//! the world and [`TerrainManager::process_physics_tasks`] on the thread that
//! owns the physics engine.

mod generate;
mod messages;
mod physics;
mod stats;

pub use stats::PipelineStatsSnapshot;

use crate::backend::{PhysicsBackend, WorldSource};
use crate::chunk::{ChunkDataStore, ChunkKey, ChunkSlot, ChunkState, SlotIndex};
use crate::config::TerrainConfig;
use crate::error::{Result, TerrainError};
use crate::jobs::{JobPriority, TerrainJobSystem};
use crate::shape::{PersistentShapeStore, ShapeCache};
use crate::snapshot::ContentHash;
use crate::tracker::ChunkSink;
use crossbeam_channel::{unbounded, Receiver, Sender};
use generate::Pipeline;
use glam::IVec3;
use messages::{CaptureRequest, GenerateJob, PhysicsTask};
use stats::PipelineStats;
use std::sync::Arc;

/// Point-in-time view of one tracked chunk
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChunkInfo {
    pub key: ChunkKey,
    pub slot: SlotIndex,
    pub state: ChunkState,
    pub version: u64,
    pub ref_count: u32,
    pub placeholder: bool,
    pub wants_active: bool,
    pub has_body: bool,
    pub has_shape: bool,
    pub content_hash: Option<ContentHash>,
}

/// Terrain streaming orchestrator
pub struct TerrainManager {
    config: TerrainConfig,
    pipeline: Arc<Pipeline>,
    jobs: TerrainJobSystem,
    world_tx: Sender<CaptureRequest>,
    world_rx: Receiver<CaptureRequest>,
    physics_rx: Receiver<PhysicsTask>,
}

impl TerrainManager {
    pub fn new(config: TerrainConfig) -> Result<Self> {
        Self::with_persistent_store(config, None)
    }

    /// Create a manager that reuses box lists from `persistent` across sessions
    pub fn with_persistent_store(
        config: TerrainConfig,
        persistent: Option<Arc<dyn PersistentShapeStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let (world_tx, world_rx) = unbounded();
        let (physics_tx, physics_rx) = unbounded();
        let pipeline = Arc::new(Pipeline {
            store: ChunkDataStore::new(config.max_chunk_slots),
            cache: ShapeCache::new(config.shape_cache_capacity),
            persistent,
            physics_tx,
            stats: PipelineStats::default(),
        });
        let jobs = TerrainJobSystem::new(config.worker_threads);

        tracing::info!(
            "terrain manager ready: {} slots, {} cached shapes, {} mesh workers",
            config.max_chunk_slots,
            config.shape_cache_capacity,
            config.worker_threads
        );

        Ok(Self {
            config,
            pipeline,
            jobs,
            world_tx,
            world_rx,
            physics_rx,
        })
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Add a reference to `key`. The first reference starts generation.
    pub fn request_chunk(&self, key: ChunkKey) -> Result<()> {
        if !key.is_packable() {
            return Err(TerrainError::KeyOutOfRange(key));
        }
        if self.jobs.is_shutdown() {
            return Err(TerrainError::JobSystemShutdown);
        }

        self.pipeline.store.retain(key, |index, slot| {
            slot.set_priority(JobPriority::Normal);
            // 0 → 1 always starts a fresh generation, including over a
            // pending removal whose cleanup has not run yet
            if let Ok(version) = slot.word().bump(ChunkState::LoadingScheduled, |_| true) {
                slot.set_placeholder(true);
                self.schedule(index, key, version, true);
            }
        })?;
        Ok(())
    }

    /// Drop a reference to `key`. The last reference queues removal.
    pub fn release_chunk(&self, key: ChunkKey) {
        self.pipeline.store.unretain(key, |index, slot| {
            self.begin_removal(index, key, slot);
        });
    }

    /// Regenerate a tracked chunk from fresh world data.
    ///
    /// Supersedes any generation in flight. Refused for untracked chunks and
    /// chunks being removed.
    pub fn rebuild_chunk(&self, key: ChunkKey) -> bool {
        self.pipeline
            .store
            .with_tracked(key, |index, slot| {
                let Ok(version) = slot
                    .word()
                    .bump(ChunkState::LoadingScheduled, |s| s != ChunkState::Removing)
                else {
                    return false;
                };
                slot.set_placeholder(true);
                if slot.wants_active() {
                    slot.set_priority(JobPriority::Critical);
                }
                self.schedule(index, key, version, false);
                true
            })
            .unwrap_or(false)
    }

    /// Raise a chunk to the critical tier and revive it if it stalled.
    ///
    /// Re-enters the pipeline only from `Unloaded` (unavailable region or
    /// failed generation); chunks already in flight just get the higher tier.
    pub fn prioritize_chunk(&self, key: ChunkKey) -> bool {
        self.pipeline
            .store
            .with_tracked(key, |index, slot| {
                slot.set_priority(JobPriority::Critical);
                let stalled = |s: ChunkState| s == ChunkState::Unloaded;
                if let Ok(version) = slot.word().bump(ChunkState::LoadingScheduled, stalled) {
                    tracing::debug!("reviving stalled chunk {key}");
                    self.schedule(index, key, version, true);
                }
            })
            .is_some()
    }

    /// Ask for the chunk's body to join the active simulation
    pub fn activate_chunk(&self, key: ChunkKey) -> bool {
        self.set_active(key, true)
    }

    /// Ask for the chunk's body to leave the active simulation
    pub fn deactivate_chunk(&self, key: ChunkKey) -> bool {
        self.set_active(key, false)
    }

    /// A voxel changed in the world; rebuild the chunk containing it if tracked.
    pub fn on_voxel_changed(&self, world_pos: IVec3) -> bool {
        let key = ChunkKey::from_voxel(world_pos);
        self.rebuild_chunk(key)
    }

    /// Drain capture requests. Call on the world-owning thread.
    pub fn process_world_tasks<W: WorldSource + ?Sized>(&self, world: &mut W) -> usize {
        let mut processed = 0;
        while let Ok(request) = self.world_rx.try_recv() {
            processed += 1;
            self.capture(world, request);
        }
        processed
    }

    /// Drain physics commands. Call on the physics-owning thread.
    pub fn process_physics_tasks<P: PhysicsBackend + ?Sized>(&self, physics: &mut P) -> usize {
        let mut processed = 0;
        while let Ok(task) = self.physics_rx.try_recv() {
            processed += 1;
            self.pipeline.run_physics_task(physics, task);
        }
        processed
    }

    pub fn chunk_state(&self, key: ChunkKey) -> Option<ChunkState> {
        self.pipeline.store.get(key).map(|(_, slot)| slot.state())
    }

    pub fn chunk_info(&self, key: ChunkKey) -> Option<ChunkInfo> {
        let (index, slot) = self.pipeline.store.get(key)?;
        let word = slot.state_word();
        let resources = slot.resources();
        Some(ChunkInfo {
            key,
            slot: index,
            state: word.state,
            version: word.version,
            ref_count: slot.ref_count(),
            placeholder: slot.is_placeholder(),
            wants_active: slot.wants_active(),
            has_body: resources.body.is_some(),
            has_shape: resources.shape.is_some(),
            content_hash: resources.shape.as_ref().map(|s| s.content_hash()),
        })
    }

    /// All chunks with a live slot, including ones waiting for cleanup
    pub fn tracked_chunks(&self) -> Vec<ChunkKey> {
        self.pipeline.store.tracked_keys()
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.pipeline.stats.snapshot()
    }

    pub fn shape_cache(&self) -> &ShapeCache {
        &self.pipeline.cache
    }

    pub fn store(&self) -> &ChunkDataStore {
        &self.pipeline.store
    }

    /// Messages waiting for the world and physics threads
    pub fn pending_tasks(&self) -> (usize, usize) {
        (self.world_rx.len(), self.physics_rx.len())
    }

    /// Drop every reference on every chunk. Cleanup still runs on the
    /// physics thread.
    pub fn release_all(&self) {
        for key in self.pipeline.store.tracked_keys() {
            while let Some((_, remaining)) = self
                .pipeline
                .store
                .unretain(key, |index, slot| self.begin_removal(index, key, slot))
            {
                if remaining == 0 {
                    break;
                }
            }
        }
    }

    /// Stop the mesh workers. Queued generations are discarded.
    pub fn shutdown(&self) {
        self.jobs.shutdown();
    }

    fn schedule(&self, index: SlotIndex, key: ChunkKey, version: u64, initial: bool) {
        tracing::debug!(
            "chunk {key} v{version} scheduled ({})",
            if initial { "initial" } else { "rebuild" }
        );
        self.pipeline.stats.scheduled();
        let _ = self.world_tx.send(CaptureRequest {
            slot: index,
            key,
            version,
            initial,
        });
    }

    fn begin_removal(&self, index: SlotIndex, key: ChunkKey, slot: &ChunkSlot) {
        // Removal always clears the activation request
        slot.set_wants_active(false);
        match slot
            .word()
            .bump(ChunkState::Removing, |s| s != ChunkState::Removing)
        {
            Ok(version) => {
                tracing::debug!("chunk {key} v{version} removing");
                let _ = self.pipeline.physics_tx.send(PhysicsTask::Cleanup {
                    slot: index,
                    key,
                    version,
                });
            }
            Err(_) => tracing::debug!("chunk {key} already removing"),
        }
    }

    fn set_active(&self, key: ChunkKey, active: bool) -> bool {
        self.pipeline
            .store
            .with_tracked(key, |index, slot| {
                slot.set_wants_active(active);
                if active {
                    slot.set_priority(JobPriority::Critical);
                }
                let _ = self
                    .pipeline
                    .physics_tx
                    .send(PhysicsTask::SyncActivation { slot: index, key });
            })
            .is_some()
    }

    fn capture<W: WorldSource + ?Sized>(&self, world: &mut W, request: CaptureRequest) {
        let CaptureRequest {
            slot: index,
            key,
            version,
            initial,
        } = request;

        let Some(slot) = self.pipeline.store.slot(index) else {
            return;
        };
        if !slot.is_current(key, version) {
            tracing::debug!("dropping stale capture for {key} (v{version})");
            self.pipeline.stats.stale();
            return;
        }

        let Some(snapshot) = world.capture_snapshot(key) else {
            if slot
                .word()
                .advance(version, ChunkState::LoadingScheduled, ChunkState::Unloaded)
                .is_ok()
            {
                tracing::debug!("chunk {key} unavailable, back to Unloaded");
                self.pipeline.stats.unavailable();
            }
            return;
        };

        if slot
            .word()
            .advance(version, ChunkState::LoadingScheduled, ChunkState::GeneratingShape)
            .is_err()
        {
            tracing::debug!("capture for {key} (v{version}) superseded");
            self.pipeline.stats.stale();
            return;
        }

        let job = GenerateJob {
            slot: index,
            key,
            version,
            initial,
            snapshot,
        };
        let pipeline = Arc::clone(&self.pipeline);
        let submitted = self
            .jobs
            .submit(slot.priority(), move |ctx| pipeline.generate(ctx, job));
        if let Err(e) = submitted {
            tracing::debug!("mesh job for {key} not submitted: {e}");
            let _ = slot.word().advance(
                version,
                ChunkState::GeneratingShape,
                ChunkState::Unloaded,
            );
        }
    }
}

impl ChunkSink for TerrainManager {
    fn request_chunk(&self, key: ChunkKey) -> Result<()> {
        TerrainManager::request_chunk(self, key)
    }

    fn release_chunk(&self, key: ChunkKey) {
        TerrainManager::release_chunk(self, key)
    }

    fn activate_chunk(&self, key: ChunkKey) -> bool {
        TerrainManager::activate_chunk(self, key)
    }

    fn deactivate_chunk(&self, key: ChunkKey) -> bool {
        TerrainManager::deactivate_chunk(self, key)
    }

    fn prioritize_chunk(&self, key: ChunkKey) -> bool {
        TerrainManager::prioritize_chunk(self, key)
    }
}

impl Drop for TerrainManager {
    fn drop(&mut self) {
        self.jobs.shutdown();
    }
}
