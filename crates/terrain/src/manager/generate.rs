//! Worker side of the pipeline: snapshot → native shape

use super::messages::{GenerateJob, MeshOutcome, PhysicsTask};
use super::stats::PipelineStats;
use crate::chunk::{ChunkDataStore, ChunkKey};
use crate::jobs::JobContext;
use crate::mesher::GreedyMesher;
use crate::shape::{build_collision_shape, PersistentShapeStore, ShapeCache};
use crate::snapshot::ChunkSnapshot;
use crossbeam_channel::Sender;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// State shared between the manager and in-flight jobs
pub(crate) struct Pipeline {
    pub store: ChunkDataStore,
    pub cache: ShapeCache,
    pub persistent: Option<Arc<dyn PersistentShapeStore>>,
    pub physics_tx: Sender<PhysicsTask>,
    pub stats: PipelineStats,
}

impl Pipeline {
    /// Job body. Never panics out and never sends for a superseded version.
    pub fn generate(&self, ctx: &JobContext, job: GenerateJob) {
        let GenerateJob {
            slot,
            key,
            version,
            initial,
            snapshot,
        } = job;

        if ctx.is_shutdown() {
            return;
        }
        if !self.store.is_current(slot, key, version) {
            tracing::debug!("dropping stale mesh job for {key} (v{version})");
            self.stats.stale();
            return;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| self.build(key, &snapshot, initial)))
            .unwrap_or_else(|_| {
                tracing::error!("meshing panicked for chunk {key}");
                MeshOutcome::Failed
            });

        if ctx.is_shutdown() {
            return;
        }
        if !self.store.is_current(slot, key, version) {
            tracing::debug!(
                "discarding {} result for {key} (v{version}), superseded",
                outcome.label()
            );
            self.stats.stale();
            return;
        }

        tracing::trace!("chunk {key} v{version} generated: {}", outcome.label());
        let _ = self.physics_tx.send(PhysicsTask::Apply {
            slot,
            key,
            version,
            outcome,
        });
    }

    fn build(&self, key: ChunkKey, snapshot: &ChunkSnapshot, initial: bool) -> MeshOutcome {
        if snapshot.is_empty() {
            if let Some(store) = &self.persistent {
                if let Err(e) = store.remove_shape_data(key) {
                    tracing::warn!("failed to drop stored shape for air chunk {key}: {e}");
                }
            }
            return MeshOutcome::Empty;
        }

        let hash = snapshot.content_hash();
        if let Some(shape) = self.cache.get(hash) {
            tracing::trace!("shape cache hit for {key} ({hash})");
            return MeshOutcome::Shape { shape, hash };
        }

        if initial {
            if let Some(store) = &self.persistent {
                match store.get_shape_data(key, hash) {
                    Ok(Some(boxes)) => match build_collision_shape(&boxes) {
                        Ok(shape) => {
                            self.cache.put(hash, shape.clone());
                            self.stats.store_hit();
                            return MeshOutcome::Shape { shape, hash };
                        }
                        Err(e) => tracing::warn!("stored shape for {key} unusable: {e}"),
                    },
                    Ok(None) => {}
                    Err(e) => tracing::warn!("shape store lookup failed for {key}: {e}"),
                }
            }
        }

        let Some(generated) = GreedyMesher::mesh(snapshot) else {
            return MeshOutcome::Empty;
        };

        match build_collision_shape(&generated.boxes) {
            Ok(shape) => {
                if let Some(store) = &self.persistent {
                    if let Err(e) = store.store_shape_data(key, hash, &generated.boxes) {
                        tracing::warn!("failed to persist shape for {key}: {e}");
                    }
                }
                self.cache.put(hash, shape.clone());
                MeshOutcome::Shape { shape, hash }
            }
            Err(e) => {
                tracing::warn!("collision shape for {key} could not be built: {e}");
                MeshOutcome::Failed
            }
        }
    }
}
