//! Physics-thread side of the pipeline
//!
//! The only code that touches bodies and simulation membership. Slot
//! resource guards are always dropped before `release_slot`.

use super::generate::Pipeline;
use super::messages::{MeshOutcome, PhysicsTask};
use crate::backend::PhysicsBackend;
use crate::chunk::{is_stale, ChunkKey, ChunkSlot, ChunkState, SlotIndex, StateWord};
use crate::shape::{BodyHandle, ShapeHandle};
use crate::snapshot::ContentHash;
use rapier3d::prelude::SharedShape;

impl Pipeline {
    pub fn run_physics_task<P: PhysicsBackend + ?Sized>(&self, physics: &mut P, task: PhysicsTask) {
        match task {
            PhysicsTask::Apply {
                slot,
                key,
                version,
                outcome,
            } => self.apply(physics, slot, key, version, outcome),
            PhysicsTask::Cleanup { slot, key, version } => self.cleanup(physics, slot, key, version),
            PhysicsTask::SyncActivation { slot, key } => self.sync_activation(physics, slot, key),
        }
    }

    fn apply<P: PhysicsBackend + ?Sized>(
        &self,
        physics: &mut P,
        index: SlotIndex,
        key: ChunkKey,
        version: u64,
        outcome: MeshOutcome,
    ) {
        let Some(slot) = self.store.slot(index) else {
            return;
        };
        let word = slot.state_word();
        if slot.key() != key
            || is_stale(version, word.version)
            || word.state != ChunkState::GeneratingShape
        {
            tracing::debug!(
                "discarding {} result for {key} (v{version}, now v{} {:?})",
                outcome.label(),
                word.version,
                word.state
            );
            self.stats.stale();
            return;
        }

        match outcome {
            MeshOutcome::Shape { shape, hash } => {
                self.apply_shape(physics, &slot, key, version, shape, hash)
            }
            MeshOutcome::Empty => self.apply_air(physics, &slot, key, version),
            MeshOutcome::Failed => self.fail(physics, &slot, key, version),
        }
    }

    fn apply_shape<P: PhysicsBackend + ?Sized>(
        &self,
        physics: &mut P,
        slot: &ChunkSlot,
        key: ChunkKey,
        version: u64,
        shape: SharedShape,
        hash: ContentHash,
    ) {
        let mut resources = slot.resources();

        let installed = match resources.body.as_ref() {
            Some(body) => physics.swap_shape(body, shape.clone()).map(|()| None),
            None => physics
                .create_static_body(shape.clone(), key.world_origin())
                .map(Some),
        };
        match installed {
            Ok(Some(body)) => resources.body = Some(body),
            Ok(None) => {}
            Err(e) => {
                drop(resources);
                tracing::warn!("physics rejected shape for chunk {key}: {e}");
                self.fail(physics, slot, key, version);
                return;
            }
        }

        // Previous shape (if any) is released here
        drop(resources.replace_shape(ShapeHandle::new(shape, hash)));

        let active = slot.wants_active();
        if let Some(body) = resources.body.as_ref() {
            set_simulated(physics, body, active);
        }
        drop(resources);

        let target = if active {
            ChunkState::ReadyActive
        } else {
            ChunkState::ReadyInactive
        };
        if self.finish(slot, key, version, target) {
            self.stats.applied();
        }
    }

    fn apply_air<P: PhysicsBackend + ?Sized>(
        &self,
        physics: &mut P,
        slot: &ChunkSlot,
        key: ChunkKey,
        version: u64,
    ) {
        let (body, shape) = {
            let mut resources = slot.resources();
            (resources.body.take(), resources.shape.take())
        };
        if let Some(body) = body {
            destroy(physics, body);
        }
        drop(shape);

        if self.finish(slot, key, version, ChunkState::AirChunk) {
            self.stats.air();
        }
    }

    /// Generation failed: back to `Unloaded`, retryable via prioritize.
    ///
    /// A body left over from an earlier build is kept for the retry to swap
    /// onto, but leaves the simulation so an `Unloaded` record never collides.
    fn fail<P: PhysicsBackend + ?Sized>(
        &self,
        physics: &mut P,
        slot: &ChunkSlot,
        key: ChunkKey,
        version: u64,
    ) {
        {
            let resources = slot.resources();
            if let Some(body) = resources.body.as_ref() {
                set_simulated(physics, body, false);
            }
        }
        self.stats.failed();
        self.finish(slot, key, version, ChunkState::Unloaded);
    }

    /// Leave `GeneratingShape` for `to`. Returns `false` if the version moved on.
    fn finish(&self, slot: &ChunkSlot, key: ChunkKey, version: u64, to: ChunkState) -> bool {
        match slot
            .word()
            .advance(version, ChunkState::GeneratingShape, to)
        {
            Ok(()) => {
                if to != ChunkState::Unloaded {
                    slot.set_placeholder(false);
                }
                tracing::debug!("chunk {key} v{version} -> {to:?}");
                true
            }
            Err(e) => {
                tracing::debug!("chunk {key} v{version} superseded while applying: {e:?}");
                self.stats.stale();
                false
            }
        }
    }

    fn cleanup<P: PhysicsBackend + ?Sized>(
        &self,
        physics: &mut P,
        index: SlotIndex,
        key: ChunkKey,
        version: u64,
    ) {
        let Some(slot) = self.store.slot(index) else {
            return;
        };
        let expected = StateWord {
            version,
            state: ChunkState::Removing,
        };
        if self.store.key_of(index) != Some(key) || slot.state_word() != expected {
            tracing::debug!("skipping cleanup of {key} (v{version}), chunk was requested again");
            return;
        }

        let (body, shape) = {
            let mut resources = slot.resources();
            (resources.body.take(), resources.shape.take())
        };
        if let Some(body) = body {
            destroy(physics, body);
        }
        drop(shape);

        if self.store.release_slot(index, version) {
            self.stats.released();
            tracing::debug!("chunk {key} released (slot {index})");
        }
    }

    fn sync_activation<P: PhysicsBackend + ?Sized>(
        &self,
        physics: &mut P,
        index: SlotIndex,
        key: ChunkKey,
    ) {
        if self.store.key_of(index) != Some(key) {
            return;
        }
        let Some(slot) = self.store.slot(index) else {
            return;
        };

        // Bodies join only while Ready
        let active = slot.wants_active();
        {
            let resources = slot.resources();
            if let Some(body) = resources.body.as_ref() {
                let join = active && slot.state().is_ready();
                if join || !active {
                    set_simulated(physics, body, join);
                }
            }
        }

        slot.word().update_in_place(|state| match (state, active) {
            (ChunkState::ReadyInactive, true) => Some(ChunkState::ReadyActive),
            (ChunkState::ReadyActive, false) => Some(ChunkState::ReadyInactive),
            _ => None,
        });
    }
}

fn set_simulated<P: PhysicsBackend + ?Sized>(physics: &mut P, body: &BodyHandle, active: bool) {
    match (active, physics.is_added(body)) {
        (true, false) => physics.add_to_simulation(body),
        (false, true) => physics.remove_from_simulation(body),
        _ => {}
    }
}

fn destroy<P: PhysicsBackend + ?Sized>(physics: &mut P, body: BodyHandle) {
    if physics.is_added(&body) {
        physics.remove_from_simulation(&body);
    }
    physics.destroy_body(body);
}
