//! Rapier-backed physics world
//!
//! Terrain chunks become fixed bodies holding one compound collider each.
//! Their presence in the active simulation is the body's enabled flag.

use crate::backend::{BodyRegistry, PhysicsBackend};
use crate::collision::Aabb;
use crate::error::{Result, TerrainError};
use crate::shape::BodyHandle;
use crate::tracker::TrackedBody;
use glam::Vec3;
use rapier3d::prelude::*;

/// Rapier pipeline plus the body and collider sets it steps
pub struct PhysicsWorld {
    pub(crate) rigid_body_set: RigidBodySet,
    pub(crate) collider_set: ColliderSet,
    pub(crate) impulse_joint_set: ImpulseJointSet,
    pub(crate) multibody_joint_set: MultibodyJointSet,
    pub(crate) integration_parameters: IntegrationParameters,
    pub(crate) physics_pipeline: PhysicsPipeline,
    pub(crate) island_manager: IslandManager,
    pub(crate) broad_phase: DefaultBroadPhase,
    pub(crate) narrow_phase: NarrowPhase,
    pub(crate) ccd_solver: CCDSolver,
    gravity: Vector<Real>,
    terrain_bodies: usize,
}

impl PhysicsWorld {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            integration_parameters: IntegrationParameters::default(),
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            ccd_solver: CCDSolver::new(),
            gravity: vector![gravity.x, gravity.y, gravity.z],
            terrain_bodies: 0,
        }
    }

    /// Advance the simulation by `dt` seconds
    pub fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;

        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }

    /// Insert a body, returning its handle
    pub fn add_rigid_body(&mut self, body: RigidBody) -> RigidBodyHandle {
        self.rigid_body_set.insert(body)
    }

    /// Remove a body together with its colliders
    pub fn remove_rigid_body(&mut self, handle: RigidBodyHandle) {
        self.rigid_body_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
    }

    /// Add a collider to the world, attached to a rigid body
    pub fn add_collider(
        &mut self,
        collider: Collider,
        parent: RigidBodyHandle,
    ) -> ColliderHandle {
        self.collider_set.insert_with_parent(collider, parent, &mut self.rigid_body_set)
    }

    pub fn gravity(&self) -> Vec3 {
        Vec3::new(self.gravity.x, self.gravity.y, self.gravity.z)
    }

    /// Number of live terrain chunk bodies
    pub fn terrain_body_count(&self) -> usize {
        self.terrain_bodies
    }

    /// Add a dynamic ball, mostly for tests and demos
    pub fn spawn_ball(&mut self, position: Vec3, radius: f32) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![position.x, position.y, position.z])
            .build();
        let handle = self.add_rigid_body(body);
        self.add_collider(ColliderBuilder::ball(radius).build(), handle);
        handle
    }

    /// World position of a body
    pub fn body_position(&self, handle: RigidBodyHandle) -> Option<Vec3> {
        self.rigid_body_set.get(handle).map(|body| {
            let t = body.translation();
            Vec3::new(t.x, t.y, t.z)
        })
    }

    fn body_aabb(&self, body: &RigidBody) -> Option<Aabb> {
        body.colliders()
            .iter()
            .filter_map(|handle| self.collider_set.get(*handle))
            .map(|collider| {
                let aabb = collider.compute_aabb();
                Aabb::new(
                    Vec3::new(aabb.mins.x, aabb.mins.y, aabb.mins.z),
                    Vec3::new(aabb.maxs.x, aabb.maxs.y, aabb.maxs.z),
                )
            })
            .reduce(|a, b| a.union(&b))
    }
}

impl PhysicsBackend for PhysicsWorld {
    fn create_static_body(&mut self, shape: SharedShape, origin: Vec3) -> Result<BodyHandle> {
        if !origin.is_finite() {
            return Err(TerrainError::Physics(format!("non-finite body origin {origin}")));
        }

        let body = RigidBodyBuilder::fixed()
            .translation(vector![origin.x, origin.y, origin.z])
            .enabled(false)
            .build();
        let handle = self.add_rigid_body(body);
        self.add_collider(ColliderBuilder::new(shape).build(), handle);
        self.terrain_bodies += 1;
        Ok(BodyHandle::from_rapier(handle))
    }

    fn destroy_body(&mut self, body: BodyHandle) {
        if self.rigid_body_set.contains(body.rapier()) {
            self.remove_rigid_body(body.rapier());
            self.terrain_bodies = self.terrain_bodies.saturating_sub(1);
        } else {
            tracing::warn!("destroy_body on unknown body {:?}", body.rapier());
        }
    }

    fn swap_shape(&mut self, body: &BodyHandle, shape: SharedShape) -> Result<()> {
        let rigid_body = self
            .rigid_body_set
            .get(body.rapier())
            .ok_or_else(|| TerrainError::Physics(format!("unknown body {:?}", body.rapier())))?;
        let colliders = rigid_body.colliders().to_vec();

        match colliders.first() {
            Some(&first) => {
                if let Some(collider) = self.collider_set.get_mut(first) {
                    collider.set_shape(shape);
                }
            }
            None => {
                self.add_collider(ColliderBuilder::new(shape).build(), body.rapier());
            }
        }
        Ok(())
    }

    fn add_to_simulation(&mut self, body: &BodyHandle) {
        if let Some(rigid_body) = self.rigid_body_set.get_mut(body.rapier()) {
            rigid_body.set_enabled(true);
        }
    }

    fn remove_from_simulation(&mut self, body: &BodyHandle) {
        if let Some(rigid_body) = self.rigid_body_set.get_mut(body.rapier()) {
            rigid_body.set_enabled(false);
        }
    }

    fn is_added(&self, body: &BodyHandle) -> bool {
        self.rigid_body_set
            .get(body.rapier())
            .is_some_and(|rigid_body| rigid_body.is_enabled())
    }
}

impl BodyRegistry for PhysicsWorld {
    fn all_tracked_bodies(&self) -> Vec<TrackedBody> {
        self.rigid_body_set
            .iter()
            .filter(|(_, body)| body.is_dynamic() && body.is_enabled())
            .map(|(handle, body)| {
                let t = body.translation();
                let position = Vec3::new(t.x, t.y, t.z);
                let v = body.linvel();
                let aabb = self
                    .body_aabb(body)
                    .unwrap_or_else(|| Aabb::point(position));
                TrackedBody {
                    id: handle.into_raw_parts().0 as u64,
                    position,
                    aabb,
                    velocity: Vec3::new(v.x, v.y, v.z),
                    awake: !body.is_sleeping(),
                }
            })
            .collect()
    }
}
