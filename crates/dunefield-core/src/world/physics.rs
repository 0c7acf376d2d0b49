//! Rigid body physics backed by rapier2d
//!
//! World units are tiles, y grows downward, so gravity is positive.

use glam::Vec2;
use rapier2d::prelude::*;

use super::rigid_body::BodyKind;

/// Linear speed (tiles/s) under which a body counts as resting
pub const REST_SPEED: f32 = 5.0;

/// Receives collider outlines for debug overlays
pub trait DebugDraw {
    /// A convex collider outline in world coordinates
    fn polygon(&mut self, points: &[Vec2], fixed: bool);
}

/// Manages the rapier2d physics world
pub struct PhysicsWorld {
    /// Rapier rigid body set
    rigid_body_set: RigidBodySet,

    /// Rapier collider set
    collider_set: ColliderSet,

    /// Physics pipeline
    pipeline: PhysicsPipeline,

    /// Integration parameters
    integration_parameters: IntegrationParameters,

    island_manager: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,

    gravity: Vector<Real>,
}

impl PhysicsWorld {
    pub fn new(gravity: f32) -> Self {
        let integration_parameters = IntegrationParameters {
            dt: 1.0 / 60.0, // 60 FPS
            ..Default::default()
        };

        Self {
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            gravity: vector![0.0, gravity],
        }
    }

    /// Advance the simulation by one fixed step
    pub fn step(&mut self) {
        let physics_hooks = ();
        let event_handler = ();

        self.pipeline.step(
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
            Some(&mut self.query_pipeline),
            &physics_hooks,
            &event_handler,
        );
    }

    /// Create a body with one collider per convex polygon (body-local coordinates)
    ///
    /// Polygons rapier rejects are skipped; a body left without colliders gets
    /// a single unit tile so it still has mass.
    pub fn create_body(
        &mut self,
        kind: BodyKind,
        position: Vec2,
        angle: f32,
        polygons: &[Vec<Vec2>],
        density: f32,
        friction: f32,
    ) -> RigidBodyHandle {
        let builder = match kind {
            BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
            BodyKind::Fixed => RigidBodyBuilder::fixed(),
            BodyKind::Kinematic => RigidBodyBuilder::kinematic_position_based(),
        };
        let body = builder
            .translation(vector![position.x, position.y])
            .rotation(angle)
            .build();
        let handle = self.rigid_body_set.insert(body);

        let mut inserted = 0;
        for polygon in polygons {
            let points: Vec<Point<Real>> = polygon.iter().map(|p| point![p.x, p.y]).collect();
            let Some(builder) = ColliderBuilder::convex_polyline(points) else {
                continue;
            };
            let collider = builder.density(density).friction(friction).restitution(0.1).build();
            self.collider_set
                .insert_with_parent(collider, handle, &mut self.rigid_body_set);
            inserted += 1;
        }
        if inserted == 0 {
            let collider = ColliderBuilder::cuboid(0.5, 0.5)
                .translation(vector![0.5, 0.5])
                .density(density)
                .friction(friction)
                .build();
            self.collider_set
                .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        }

        log::trace!(
            "Physics: created {:?} body {:?} at ({:.1}, {:.1}) with {} colliders",
            kind,
            handle,
            position.x,
            position.y,
            inserted.max(1)
        );
        handle
    }

    /// Remove a body together with its colliders
    pub fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.rigid_body_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
    }

    /// Replace a chunk's static terrain body
    ///
    /// Polygons are in world coordinates. Returns None when there is nothing
    /// to collide with.
    pub fn set_static_geometry(
        &mut self,
        old: Option<RigidBodyHandle>,
        polygons: &[Vec<Vec2>],
    ) -> Option<RigidBodyHandle> {
        if let Some(old) = old {
            self.remove_body(old);
        }
        if polygons.is_empty() {
            return None;
        }

        let handle = self.rigid_body_set.insert(RigidBodyBuilder::fixed().build());
        for polygon in polygons {
            let points: Vec<Point<Real>> = polygon.iter().map(|p| point![p.x, p.y]).collect();
            if let Some(builder) = ColliderBuilder::convex_polyline(points) {
                let collider = builder.friction(0.8).restitution(0.1).build();
                self.collider_set
                    .insert_with_parent(collider, handle, &mut self.rigid_body_set);
            }
        }
        Some(handle)
    }

    /// Position and rotation of a body
    pub fn transform(&self, handle: RigidBodyHandle) -> Option<(Vec2, f32)> {
        self.rigid_body_set.get(handle).map(|body| {
            let translation = body.translation();
            (Vec2::new(translation.x, translation.y), body.rotation().angle())
        })
    }

    pub fn linvel(&self, handle: RigidBodyHandle) -> Option<Vec2> {
        self.rigid_body_set.get(handle).map(|body| {
            let v = body.linvel();
            Vec2::new(v.x, v.y)
        })
    }

    pub fn set_linvel(&mut self, handle: RigidBodyHandle, velocity: Vec2) {
        if let Some(body) = self.rigid_body_set.get_mut(handle) {
            body.set_linvel(vector![velocity.x, velocity.y], true);
        }
    }

    /// Scale a body's linear velocity per axis
    pub fn damp_velocity(&mut self, handle: RigidBodyHandle, factor_x: f32, factor_y: f32) {
        if let Some(body) = self.rigid_body_set.get_mut(handle) {
            let v = *body.linvel();
            body.set_linvel(vector![v.x * factor_x, v.y * factor_y], true);
        }
    }

    /// Teleport a body (used for kinematic bodies and tests)
    pub fn set_transform(&mut self, handle: RigidBodyHandle, position: Vec2, angle: f32) {
        if let Some(body) = self.rigid_body_set.get_mut(handle) {
            body.set_position(Isometry::new(vector![position.x, position.y], angle), true);
        }
    }

    /// Disabled bodies keep their state but take no part in the simulation
    pub fn set_enabled(&mut self, handle: RigidBodyHandle, enabled: bool) {
        if let Some(body) = self.rigid_body_set.get_mut(handle)
            && body.is_enabled() != enabled
        {
            body.set_enabled(enabled);
        }
    }

    /// Whether a body is moving slower than [`REST_SPEED`]
    pub fn is_resting(&self, handle: RigidBodyHandle) -> bool {
        self.rigid_body_set
            .get(handle)
            .is_some_and(|body| body.linvel().magnitude() < REST_SPEED)
    }

    /// Number of bodies, static terrain bodies included
    pub fn body_count(&self) -> usize {
        self.rigid_body_set.len()
    }

    /// Emit every convex collider outline in world space
    pub fn debug_draw(&self, sink: &mut dyn DebugDraw) {
        for (_, collider) in self.collider_set.iter() {
            let Some(polygon) = collider.shape().as_convex_polygon() else {
                continue;
            };
            let fixed = collider
                .parent()
                .and_then(|parent| self.rigid_body_set.get(parent))
                .is_none_or(|body| body.is_fixed());
            let position = collider.position();
            let points: Vec<Vec2> = polygon
                .points()
                .iter()
                .map(|p| {
                    let q = position.transform_point(p);
                    Vec2::new(q.x, q.y)
                })
                .collect();
            sink.polygon(&points, fixed);
        }
    }
}
