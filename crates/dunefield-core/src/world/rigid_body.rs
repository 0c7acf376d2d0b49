//! Conversion between grid tiles and rigid bodies
//!
//! A body's tile buffer is the authority on which of its cells hold matter.
//! Carving moves tiles from the grid into a buffer; settling projects the
//! buffer back through the body's transform and welds it into the grid.

use std::collections::VecDeque;

use ahash::AHashSet;
use glam::{IVec2, Vec2};
use rapier2d::prelude::RigidBodyHandle;

use dunefield_simulation::{CellData, MaterialId, MaterialInstance, Materials, PhysicsType};

use super::grid::{TileGrid, TileRect};
use super::mesh;

/// Largest region the carve check flood-fills before calling it terrain
pub const FLOOD_FILL_CAP: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Dynamic,
    Fixed,
    Kinematic,
}

/// Collision shape requested for a new body
#[derive(Debug, Clone, PartialEq)]
pub enum BodyShape {
    /// Traced from the occupied cells of the tile buffer
    Tiles,
    /// The whole buffer rectangle
    Box,
    /// Explicit convex polygons in body-local coordinates
    Polygons(Vec<Vec<Vec2>>),
}

/// Everything needed to create a body
#[derive(Debug, Clone)]
pub struct BodyDesc {
    pub kind: BodyKind,
    /// World position of the buffer's top-left corner
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub shape: BodyShape,
    pub density: f32,
    pub friction: f32,
    pub w: i32,
    pub h: i32,
    pub tiles: Vec<Option<MaterialInstance>>,
}

impl BodyDesc {
    pub fn new(kind: BodyKind, x: f32, y: f32, w: i32, h: i32, tiles: Vec<Option<MaterialInstance>>) -> Self {
        Self {
            kind,
            x,
            y,
            angle: 0.0,
            shape: BodyShape::Tiles,
            density: 1.0,
            friction: 0.3,
            w,
            h,
            tiles,
        }
    }

    pub fn with_shape(mut self, shape: BodyShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_angle(mut self, angle: f32) -> Self {
        self.angle = angle;
        self
    }

    /// Outlines (for rendering) and convex pieces (for colliders)
    pub fn polygons(&self) -> (Vec<Vec<Vec2>>, Vec<Vec<Vec2>>) {
        match &self.shape {
            BodyShape::Tiles => {
                let occupied = |x: i32, y: i32| self.tiles[(y * self.w + x) as usize].is_some();
                mesh::build_polygons(self.w, self.h, occupied)
            }
            BodyShape::Box => {
                let (w, h) = (self.w as f32, self.h as f32);
                let rect = vec![Vec2::ZERO, Vec2::new(w, 0.0), Vec2::new(w, h), Vec2::new(0.0, h)];
                (vec![rect.clone()], vec![rect])
            }
            BodyShape::Polygons(polygons) => (polygons.clone(), polygons.clone()),
        }
    }
}

/// A rigid body carrying tiles
#[derive(Debug)]
pub struct RigidBody {
    pub handle: RigidBodyHandle,
    pub kind: BodyKind,
    pub w: i32,
    pub h: i32,
    /// Row-major `w * h` buffer
    pub tiles: Vec<Option<MaterialInstance>>,
    pub outline: Vec<Vec<Vec2>>,
    /// Grid tile this body is anchored to
    pub weld: Option<IVec2>,
    /// Centre inside the tick zone
    pub enabled: bool,
    /// Consecutive ticks spent below rest speed
    pub rest_ticks: u32,
}

impl RigidBody {
    pub fn new(
        handle: RigidBodyHandle,
        kind: BodyKind,
        w: i32,
        h: i32,
        tiles: Vec<Option<MaterialInstance>>,
        outline: Vec<Vec<Vec2>>,
    ) -> Self {
        Self {
            handle,
            kind,
            w,
            h,
            tiles,
            outline,
            weld: None,
            enabled: true,
            rest_ticks: 0,
        }
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.iter().all(|t| t.is_none())
    }

    /// World tile under the centre of local cell (tx, ty)
    pub fn project(tx: i32, ty: i32, pose: &BodyPose) -> IVec2 {
        let (sin, cos) = pose.angle.sin_cos();
        let lx = tx as f32 + 0.5;
        let ly = ty as f32 + 0.5;
        IVec2::new(
            (lx * cos - ly * sin + pose.position.x).floor() as i32,
            (lx * sin + ly * cos + pose.position.y).floor() as i32,
        )
    }

    /// World position of the buffer centre
    pub fn center(&self, pose: &BodyPose) -> Vec2 {
        let (sin, cos) = pose.angle.sin_cos();
        let (cx, cy) = (self.w as f32 * 0.5, self.h as f32 * 0.5);
        Vec2::new(cx * cos - cy * sin, cx * sin + cy * cos) + pose.position
    }

    /// Axis-aligned bounds of the rotated buffer
    pub fn world_bounds(&self, pose: &BodyPose) -> TileRect {
        let (sin, cos) = pose.angle.sin_cos();
        let corners = [
            Vec2::ZERO,
            Vec2::new(self.w as f32, 0.0),
            Vec2::new(self.w as f32, self.h as f32),
            Vec2::new(0.0, self.h as f32),
        ];
        let mut min = Vec2::splat(f32::MAX);
        let mut max = Vec2::splat(f32::MIN);
        for c in corners {
            let p = Vec2::new(c.x * cos - c.y * sin, c.x * sin + c.y * cos) + pose.position;
            min = min.min(p);
            max = max.max(p);
        }
        TileRect::from_corners(min.floor().as_ivec2(), max.ceil().as_ivec2())
    }
}

/// Body transform and velocity sampled from the physics engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyPose {
    pub position: Vec2,
    pub angle: f32,
    pub linvel: Vec2,
}

impl BodyPose {
    pub fn new(position: Vec2, angle: f32) -> Self {
        Self {
            position,
            angle,
            linvel: Vec2::ZERO,
        }
    }
}

/// Whether the carve check may lift a tile out of the terrain
fn is_carvable(materials: &Materials, tile: &MaterialInstance) -> bool {
    materials.physics(tile.material) == PhysicsType::Solid
        && tile.material != MaterialId::TEST_SOLID
        && tile.material != MaterialId::CLOUD
}

/// 4-way flood fill over carvable solid tiles, stopping at `cap` tiles
pub fn flood_fill(grid: &TileGrid, materials: &Materials, start: IVec2, cap: usize) -> Vec<IVec2> {
    let mut region = Vec::new();
    if !grid.get(start.x, start.y).is_some_and(|t| is_carvable(materials, t)) {
        return region;
    }

    let mut seen = AHashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);

    while let Some(pos) = queue.pop_front() {
        region.push(pos);
        if region.len() >= cap {
            break;
        }
        for offset in [IVec2::X, IVec2::NEG_X, IVec2::Y, IVec2::NEG_Y] {
            let next = pos + offset;
            if seen.contains(&next) {
                continue;
            }
            if grid.get(next.x, next.y).is_some_and(|t| is_carvable(materials, t)) {
                seen.insert(next);
                queue.push_back(next);
            }
        }
    }
    region
}

/// Tiles lifted out of the grid
#[derive(Debug, Clone)]
pub struct CarvedRegion {
    pub rect: TileRect,
    /// Row-major buffer over `rect`
    pub tiles: Vec<Option<MaterialInstance>>,
}

/// Move the listed tiles out of the grid, leaving dirty AIR behind
///
/// Air and off-grid cells are ignored. None when nothing was carved.
pub fn carve(grid: &mut TileGrid, cells: &[IVec2]) -> Option<CarvedRegion> {
    let solid: Vec<IVec2> = cells
        .iter()
        .copied()
        .filter(|p| grid.get(p.x, p.y).is_some_and(|t| !t.is_air()))
        .collect();
    let first = solid.first()?;

    let (mut min, mut max) = (*first, *first);
    for p in &solid {
        min = min.min(*p);
        max = max.max(*p);
    }
    let rect = TileRect::from_corners(min, max + IVec2::ONE);

    let mut tiles = vec![None; (rect.w * rect.h) as usize];
    for p in solid {
        if let Some(tile) = grid.get(p.x, p.y).copied() {
            tiles[((p.y - rect.y) * rect.w + (p.x - rect.x)) as usize] = Some(tile);
            grid.set(p.x, p.y, MaterialInstance::AIR);
        }
    }
    Some(CarvedRegion { rect, tiles })
}

/// What a settle pass did
#[derive(Debug, Default)]
pub struct SettleOutcome {
    /// Particles to add to the world
    pub ejected: Vec<CellData>,
    /// Body tiles written into the grid
    pub welded: usize,
    /// Velocity factors to apply to the body, per axis
    pub damping: Option<(f32, f32)>,
}

impl SettleOutcome {
    fn damp(&mut self, fx: f32, fy: f32) {
        let (x, y) = self.damping.unwrap_or((1.0, 1.0));
        self.damping = Some((x * fx, y * fy));
    }
}

/// Project a body's tiles onto the grid
///
/// Loose matter under the body is pushed out as particles and slows the body
/// down. With `weld`, tiles over AIR are written into the grid and removed
/// from the buffer, and tiles over anything else occupied are ejected as
/// particles. Cells projected outside the grid are left alone.
pub fn settle(
    body: &mut RigidBody,
    pose: &BodyPose,
    grid: &mut TileGrid,
    materials: &Materials,
    weld: bool,
) -> SettleOutcome {
    let mut outcome = SettleOutcome::default();
    let push = Vec2::new(pose.linvel.x / 60.0, (pose.linvel.y / 60.0).min(0.0) - 1.0);

    for ty in 0..body.h {
        for tx in 0..body.w {
            let slot = (ty * body.w + tx) as usize;
            let Some(tile) = body.tiles[slot] else {
                continue;
            };
            let at = RigidBody::project(tx, ty, pose);
            let Some(under) = grid.get(at.x, at.y).copied() else {
                continue;
            };

            if under.is_air() {
                if weld {
                    grid.set(at.x, at.y, tile);
                    body.tiles[slot] = None;
                    outcome.welded += 1;
                }
                continue;
            }

            match materials.physics(under.material) {
                PhysicsType::Sand => {
                    grid.set(at.x, at.y, MaterialInstance::AIR);
                    outcome.ejected.push(CellData::new(
                        under, at.x as f32, at.y as f32, push.x, push.y, 0.0, 0.1,
                    ));
                    outcome.damp(0.99, 0.98);
                }
                PhysicsType::Soup => {
                    grid.set(at.x, at.y, MaterialInstance::AIR);
                    outcome.ejected.push(CellData::new(
                        under, at.x as f32, at.y as f32, push.x, push.y, 0.0, 0.1,
                    ));
                    outcome.damp(0.998, 0.99);
                }
                _ if weld => {
                    body.tiles[slot] = None;
                    outcome.ejected.push(CellData::new(
                        tile, at.x as f32, at.y as f32 - 1.0, 0.0, -1.0, 0.0, 0.1,
                    ));
                }
                _ => {}
            }
        }
    }

    if weld && (outcome.welded > 0 || !outcome.ejected.is_empty()) {
        log::trace!(
            "[SETTLE] Welded {} tiles, ejected {} particles",
            outcome.welded,
            outcome.ejected.len()
        );
    }
    outcome
}
