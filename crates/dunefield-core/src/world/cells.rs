//! Free particles (CellData)
//!
//! Particles carry a tile outside the grid under simple kinematics. When one
//! hits matter it is written back into the grid near the impact point, or
//! merged into a liquid of the same kind. Every removal runs the particle's
//! death callback exactly once.

use glam::{IVec2, Vec2};
use slotmap::SlotMap;

use dunefield_simulation::{CellData, MaterialInstance, Materials, ObjectState, PhysicsType};

use super::CellKey;
use super::grid::{TileGrid, TileRect};

/// Half size of the square searched for room to deposit a particle
const DEPOSIT_SEARCH_RADIUS: i32 = 16;

/// Distance at which target pull starts damping the velocity
const TARGET_DAMPING_RANGE: f32 = 100.0;

/// Distance at which a targeted particle counts as arrived
const TARGET_ARRIVAL: f32 = 2.0;

/// Speed limit per axis, in tiles per tick
const MAX_SPEED: f32 = 256.0;

/// Where a colliding particle ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deposit {
    /// Written into an air tile
    Place(IVec2),
    /// Poured into a tile of the same liquid
    Merge(IVec2),
}

enum Fate {
    Alive,
    Remove,
}

/// Advance every particle by one tick
///
/// Returns the number of particles removed.
pub fn update_cells(
    cells: &mut SlotMap<CellKey, CellData>,
    grid: &mut TileGrid,
    tick_zone: TileRect,
    materials: &Materials,
) -> usize {
    let mut dead = Vec::new();
    for (key, cell) in cells.iter_mut() {
        if let Fate::Remove = step(cell, grid, tick_zone, materials) {
            dead.push(key);
        }
    }

    let removed = dead.len();
    for key in dead {
        if let Some(cell) = cells.remove(key) {
            cell.kill();
        }
    }
    removed
}

fn is_open(materials: &Materials, tile: &MaterialInstance) -> bool {
    matches!(
        materials.physics(tile.material),
        PhysicsType::Air | PhysicsType::Gas | PhysicsType::Passable
    )
}

fn is_object(materials: &Materials, tile: &MaterialInstance) -> bool {
    materials.physics(tile.material) == PhysicsType::Object
}

fn step(cell: &mut CellData, grid: &mut TileGrid, tick_zone: TileRect, materials: &Materials) -> Fate {
    if cell.temporary {
        cell.lifetime -= 1;
        if cell.lifetime <= 0 {
            return Fate::Remove;
        }
    }

    if let Some((tx, ty)) = cell.target {
        let delta = Vec2::new(tx - cell.x, ty - cell.y);
        let distance = delta.length();
        if distance < TARGET_ARRIVAL {
            return Fate::Remove;
        }
        if distance < TARGET_DAMPING_RANGE {
            cell.vx *= 0.9;
            cell.vy *= 0.9;
        }
        let pull = delta / distance * cell.target_force;
        cell.vx += pull.x;
        cell.vy += pull.y;
    }

    let (ix, iy) = (cell.x.floor() as i32, cell.y.floor() as i32);
    if !grid.contains(ix, iy) {
        return Fate::Remove;
    }
    if !tick_zone.contains(ix, iy) {
        return Fate::Alive;
    }

    cell.vx += cell.ax;
    cell.vy += cell.ay;
    if !cell.vx.is_finite() || !cell.vy.is_finite() {
        return Fate::Remove;
    }
    cell.vx = cell.vx.clamp(-MAX_SPEED, MAX_SPEED);
    cell.vy = cell.vy.clamp(-MAX_SPEED, MAX_SPEED);

    if cell.object_state == ObjectState::Unknown {
        let spawned_in_object = grid.get(ix, iy).is_some_and(|t| is_object(materials, t));
        cell.object_state = if spawned_in_object {
            ObjectState::Inside
        } else {
            ObjectState::Free
        };
    }

    let div = (cell.vx.abs() + cell.vy.abs()) as i32 + 1;
    let (sx, sy) = (cell.vx / div as f32, cell.vy / div as f32);
    let mut last_air = grid
        .get(ix, iy)
        .filter(|t| t.is_air())
        .map(|_| IVec2::new(ix, iy));

    for _ in 0..div {
        let (nx, ny) = (cell.x + sx, cell.y + sy);
        let at = IVec2::new(nx.floor() as i32, ny.floor() as i32);
        let Some(tile) = grid.get(at.x, at.y) else {
            return Fate::Remove;
        };

        // Targeted particles fly through matter
        if cell.target.is_some() || is_open(materials, tile) {
            if tile.is_air() {
                last_air = Some(at);
            }
            if cell.object_state == ObjectState::Inside && !is_object(materials, tile) {
                cell.object_state = ObjectState::Free;
            }
            cell.x = nx;
            cell.y = ny;
            continue;
        }

        // Matter thrown out of a body leaves it before it can collide
        if cell.object_state == ObjectState::Inside && is_object(materials, tile) {
            cell.x = nx;
            cell.y = ny;
            continue;
        }
        cell.object_state = ObjectState::Free;

        return collide(cell, grid, materials, at, last_air);
    }
    Fate::Alive
}

fn collide(
    cell: &mut CellData,
    grid: &mut TileGrid,
    materials: &Materials,
    impact: IVec2,
    last_air: Option<IVec2>,
) -> Fate {
    if cell.temporary {
        return Fate::Remove;
    }

    let deposit = last_air
        .filter(|p| grid.get(p.x, p.y).is_some_and(|t| t.is_air()))
        .map(Deposit::Place)
        .or_else(|| find_deposit(grid, materials, impact, &cell.tile));

    match deposit {
        Some(Deposit::Place(p)) => {
            let mut tile = cell.tile;
            tile.settle_count = 0;
            tile.moved = true;
            grid.set(p.x, p.y, tile);
            Fate::Remove
        }
        Some(Deposit::Merge(p)) => {
            if let Some(index) = grid.index(p.x, p.y) {
                grid.tiles[index].fluid_amount += cell.tile.fluid_amount;
                grid.tiles[index].settle_count = 0;
                grid.mark_dirty(index);
            }
            Fate::Remove
        }
        None => {
            cell.vy = -4.0;
            cell.y -= 16.0;
            Fate::Alive
        }
    }
}

/// Search outward from `around` for room to put `tile`
///
/// Liquids may also pour into a tile of the same liquid.
pub fn find_deposit(grid: &TileGrid, materials: &Materials, around: IVec2, tile: &MaterialInstance) -> Option<Deposit> {
    let liquid = materials.physics(tile.material) == PhysicsType::Soup;

    for radius in 0..=DEPOSIT_SEARCH_RADIUS {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx.abs() != radius && dy.abs() != radius {
                    continue;
                }
                let p = around + IVec2::new(dx, dy);
                let Some(there) = grid.get(p.x, p.y) else {
                    continue;
                };
                if there.is_air() {
                    return Some(Deposit::Place(p));
                }
                if liquid && there.material == tile.material {
                    return Some(Deposit::Merge(p));
                }
            }
        }
    }
    None
}

/// Particle colours over `rect`, alpha scaled by fade (0 where empty)
pub fn particle_pixels(cells: &SlotMap<CellKey, CellData>, rect: TileRect) -> Vec<u32> {
    let mut pixels = vec![0u32; (rect.w.max(0) * rect.h.max(0)) as usize];
    for cell in cells.values() {
        let (x, y) = (cell.x.floor() as i32, cell.y.floor() as i32);
        if !rect.contains(x, y) {
            continue;
        }
        let alpha = ((cell.tile.color >> 24) as f32 * cell.fade_factor()) as u32;
        pixels[((y - rect.y) * rect.w + (x - rect.x)) as usize] = (alpha << 24) | (cell.tile.color & 0x00ff_ffff);
    }
    pixels
}
