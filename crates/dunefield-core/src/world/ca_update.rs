//! Cellular automata update logic - material movement physics
//!
//! The tick zone is swept bottom-up once per iteration, alternating the
//! horizontal direction so loose matter does not drift to one side. A tile
//! only takes part in iteration `i` if its material declares more than `i`
//! iterations, and the `visited` bitmap keeps a tile that moved from being
//! processed twice in the same iteration.

use dunefield_simulation::{
    CellData, FLUID_FLOW_SPEED, FLUID_MAX_COMPRESSION, FLUID_MAX_FLOW, FLUID_MAX_VALUE,
    FLUID_MIN_FLOW, FLUID_MIN_VALUE, InteractionKind, MaterialDef, MaterialId, MaterialInstance,
    Materials, PhysicsType, SETTLE_THRESHOLD,
};

use super::grid::{TileGrid, TileRect};
use super::{SimStats, WorldRng};

/// Highest per-material iteration count honoured by the sweep
pub const MAX_ITERATIONS: u8 = 6;

/// Free fall distance after which a sand tile leaves the grid as a particle
const DETACH_CLEARANCE: i32 = 4;

/// Amount of liquid a tile can hold given the amount in the tile below
pub fn vertical_flow(remaining: f32, destination: f32) -> f32 {
    let sum = remaining + destination;
    if sum <= FLUID_MAX_VALUE {
        FLUID_MAX_VALUE
    } else if sum < 2.0 * FLUID_MAX_VALUE + FLUID_MAX_COMPRESSION {
        (FLUID_MAX_VALUE * FLUID_MAX_VALUE + sum * FLUID_MAX_COMPRESSION)
            / (FLUID_MAX_VALUE + FLUID_MAX_COMPRESSION)
    } else {
        (sum + FLUID_MAX_COMPRESSION) / 2.0
    }
}

/// Cellular automata updater - handles material movement physics
pub struct CellularAutomataUpdater;

impl CellularAutomataUpdater {
    /// Run every iteration of the sweep over `zone`
    ///
    /// Tiles that leave the grid (free-falling sand, fire embers) are pushed
    /// onto `spawned` for the caller to turn into particles.
    pub fn update<R: WorldRng>(
        grid: &mut TileGrid,
        zone: TileRect,
        materials: &Materials,
        tick: u64,
        spawned: &mut Vec<CellData>,
        stats: &mut dyn SimStats,
        rng: &mut R,
    ) {
        let Some(zone) = zone.intersection(&grid.rect()) else {
            return;
        };
        grid.rotate_flow();

        let mut sweep = Sweep {
            grid,
            materials,
            spawned,
            stats,
            rng,
            iteration: 0,
        };

        for iteration in 0..MAX_ITERATIONS {
            sweep.iteration = iteration;
            sweep.grid.clear_visited();
            let reverse_x = (tick + iteration as u64) % 2 == 1;

            for y in (zone.y..zone.bottom()).rev() {
                for i in 0..zone.w {
                    let x = if reverse_x {
                        zone.right() - 1 - i
                    } else {
                        zone.x + i
                    };
                    sweep.update_tile(x, y);
                }
            }

            sweep.apply_fluid_diffs(zone);
        }
    }
}

/// Mutable state shared by every tile update in one sweep
pub(crate) struct Sweep<'a, R: WorldRng> {
    pub(crate) grid: &'a mut TileGrid,
    pub(crate) materials: &'a Materials,
    pub(crate) spawned: &'a mut Vec<CellData>,
    pub(crate) stats: &'a mut dyn SimStats,
    pub(crate) rng: &'a mut R,
    pub(crate) iteration: u8,
}

impl<R: WorldRng> Sweep<'_, R> {
    pub(crate) fn update_tile(&mut self, x: i32, y: i32) {
        let Some(index) = self.grid.index(x, y) else {
            return;
        };
        if self.grid.visited[index] {
            return;
        }
        let tile = self.grid.tiles[index];
        if tile.is_air() {
            return;
        }
        let materials = self.materials;
        let def = materials.get(tile.material);
        if self.iteration >= def.iterations {
            return;
        }
        self.grid.visited[index] = true;

        match def.physics {
            PhysicsType::Sand => self.update_sand(x, y, index, def),
            PhysicsType::Soup => self.update_soup(x, y, index, def),
            PhysicsType::Gas => self.update_gas(x, y, index),
            PhysicsType::Passable if tile.material == MaterialId::FIRE => {
                self.update_fire(x, y, index)
            }
            _ => {}
        }
    }

    fn tile(&self, x: i32, y: i32) -> Option<MaterialInstance> {
        self.grid.get(x, y).copied()
    }

    fn is_air(&self, x: i32, y: i32) -> bool {
        self.grid.get(x, y).is_some_and(|t| t.is_air())
    }

    /// Whether a loose tile of `def` may swap into (x, y)
    fn can_displace(&self, def: &MaterialDef, x: i32, y: i32) -> bool {
        let Some(target) = self.grid.get(x, y) else {
            return false;
        };
        if target.is_air() {
            return true;
        }
        let other = self.materials.get(target.material);
        matches!(
            other.physics,
            PhysicsType::Sand | PhysicsType::Soup | PhysicsType::Gas | PhysicsType::Passable
        ) && other.density < def.density
    }

    fn is_open_side(&self, x: i32, y: i32) -> bool {
        self.grid.get(x, y).is_some_and(|t| {
            !matches!(
                self.materials.physics(t.material),
                PhysicsType::Solid | PhysicsType::Object
            )
        })
    }

    /// Swap a tile into a neighbouring cell
    fn move_tile(&mut self, from: (i32, i32), to: (i32, i32)) {
        let (Some(a), Some(b)) = (self.grid.index(from.0, from.1), self.grid.index(to.0, to.1))
        else {
            return;
        };
        self.grid.tiles[a].moved = true;
        self.grid.tiles[a].settle_count = 0;
        self.grid.swap(a, b);
        self.grid.visited[b] = true;
        self.wake(from.0, from.1);
        self.stats.record_tile_moved();
    }

    /// Unfreeze settled tiles around a cell that changed
    fn wake(&mut self, x: i32, y: i32) {
        for dy in -1..=1 {
            for dx in -1..=1 {
                if let Some(tile) = self.grid.get_mut(x + dx, y + dy) {
                    tile.settle_count = 0;
                }
            }
        }
    }

    fn replace(&mut self, x: i32, y: i32, tile: MaterialInstance) {
        if self.grid.set(x, y, tile) {
            self.wake(x, y);
        }
    }

    /// Fire the interactions of the tile at (x, y) against `neighbour`
    fn interact(&mut self, x: i32, y: i32, acting: u16, neighbour: u16) -> bool {
        let materials = self.materials;
        let mut fired = false;

        for interaction in materials.get(acting).interactions_with(neighbour) {
            let (ox, oy) = interaction.offset;
            match interaction.kind {
                InteractionKind::Transform { into, radius } => {
                    let into_color = materials.get(into).color;
                    for ty in (y + oy - radius)..=(y + oy + radius) {
                        for tx in (x + ox - radius)..=(x + ox + radius) {
                            let Some(target) = self.tile(tx, ty) else {
                                continue;
                            };
                            if target.material == interaction.with {
                                self.replace(tx, ty, target.transmute(into, into_color));
                                fired = true;
                            }
                        }
                    }
                }
                InteractionKind::Spawn { material } => {
                    let (tx, ty) = (x + ox, y + oy);
                    if self.is_air(tx, ty) {
                        self.replace(tx, ty, materials.instance(material));
                        fired = true;
                    }
                }
            }
        }

        if fired {
            self.stats.record_reaction();
        }
        fired
    }

    fn update_sand(&mut self, x: i32, y: i32, index: usize, def: &MaterialDef) {
        let tile = self.grid.tiles[index];

        if let Some(below) = self.tile(x, y + 1)
            && !below.is_air()
        {
            self.interact(x, y, tile.material, below.material);
            if self.grid.tiles[index] != tile {
                return;
            }
        }

        if (1..=DETACH_CLEARANCE).all(|d| self.is_air(x, y + d)) {
            let mut falling = tile;
            falling.settle_count = 0;
            falling.moved = true;
            self.grid.set(x, y, MaterialInstance::AIR);
            self.wake(x, y);
            self.spawned
                .push(CellData::new(falling, x as f32, y as f32, 0.0, 1.0, 0.0, 0.1));
            self.stats.record_ejection();
            return;
        }

        if self.can_displace(def, x, y + 1) {
            self.move_tile((x, y), (x, y + 1));
            return;
        }

        // Landed tiles always try to slide; resting ones depend on slipperiness
        let slide = if tile.moved {
            true
        } else if tile.settle_count < SETTLE_THRESHOLD {
            let slip = def.slipperiness.max(0) as f32;
            self.rng.check_probability(slip / (slip + 40.0))
        } else {
            false
        };
        if slide {
            let dir = if self.rng.gen_bool() { 1 } else { -1 };
            for dx in [dir, -dir] {
                if self.is_open_side(x + dx, y) && self.can_displace(def, x + dx, y + 1) {
                    self.move_tile((x, y), (x + dx, y + 1));
                    return;
                }
            }
        }

        let rest = &mut self.grid.tiles[index];
        rest.moved = false;
        rest.settle_count = rest.settle_count.saturating_add(1);
    }

    fn transfer(&mut self, from: usize, to: usize, flow: f32, dx: f32, dy: f32) {
        self.grid.tiles[from].fluid_amount_diff -= flow;
        self.grid.tiles[to].fluid_amount_diff += flow;
        self.grid.tiles[to].settle_count = 0;
        self.grid.flow_x[from] += flow * dx;
        self.grid.flow_y[from] += flow * dy;
    }

    fn update_soup(&mut self, x: i32, y: i32, index: usize, def: &MaterialDef) {
        let tile = self.grid.tiles[index];
        let materials = self.materials;
        let below = self.tile(x, y + 1);

        if let Some(b) = below
            && !b.is_air()
        {
            if tile.material == MaterialId::WATER && b.material == MaterialId::LAVA {
                self.interact(x, y, tile.material, b.material);
                let steam = tile.transmute(MaterialId::STEAM, materials.get(MaterialId::STEAM).color);
                self.replace(x, y, steam);
                self.stats.record_state_change();
                return;
            }
            self.interact(x, y, tile.material, b.material);
            if self.grid.tiles[index] != tile {
                return;
            }
        }

        if tile.settle_count >= SETTLE_THRESHOLD {
            return;
        }
        let mut remaining = tile.fluid_amount;
        if remaining < FLUID_MIN_VALUE {
            return;
        }
        let start = remaining;

        // Down: fall, sink, or compress into the same liquid
        if let (Some(b), Some(below_index)) = (below, self.grid.index(x, y + 1)) {
            if b.is_air() {
                self.move_tile((x, y), (x, y + 1));
                return;
            }
            if b.material == tile.material {
                let mut flow = vertical_flow(remaining, b.fluid_amount) - b.fluid_amount;
                if b.fluid_amount > 0.0 && flow > FLUID_MIN_FLOW {
                    flow *= FLUID_FLOW_SPEED;
                }
                flow = flow.max(0.0).min(FLUID_MAX_FLOW.min(remaining));
                if flow > 0.0 {
                    remaining -= flow;
                    self.transfer(index, below_index, flow, 0.0, 1.0);
                }
            } else {
                let other = materials.get(b.material);
                let sinks = match other.physics {
                    PhysicsType::Soup => self.iteration == 0 && self.rng.one_in(10),
                    PhysicsType::Sand | PhysicsType::Gas | PhysicsType::Passable => true,
                    _ => false,
                };
                if sinks && other.density < def.density {
                    self.move_tile((x, y), (x, y + 1));
                    return;
                }
            }
        }

        // Sideways equalisation, a quarter then a third of what is left
        let dir = if self.rng.gen_bool() { 1 } else { -1 };
        for (dx, divisor) in [(dir, 4.0), (-dir, 3.0)] {
            if remaining < FLUID_MIN_VALUE {
                break;
            }
            let Some(side_index) = self.grid.index(x + dx, y) else {
                continue;
            };
            let side = self.grid.tiles[side_index];
            if side.is_air() {
                let flow = remaining / divisor;
                if flow < FLUID_MIN_FLOW {
                    continue;
                }
                let mut spill = tile.duplicate();
                spill.fluid_amount = 0.0;
                spill.fluid_amount_diff = 0.0;
                spill.settle_count = 0;
                self.grid.set(x + dx, y, spill);
                self.grid.visited[side_index] = true;
                remaining -= flow;
                self.transfer(index, side_index, flow, dx as f32, 0.0);
            } else if side.material == tile.material {
                let mut flow = (remaining - side.fluid_amount) / divisor;
                if flow > FLUID_MIN_FLOW {
                    flow *= FLUID_FLOW_SPEED;
                }
                flow = flow.max(0.0).min(remaining);
                if flow > 0.0 {
                    remaining -= flow;
                    self.transfer(index, side_index, flow, dx as f32, 0.0);
                }
            }
        }

        // Up: release compression into the same liquid above
        if remaining >= FLUID_MIN_VALUE
            && let Some(above_index) = self.grid.index(x, y - 1)
            && self.grid.tiles[above_index].material == tile.material
        {
            let above = self.grid.tiles[above_index].fluid_amount;
            let mut flow = remaining - vertical_flow(remaining, above);
            if flow > FLUID_MIN_FLOW {
                flow *= FLUID_FLOW_SPEED;
            }
            flow = flow.max(0.0).min(FLUID_MAX_FLOW.min(remaining));
            if flow > 0.0 {
                remaining -= flow;
                self.transfer(index, above_index, flow, 0.0, -1.0);
            }
        }

        let current = &mut self.grid.tiles[index];
        if (start - remaining).abs() < FLUID_MIN_VALUE {
            current.settle_count = current.settle_count.saturating_add(1);
        } else {
            current.settle_count = 0;
        }
    }

    fn update_gas(&mut self, x: i32, y: i32, index: usize) {
        let tile = self.grid.tiles[index];

        if self.is_air(x, y - 1) {
            self.move_tile((x, y), (x, y - 1));
            return;
        }

        let dir = if self.rng.gen_bool() { 1 } else { -1 };
        if self.rng.gen_bool() {
            for dx in [dir, -dir] {
                if self.is_air(x + dx, y - 1) {
                    self.move_tile((x, y), (x + dx, y - 1));
                    return;
                }
            }
        }
        for dx in [dir, -dir] {
            if self.is_air(x + dx, y) {
                self.move_tile((x, y), (x + dx, y));
                return;
            }
        }

        if tile.material == MaterialId::STEAM && !self.is_air(x, y + 1) && self.rng.one_in(10) {
            let color = self.materials.get(MaterialId::WATER).color;
            let mut water = tile.transmute(MaterialId::WATER, color);
            water.fluid_amount = FLUID_MAX_VALUE;
            self.replace(x, y, water);
            self.stats.record_state_change();
        }
    }

    fn update_fire(&mut self, x: i32, y: i32, index: usize) {
        let materials = self.materials;

        let heat = self.rng.gen_range_i32(0, 96) as u32;
        let color = 0xffff_0000 | ((0x50 + heat) << 8) | 0x10;
        self.grid.tiles[index].color = color;
        self.grid.mark_dirty(index);

        if self.rng.one_in(30) {
            let ember = materials.instance_colored(MaterialId::FIRE, color);
            let vx = self.rng.gen_f32() - 0.5;
            let vy = -1.0 - self.rng.gen_f32();
            self.spawned.push(
                CellData::new(ember, x as f32, y as f32, vx, vy, 0.0, -0.02).with_lifetime(30, 10),
            );
        }

        for (dx, dy) in [(0, -1), (1, 0), (0, 1), (-1, 0)] {
            let Some(target) = self.tile(x + dx, y + dy) else {
                continue;
            };
            if materials.get(target.material).flammable && self.rng.one_in(20) {
                self.replace(x + dx, y + dy, materials.instance(MaterialId::FIRE));
                self.stats.record_reaction();
            }
        }

        if self.rng.one_in(40) {
            self.replace(x, y, MaterialInstance::AIR);
            self.stats.record_state_change();
        }
    }

    /// Apply pending liquid transfers; liquid below the minimum evaporates
    pub(crate) fn apply_fluid_diffs(&mut self, zone: TileRect) {
        // Transfers may reach one tile past the zone edge
        let Some(area) = zone.inset(-1).intersection(&self.grid.rect()) else {
            return;
        };
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                let Some(index) = self.grid.index(x, y) else {
                    continue;
                };
                let tile = &mut self.grid.tiles[index];
                if tile.fluid_amount_diff == 0.0 {
                    continue;
                }
                let diff = tile.fluid_amount_diff;
                tile.fluid_amount += diff;
                tile.fluid_amount_diff = 0.0;

                if tile.fluid_amount < FLUID_MIN_VALUE {
                    self.grid.set(x, y, MaterialInstance::AIR);
                } else if diff.abs() > FLUID_MIN_VALUE {
                    self.grid.mark_dirty(index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::NoopStats;
    use glam::IVec2;

    /// Test RNG with scripted answers
    struct TestRng {
        bool_value: bool,
        /// Every `one_in` roll succeeds
        lucky: bool,
    }

    impl TestRng {
        fn new(bool_value: bool) -> Self {
            Self {
                bool_value,
                lucky: false,
            }
        }

        fn lucky() -> Self {
            Self {
                bool_value: true,
                lucky: true,
            }
        }
    }

    impl WorldRng for TestRng {
        fn gen_bool(&mut self) -> bool {
            self.bool_value
        }

        fn gen_f32(&mut self) -> f32 {
            0.5
        }

        fn gen_range_i32(&mut self, low: i32, high: i32) -> i32 {
            if self.lucky { low } else { (high - 1).max(low) }
        }

        fn check_probability(&mut self, _probability: f32) -> bool {
            self.lucky
        }
    }

    fn grid(w: i32, h: i32) -> TileGrid {
        TileGrid::new(IVec2::ZERO, w, h)
    }

    fn put(grid: &mut TileGrid, materials: &Materials, x: i32, y: i32, id: u16) {
        grid.set(x, y, materials.instance(id));
    }

    fn material(grid: &TileGrid, x: i32, y: i32) -> u16 {
        grid.material(x, y).unwrap_or(MaterialId::AIR)
    }

    fn run_tile(grid: &mut TileGrid, materials: &Materials, x: i32, y: i32, rng: &mut TestRng) -> Vec<CellData> {
        let mut spawned = Vec::new();
        let mut stats = NoopStats;
        let mut sweep = Sweep {
            grid,
            materials,
            spawned: &mut spawned,
            stats: &mut stats,
            rng,
            iteration: 0,
        };
        sweep.update_tile(x, y);
        sweep.apply_fluid_diffs(TileRect::new(0, 0, 64, 64));
        spawned
    }

    #[test]
    fn test_vertical_flow() {
        assert_eq!(vertical_flow(0.2, 0.1), FLUID_MAX_VALUE);
        let mid = vertical_flow(0.5, 0.3);
        assert!((mid - (0.25 + 0.8 * 0.1) / 0.6).abs() < 1e-6);
        assert!((vertical_flow(1.5, 0.5) - 1.05).abs() < 1e-6);
    }

    #[test]
    fn test_sand_falls_down() {
        let materials = Materials::new();
        let mut g = grid(8, 8);
        put(&mut g, &materials, 3, 4, MaterialId::GENERIC_SAND);
        put(&mut g, &materials, 3, 6, MaterialId::STONE);
        let id = g.get(3, 4).unwrap().id();

        run_tile(&mut g, &materials, 3, 4, &mut TestRng::new(true));

        assert_eq!(material(&g, 3, 4), MaterialId::AIR);
        assert_eq!(g.get(3, 5).unwrap().id(), id);
        assert!(g.dirty[g.index(3, 4).unwrap()]);
        assert!(g.dirty[g.index(3, 5).unwrap()]);
    }

    #[test]
    fn test_sand_detaches_in_free_fall() {
        let materials = Materials::new();
        let mut g = grid(8, 12);
        put(&mut g, &materials, 2, 1, MaterialId::GENERIC_SAND);

        let spawned = run_tile(&mut g, &materials, 2, 1, &mut TestRng::new(true));

        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].tile.material, MaterialId::GENERIC_SAND);
        assert_eq!((spawned[0].x, spawned[0].y), (2.0, 1.0));
        assert_eq!(material(&g, 2, 1), MaterialId::AIR);
    }

    #[test]
    fn test_sand_blocked_settles() {
        let materials = Materials::new();
        let mut g = grid(8, 8);
        put(&mut g, &materials, 3, 4, MaterialId::GENERIC_SAND);
        for x in 2..=4 {
            put(&mut g, &materials, x, 5, MaterialId::STONE);
        }

        for _ in 0..3 {
            g.clear_visited();
            run_tile(&mut g, &materials, 3, 4, &mut TestRng::new(true));
        }

        let sand = g.get(3, 4).unwrap();
        assert_eq!(sand.material, MaterialId::GENERIC_SAND);
        assert!(!sand.moved);
        assert_eq!(sand.settle_count, 3);
    }

    #[test]
    fn test_landed_sand_slides_diagonally() {
        let materials = Materials::new();
        let mut g = grid(8, 8);
        put(&mut g, &materials, 3, 4, MaterialId::GENERIC_SAND);
        put(&mut g, &materials, 3, 5, MaterialId::STONE);
        put(&mut g, &materials, 2, 6, MaterialId::STONE);
        put(&mut g, &materials, 4, 6, MaterialId::STONE);
        g.get_mut(3, 4).unwrap().moved = true;

        run_tile(&mut g, &materials, 3, 4, &mut TestRng::new(true));

        assert_eq!(material(&g, 4, 5), MaterialId::GENERIC_SAND);
    }

    #[test]
    fn test_sand_sinks_through_water() {
        let materials = Materials::new();
        let mut g = grid(8, 8);
        put(&mut g, &materials, 3, 4, MaterialId::GENERIC_SAND);
        put(&mut g, &materials, 3, 5, MaterialId::WATER);
        put(&mut g, &materials, 3, 6, MaterialId::STONE);

        run_tile(&mut g, &materials, 3, 4, &mut TestRng::new(true));

        assert_eq!(material(&g, 3, 5), MaterialId::GENERIC_SAND);
        assert_eq!(material(&g, 3, 4), MaterialId::WATER);
    }

    #[test]
    fn test_water_spreads_on_floor() {
        let materials = Materials::new();
        let mut g = grid(8, 8);
        for x in 0..8 {
            put(&mut g, &materials, x, 5, MaterialId::STONE);
        }
        put(&mut g, &materials, 4, 4, MaterialId::WATER);

        run_tile(&mut g, &materials, 4, 4, &mut TestRng::new(true));

        assert_eq!(material(&g, 5, 4), MaterialId::WATER);
        assert_eq!(material(&g, 3, 4), MaterialId::WATER);
        let total: f32 = (3..=5).map(|x| g.get(x, 4).unwrap().fluid_amount).sum();
        assert!((total - dunefield_simulation::FLUID_DEFAULT_AMOUNT).abs() < 1e-4);
    }

    #[test]
    fn test_water_on_lava_makes_obsidian_and_steam() {
        let materials = Materials::new();
        let mut g = grid(8, 8);
        put(&mut g, &materials, 3, 3, MaterialId::WATER);
        put(&mut g, &materials, 3, 4, MaterialId::LAVA);
        put(&mut g, &materials, 4, 4, MaterialId::LAVA);

        run_tile(&mut g, &materials, 3, 3, &mut TestRng::new(true));

        assert_eq!(material(&g, 3, 3), MaterialId::STEAM);
        assert_eq!(material(&g, 3, 4), MaterialId::OBSIDIAN);
        assert_eq!(material(&g, 4, 4), MaterialId::OBSIDIAN);
        assert_eq!(material(&g, 3, 2), MaterialId::STEAM);
    }

    #[test]
    fn test_gas_rises() {
        let materials = Materials::new();
        let mut g = grid(8, 8);
        put(&mut g, &materials, 3, 5, MaterialId::STEAM);

        run_tile(&mut g, &materials, 3, 5, &mut TestRng::new(true));

        assert_eq!(material(&g, 3, 4), MaterialId::STEAM);
        assert_eq!(material(&g, 3, 5), MaterialId::AIR);
    }

    #[test]
    fn test_fire_ignites_and_burns_out() {
        let materials = Materials::new();
        let mut g = grid(8, 8);
        put(&mut g, &materials, 3, 3, MaterialId::FIRE);
        put(&mut g, &materials, 4, 3, MaterialId::WOOD);
        put(&mut g, &materials, 2, 3, MaterialId::STONE);

        let spawned = run_tile(&mut g, &materials, 3, 3, &mut TestRng::lucky());

        assert_eq!(material(&g, 4, 3), MaterialId::FIRE);
        assert_eq!(material(&g, 2, 3), MaterialId::STONE);
        assert_eq!(material(&g, 3, 3), MaterialId::AIR);
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0].temporary);
    }

    #[test]
    fn test_full_sweep_only_touches_zone() {
        let materials = Materials::new();
        let mut g = grid(16, 16);
        for x in 0..16 {
            put(&mut g, &materials, x, 15, MaterialId::STONE);
        }
        put(&mut g, &materials, 2, 12, MaterialId::GENERIC_SAND);
        put(&mut g, &materials, 12, 12, MaterialId::GENERIC_SAND);
        g.clear_dirty();

        let mut spawned = Vec::new();
        CellularAutomataUpdater::update(
            &mut g,
            TileRect::new(0, 0, 8, 16),
            &materials,
            0,
            &mut spawned,
            &mut NoopStats,
            &mut TestRng::new(true),
        );

        assert_eq!(material(&g, 2, 14), MaterialId::GENERIC_SAND);
        // Outside the zone nothing moves
        assert_eq!(material(&g, 12, 12), MaterialId::GENERIC_SAND);
    }
}
