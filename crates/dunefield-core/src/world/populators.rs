//! Phased populator passes
//!
//! A populator runs on one chunk but may write into its 8 neighbours. Phase
//! `k` of a chunk only runs once every neighbour has reached phase `k - 1`,
//! and every neighbour write re-checks that rule so a scheduling bug fails
//! loudly instead of generating against stale data.

use glam::IVec2;
use thiserror::Error;

use dunefield_simulation::{CHUNK_H, CHUNK_W, MaterialId, MaterialInstance, Materials, PhysicsType};

use super::chunk::{Chunk, world_to_chunk_coords};
use super::chunk_store::ChunkStore;
use super::generation::{WorldGenerator, textured};
use super::rigid_body::BodyKind;
use super::rng_trait::WorldRng;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PopulateError {
    #[error("write into chunk {target} needs phase {required}, chunk is at {actual}")]
    NeighbourPhase {
        target: IVec2,
        required: i32,
        actual: i32,
    },

    #[error("tile ({x}, {y}) lies outside the populated neighbourhood")]
    OutsideNeighbourhood { x: i32, y: i32 },

    #[error("neighbours of chunk {chunk} have not reached phase {phase}")]
    NeighboursNotReady { chunk: IVec2, phase: i32 },
}

/// Which pass a populator performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulatorKind {
    /// Tunnels, caverns and liquid pools
    Cave,
    /// Ore veins inside stone
    Ore,
    /// Cobble borders where rock meets open space
    Cobble,
    /// Trees on exposed grass, with roots reaching into the chunk below
    Tree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Populator {
    pub kind: PopulatorKind,
    pub phase: i32,
}

/// Tiles stamped into the neighbourhood after a populator returns
///
/// `None` entries leave the existing tile alone.
#[derive(Debug, Clone)]
pub struct PlacedStructure {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub tiles: Vec<Option<MaterialInstance>>,
}

impl PlacedStructure {
    fn stamp(&self, hood: &mut Neighbourhood<'_>) -> Result<(), PopulateError> {
        for ly in 0..self.h {
            for lx in 0..self.w {
                if let Some(tile) = self.tiles[(ly * self.w + lx) as usize] {
                    hood.set(self.x + lx, self.y + ly, tile)?;
                }
            }
        }
        Ok(())
    }
}

/// A rigid body a populator wants instantiated (trees)
#[derive(Debug, Clone)]
pub struct BodySpawn {
    /// World position of the buffer's top-left tile
    pub x: f32,
    pub y: f32,
    pub w: i32,
    pub h: i32,
    pub tiles: Vec<Option<MaterialInstance>>,
    /// Tile the body is anchored to
    pub weld: Option<IVec2>,
    pub kind: BodyKind,
}

#[derive(Debug, Default)]
pub struct PopulateOutput {
    pub structures: Vec<PlacedStructure>,
    pub bodies: Vec<BodySpawn>,
}

/// Result of advancing one chunk by one phase
#[derive(Debug)]
pub struct PhaseAdvance {
    pub phase: i32,
    /// Neighbour chunks that received writes
    pub touched: Vec<IVec2>,
    pub bodies: Vec<BodySpawn>,
}

/// Mutable 3x3 chunk window a populator works through
pub struct Neighbourhood<'a> {
    center: IVec2,
    phase: i32,
    slots: [Option<&'a mut Chunk>; 9],
    dirty: [bool; 9],
}

impl<'a> Neighbourhood<'a> {
    /// Row-major slots with the populated chunk at index 4
    pub fn new(center: IVec2, phase: i32, slots: [Option<&'a mut Chunk>; 9]) -> Self {
        Self {
            center,
            phase,
            slots,
            dirty: [false; 9],
        }
    }

    /// Neighbourhood without neighbours (phase 0 on a worker)
    pub fn single(chunk: &'a mut Chunk, phase: i32) -> Self {
        let center = chunk.pos();
        let mut slots: [Option<&'a mut Chunk>; 9] = Default::default();
        slots[4] = Some(chunk);
        Self::new(center, phase, slots)
    }

    pub fn center(&self) -> IVec2 {
        self.center
    }

    pub fn phase(&self) -> i32 {
        self.phase
    }

    /// World coordinates of the populated chunk's top-left tile
    pub fn origin(&self) -> IVec2 {
        IVec2::new(self.center.x * CHUNK_W as i32, self.center.y * CHUNK_H as i32)
    }

    fn locate(&self, world_x: i32, world_y: i32) -> Option<(usize, usize, usize)> {
        let (chunk, local_x, local_y) = world_to_chunk_coords(world_x, world_y);
        let d = chunk - self.center;
        if d.x.abs() > 1 || d.y.abs() > 1 {
            return None;
        }
        Some((((d.y + 1) * 3 + d.x + 1) as usize, local_x, local_y))
    }

    pub fn get(&self, world_x: i32, world_y: i32) -> Option<&MaterialInstance> {
        let (slot, local_x, local_y) = self.locate(world_x, world_y)?;
        self.slots[slot]
            .as_deref()
            .map(|chunk| chunk.get_tile(local_x, local_y))
    }

    /// Write a tile, enforcing the neighbour phase rule
    pub fn set(
        &mut self,
        world_x: i32,
        world_y: i32,
        tile: MaterialInstance,
    ) -> Result<(), PopulateError> {
        let outside = PopulateError::OutsideNeighbourhood {
            x: world_x,
            y: world_y,
        };
        let Some((slot, local_x, local_y)) = self.locate(world_x, world_y) else {
            return Err(outside);
        };
        let required = self.phase - 1;
        let Some(chunk) = self.slots[slot].as_deref_mut() else {
            return Err(outside);
        };
        if slot != 4 && chunk.generation_phase < required {
            return Err(PopulateError::NeighbourPhase {
                target: chunk.pos(),
                required,
                actual: chunk.generation_phase,
            });
        }

        chunk.set_tile(local_x, local_y, tile);
        self.dirty[slot] = true;
        Ok(())
    }

    /// Neighbour chunks (not the centre) that were written to
    pub fn touched(&self) -> Vec<IVec2> {
        let mut touched = Vec::new();
        for (slot, dirty) in self.dirty.iter().enumerate() {
            if *dirty && slot != 4 {
                let slot = slot as i32;
                touched.push(self.center + IVec2::new(slot % 3 - 1, slot / 3 - 1));
            }
        }
        touched
    }
}

impl Populator {
    pub fn new(kind: PopulatorKind, phase: i32) -> Self {
        Self { kind, phase }
    }

    pub fn apply<R: WorldRng>(
        &self,
        generator: &WorldGenerator,
        materials: &Materials,
        hood: &mut Neighbourhood<'_>,
        rng: &mut R,
    ) -> Result<PopulateOutput, PopulateError> {
        match self.kind {
            PopulatorKind::Cave => carve_caves(generator, materials, hood, rng),
            PopulatorKind::Ore => place_ores(generator, materials, hood),
            PopulatorKind::Cobble => border_cobble(materials, hood),
            PopulatorKind::Tree => plant_trees(generator, materials, hood, rng),
        }
    }
}

/// Run every populator of one phase, stamping returned structures
pub fn populate_phase<R: WorldRng>(
    generator: &WorldGenerator,
    materials: &Materials,
    hood: &mut Neighbourhood<'_>,
    phase: i32,
    rng: &mut R,
) -> Result<PopulateOutput, PopulateError> {
    let mut output = PopulateOutput::default();
    for populator in generator.populators().iter().filter(|p| p.phase == phase) {
        let mut result = populator.apply(generator, materials, hood, rng)?;
        for structure in &result.structures {
            structure.stamp(hood)?;
        }
        output.structures.append(&mut result.structures);
        output.bodies.append(&mut result.bodies);
    }
    Ok(output)
}

/// True when the chunk is resident, below `max_phase`, and all 8 neighbours
/// are resident at or above its current phase
pub fn ready_to_advance(store: &ChunkStore, chunk_x: i32, chunk_y: i32, max_phase: i32) -> bool {
    let Some(chunk) = store.get(chunk_x, chunk_y) else {
        return false;
    };
    let phase = chunk.generation_phase;
    phase >= 0
        && phase < max_phase
        && store
            .neighbour_phases(chunk_x, chunk_y)
            .iter()
            .all(|p| p.is_some_and(|p| p >= phase))
}

/// Run the next phase for one resident chunk
///
/// On error the chunk keeps its previous phase.
pub fn advance_chunk(
    store: &mut ChunkStore,
    generator: &WorldGenerator,
    materials: &Materials,
    chunk_x: i32,
    chunk_y: i32,
) -> Result<PhaseAdvance, PopulateError> {
    let current = store
        .get(chunk_x, chunk_y)
        .map_or(Chunk::UNGENERATED, |c| c.generation_phase);
    let next = current + 1;
    let pos = IVec2::new(chunk_x, chunk_y);
    if !ready_to_advance(store, chunk_x, chunk_y, generator.max_phase()) {
        return Err(PopulateError::NeighboursNotReady {
            chunk: pos,
            phase: current,
        });
    }

    let mut rng = generator.chunk_rng(chunk_x, chunk_y, next);
    let mut hood = Neighbourhood::new(pos, next, store.neighbourhood_mut(chunk_x, chunk_y));
    let output = populate_phase(generator, materials, &mut hood, next, &mut rng)?;
    let touched = hood.touched();
    drop(hood);

    if let Some(chunk) = store.get_mut(chunk_x, chunk_y) {
        chunk.generation_phase = next;
        chunk.dirty = true;
    }
    log::debug!(
        "[POPULATE] Chunk {} -> phase {} ({} structures, {} bodies, {} neighbours touched)",
        pos,
        next,
        output.structures.len(),
        output.bodies.len(),
        touched.len()
    );

    Ok(PhaseAdvance {
        phase: next,
        touched,
        bodies: output.bodies,
    })
}

fn carve_caves<R: WorldRng>(
    generator: &WorldGenerator,
    materials: &Materials,
    hood: &mut Neighbourhood<'_>,
    rng: &mut R,
) -> Result<PopulateOutput, PopulateError> {
    let caves = &generator.config().caves;
    let origin = hood.origin();

    for local_x in 0..CHUNK_W as i32 {
        let world_x = origin.x + local_x;
        let surface = generator.surface_at(world_x);

        for local_y in 0..CHUNK_H as i32 {
            let world_y = origin.y + local_y;
            let depth = world_y - surface;
            if depth < caves.min_cave_depth {
                continue;
            }
            let Some(tile) = hood.get(world_x, world_y) else {
                continue;
            };
            if tile.material == MaterialId::CLOUD
                || materials.physics(tile.material) != PhysicsType::Solid
            {
                continue;
            }

            let (fx, fy) = (world_x as f32, world_y as f32);
            if generator.cave_large.get_noise_2d(fx, fy) > caves.large_threshold {
                let pool = generator.pool_noise.get_noise_2d(fx, fy) > caves.pool_threshold
                    && rng.one_in(caves.pool_chance);
                let fill = match (pool, depth > caves.lava_depth) {
                    (false, _) => MaterialId::AIR,
                    (true, true) => MaterialId::LAVA,
                    (true, false) => MaterialId::WATER,
                };
                hood.set(world_x, world_y, textured(materials, fill, world_x, world_y))?;
            } else if generator.cave_tunnels.get_noise_2d(fx, fy).abs() < caves.tunnel_width {
                hood.set(world_x, world_y, MaterialInstance::AIR)?;
            }
        }
    }

    Ok(PopulateOutput::default())
}

fn place_ores(
    generator: &WorldGenerator,
    materials: &Materials,
    hood: &mut Neighbourhood<'_>,
) -> Result<PopulateOutput, PopulateError> {
    let origin = hood.origin();

    for local_x in 0..CHUNK_W as i32 {
        let world_x = origin.x + local_x;
        let surface = generator.surface_at(world_x);

        for local_y in 0..CHUNK_H as i32 {
            let world_y = origin.y + local_y;
            if hood
                .get(world_x, world_y)
                .is_none_or(|t| t.material != MaterialId::SMOOTH_STONE)
            {
                continue;
            }
            let depth = world_y - surface;
            let ore = generator.ore_noises.iter().rev().find(|(ore, noise)| {
                depth >= ore.min_depth
                    && noise.get_noise_2d(world_x as f32, world_y as f32) > ore.threshold
            });
            if let Some((ore, _)) = ore {
                let tile = textured(materials, ore.material_id, world_x, world_y);
                hood.set(world_x, world_y, tile)?;
            }
        }
    }

    Ok(PopulateOutput::default())
}

fn border_cobble(
    materials: &Materials,
    hood: &mut Neighbourhood<'_>,
) -> Result<PopulateOutput, PopulateError> {
    let origin = hood.origin();
    let open = |hood: &Neighbourhood<'_>, x: i32, y: i32| {
        hood.get(x, y).is_some_and(|t| {
            matches!(
                materials.physics(t.material),
                PhysicsType::Air | PhysicsType::Sand
            )
        })
    };

    let mut changes = Vec::new();
    for local_y in 0..CHUNK_H as i32 {
        for local_x in 0..CHUNK_W as i32 {
            let (x, y) = (origin.x + local_x, origin.y + local_y);
            let Some(tile) = hood.get(x, y) else {
                continue;
            };
            let (flat, cobble) = match tile.material {
                MaterialId::SMOOTH_STONE => (MaterialId::FLAT_COBBLE_STONE, MaterialId::COBBLE_STONE),
                MaterialId::SMOOTH_DIRT => (MaterialId::FLAT_COBBLE_DIRT, MaterialId::COBBLE_DIRT),
                _ => continue,
            };

            if hood.get(x, y - 1).is_some_and(|t| t.is_air()) {
                changes.push((x, y, flat));
            } else if open(hood, x - 1, y) || open(hood, x + 1, y) || open(hood, x, y + 1) {
                changes.push((x, y, cobble));
            }
        }
    }

    for (x, y, material) in changes {
        hood.set(x, y, textured(materials, material, x, y))?;
    }
    Ok(PopulateOutput::default())
}

fn plant_trees<R: WorldRng>(
    generator: &WorldGenerator,
    materials: &Materials,
    hood: &mut Neighbourhood<'_>,
    rng: &mut R,
) -> Result<PopulateOutput, PopulateError> {
    let vegetation = &generator.config().vegetation;
    let origin = hood.origin();
    let mut output = PopulateOutput::default();
    let mut last_tree = i32::MIN / 2;

    for local_x in 2..CHUNK_W as i32 - 2 {
        let world_x = origin.x + local_x;
        if world_x - last_tree < vegetation.min_tree_spacing {
            continue;
        }

        let ground = (origin.y..origin.y + CHUNK_H as i32).find(|&y| {
            hood.get(world_x, y).is_some_and(|t| t.material == MaterialId::GRASS)
                && hood.get(world_x, y - 1).is_some_and(|t| t.is_air())
        });
        let Some(ground) = ground else {
            continue;
        };
        if !rng.one_in(vegetation.tree_chance) {
            continue;
        }
        last_tree = world_x;

        let trunk = rng.gen_range_i32(vegetation.trunk_height.0, vegetation.trunk_height.1 + 1);
        output
            .bodies
            .push(build_tree(materials, vegetation.canopy_radius, trunk, world_x, ground));

        let mut roots = Vec::with_capacity((3 * vegetation.root_depth) as usize);
        for _ in 0..vegetation.root_depth {
            for dx in -1..=1 {
                let root = dx == 0 || rng.one_in(2);
                roots.push(root.then(|| materials.instance(MaterialId::WOOD)));
            }
        }
        output.structures.push(PlacedStructure {
            x: world_x - 1,
            y: ground + 1,
            w: 3,
            h: vegetation.root_depth,
            tiles: roots,
        });
    }

    Ok(output)
}

/// Trunk plus round canopy, anchored on the grass tile at (`x`, `ground`)
fn build_tree(materials: &Materials, radius: i32, trunk: i32, x: i32, ground: i32) -> BodySpawn {
    let w = radius * 2 + 1;
    let h = trunk + radius;
    let left = x - radius;
    let top = ground - h;

    let mut tiles = vec![None; (w * h) as usize];
    for ly in 0..h {
        for lx in 0..w {
            let (dx, dy) = (lx - radius, ly - radius);
            let material = if ly >= radius && dx.abs() <= 1 {
                MaterialId::WOOD
            } else if dx * dx + dy * dy <= radius * radius {
                MaterialId::GRASS
            } else {
                continue;
            };
            tiles[(ly * w + lx) as usize] = Some(textured(materials, material, left + lx, top + ly));
        }
    }

    BodySpawn {
        x: left as f32,
        y: top as f32,
        w,
        h,
        tiles,
        weld: Some(IVec2::new(x, ground)),
        kind: BodyKind::Fixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dunefield_simulation::CHUNK_AREA;

    fn stone_chunk(materials: &Materials, x: i32, y: i32, phase: i32) -> Chunk {
        let mut chunk = Chunk::new(x, y);
        for tile in chunk.tiles.iter_mut() {
            *tile = materials.instance(MaterialId::SMOOTH_STONE);
        }
        chunk.generation_phase = phase;
        chunk
    }

    #[test]
    fn test_cave_carve_leaves_air_and_keeps_existing_air() {
        let materials = Materials::new();
        let generator = WorldGenerator::new(1234);
        let mut chunk = stone_chunk(&materials, 0, 0, Chunk::UNGENERATED);

        // A few pre-existing air pockets must stay untouched
        let pockets = [(3usize, 3usize), (64, 64), (127, 127)];
        for (x, y) in pockets {
            chunk.set_tile(x, y, MaterialInstance::AIR);
        }

        let mut rng = generator.chunk_rng(0, 0, 0);
        let mut hood = Neighbourhood::single(&mut chunk, 0);
        Populator::new(PopulatorKind::Cave, 0)
            .apply(&generator, &materials, &mut hood, &mut rng)
            .unwrap();

        let air = chunk.tiles.iter().filter(|t| t.is_air()).count();
        assert!(air > pockets.len(), "cave populator carved nothing");
        assert!(air < CHUNK_AREA);
        for (x, y) in pockets {
            assert!(chunk.get_tile(x, y).is_air());
        }
    }

    #[test]
    fn test_neighbour_write_rejected_below_required_phase() {
        let materials = Materials::new();
        let mut store = ChunkStore::new();
        store.put(stone_chunk(&materials, 0, 0, 1));
        store.put(stone_chunk(&materials, 1, 0, 0));

        // Phase 3 needs neighbours at 2 or more
        let mut hood = Neighbourhood::new(IVec2::ZERO, 3, store.neighbourhood_mut(0, 0));
        let err = hood
            .set(130, 5, MaterialInstance::AIR)
            .expect_err("write should be rejected");
        assert_eq!(
            err,
            PopulateError::NeighbourPhase {
                target: IVec2::new(1, 0),
                required: 2,
                actual: 0
            }
        );

        // The centre chunk itself is always writable
        assert!(hood.set(5, 5, MaterialInstance::AIR).is_ok());
        drop(hood);
        assert_eq!(store.get(1, 0).unwrap().get_tile(2, 5).material, MaterialId::SMOOTH_STONE);
    }

    #[test]
    fn test_write_outside_neighbourhood() {
        let mut chunk = Chunk::new(0, 0);
        let mut hood = Neighbourhood::single(&mut chunk, 0);
        assert_eq!(
            hood.set(-1, 0, MaterialInstance::AIR),
            Err(PopulateError::OutsideNeighbourhood { x: -1, y: 0 })
        );
        assert_eq!(
            hood.set(1000, 0, MaterialInstance::AIR),
            Err(PopulateError::OutsideNeighbourhood { x: 1000, y: 0 })
        );
    }

    #[test]
    fn test_touched_reports_neighbours() {
        let materials = Materials::new();
        let mut store = ChunkStore::new();
        for y in -1..=1 {
            for x in -1..=1 {
                store.put(stone_chunk(&materials, x, y, 0));
            }
        }
        let mut hood = Neighbourhood::new(IVec2::ZERO, 1, store.neighbourhood_mut(0, 0));
        hood.set(0, 128, MaterialInstance::AIR).unwrap();
        hood.set(-1, -1, MaterialInstance::AIR).unwrap();
        hood.set(10, 10, MaterialInstance::AIR).unwrap();

        let mut touched = hood.touched();
        touched.sort_by_key(|p| (p.y, p.x));
        assert_eq!(touched, vec![IVec2::new(-1, -1), IVec2::new(0, 1)]);
    }

    #[test]
    fn test_advance_requires_all_neighbours() {
        let materials = Materials::new();
        let generator = WorldGenerator::new(5);
        let mut store = ChunkStore::new();
        for y in -1..=1 {
            for x in -1..=1 {
                if (x, y) != (1, 1) {
                    store.put(stone_chunk(&materials, x, y, 0));
                }
            }
        }

        assert!(!ready_to_advance(&store, 0, 0, generator.max_phase()));
        assert!(advance_chunk(&mut store, &generator, &materials, 0, 0).is_err());
        assert_eq!(store.get(0, 0).unwrap().generation_phase, 0);

        store.put(stone_chunk(&materials, 1, 1, 0));
        let advance = advance_chunk(&mut store, &generator, &materials, 0, 0).unwrap();
        assert_eq!(advance.phase, 1);
        assert_eq!(store.get(0, 0).unwrap().generation_phase, 1);

        // Already at the highest phase
        assert!(!ready_to_advance(&store, 0, 0, generator.max_phase()));
    }

    #[test]
    fn test_cobble_borders_open_space() {
        let materials = Materials::new();
        let mut chunk = stone_chunk(&materials, 0, 0, 0);
        for x in 0..CHUNK_W {
            for y in 0..10 {
                chunk.set_tile(x, y, MaterialInstance::AIR);
            }
        }
        let mut hood = Neighbourhood::single(&mut chunk, 1);
        border_cobble(&materials, &mut hood).unwrap();

        assert_eq!(chunk.get_tile(40, 10).material, MaterialId::FLAT_COBBLE_STONE);
        assert_eq!(chunk.get_tile(40, 11).material, MaterialId::SMOOTH_STONE);
    }

    #[test]
    fn test_tree_shape() {
        let materials = Materials::new();
        let tree = build_tree(&materials, 3, 8, 10, 50);
        assert_eq!((tree.w, tree.h), (7, 11));
        assert_eq!(tree.weld, Some(IVec2::new(10, 50)));
        assert_eq!(tree.y + tree.h as f32, 50.0);

        // Bottom row is trunk only
        let bottom: Vec<_> = tree.tiles[(10 * 7) as usize..].iter().collect();
        assert_eq!(bottom.iter().filter(|t| t.is_some()).count(), 3);
        assert!(bottom[3].is_some_and(|t| t.material == MaterialId::WOOD));
    }

    #[test]
    fn test_phase_zero_deterministic() {
        let materials = Materials::new();
        let generator = WorldGenerator::new(99);
        let a = generator.generate_populated(&materials, 2, 1).unwrap();
        let b = generator.generate_populated(&materials, 2, 1).unwrap();
        for (x, y) in a.tiles.iter().zip(b.tiles.iter()) {
            assert_eq!(x.material, y.material);
            assert_eq!(x.color, y.color);
        }
    }
}
