//! Base terrain generation (phase 0)

use fastnoise_lite::FastNoiseLite;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

use dunefield_simulation::{CHUNK_H, CHUNK_W, MaterialId, MaterialInstance, Materials};

use super::chunk::{Biome, Chunk};
use super::config::{OreConfig, WorldGenConfig};
use super::populators::{PopulateError, Populator, PopulatorKind, populate_phase};

const SKY_TOP: u32 = 0xff6fa8dc;
const SKY_BOTTOM: u32 = 0xffb4d7f0;
const CAVE_BACKGROUND: u32 = 0xff2b2520;

/// Depth below the surface where the underground counts as caverns
const CAVERN_DEPTH: i32 = 400;

/// Noise-driven terrain generator plus the ordered populator list
///
/// Holds only immutable noise state, so one instance is shared by all
/// generation workers.
pub struct WorldGenerator {
    pub seed: u64,
    config: WorldGenConfig,

    height_noise: FastNoiseLite,
    rock_noise: FastNoiseLite,
    cloud_noise: FastNoiseLite,
    pub(crate) cave_large: FastNoiseLite,
    pub(crate) cave_tunnels: FastNoiseLite,
    pub(crate) pool_noise: FastNoiseLite,
    pub(crate) ore_noises: Vec<(OreConfig, FastNoiseLite)>,

    populators: Vec<Populator>,
}

impl WorldGenerator {
    /// Create a generator with the default configuration
    pub fn new(seed: u64) -> Self {
        Self::from_config(seed, WorldGenConfig::default())
    }

    pub fn from_config(seed: u64, config: WorldGenConfig) -> Self {
        let height_noise = config.terrain.height_noise.to_fastnoise(seed);
        let rock_noise = config.terrain.rock_noise.to_fastnoise(seed);
        let cloud_noise = config.terrain.cloud_noise.to_fastnoise(seed);
        let cave_large = config.caves.large_caves.to_fastnoise(seed);
        let cave_tunnels = config.caves.tunnels.to_fastnoise(seed);
        let pool_noise = config.caves.pool_noise.to_fastnoise(seed);
        let ore_noises = config
            .ores
            .iter()
            .map(|ore| (ore.clone(), ore.noise.to_fastnoise(seed)))
            .collect();

        Self {
            seed,
            config,
            height_noise,
            rock_noise,
            cloud_noise,
            cave_large,
            cave_tunnels,
            pool_noise,
            ore_noises,
            populators: vec![
                Populator::new(PopulatorKind::Cave, 0),
                Populator::new(PopulatorKind::Ore, 0),
                Populator::new(PopulatorKind::Cobble, 1),
                Populator::new(PopulatorKind::Tree, 1),
            ],
        }
    }

    pub fn config(&self) -> &WorldGenConfig {
        &self.config
    }

    /// Ordered populator list
    pub fn populators(&self) -> &[Populator] {
        &self.populators
    }

    /// Highest phase any populator declares
    pub fn max_phase(&self) -> i32 {
        self.populators.iter().map(|p| p.phase).max().unwrap_or(0)
    }

    /// Surface row at a world column
    pub fn surface_at(&self, world_x: i32) -> i32 {
        let terrain = &self.config.terrain;
        let variation = self.height_noise.get_noise_2d(world_x as f32, 0.0) * terrain.height_scale;
        terrain.surface_y + variation as i32
    }

    /// Deterministic RNG for one chunk and phase, independent of scheduling order
    pub fn chunk_rng(&self, chunk_x: i32, chunk_y: i32, phase: i32) -> Xoshiro256StarStar {
        let mut h = self.seed ^ 0x9e37_79b9_7f4a_7c15;
        for v in [chunk_x as i64 as u64, chunk_y as i64 as u64, phase as i64 as u64] {
            h = (h ^ v).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            h ^= h >> 31;
        }
        Xoshiro256StarStar::seed_from_u64(h)
    }

    /// Base terrain fill: tiles, background layer, background colors and biomes
    pub fn generate_chunk(&self, materials: &Materials, chunk: &mut Chunk) {
        let origin = chunk.origin();
        let terrain = &self.config.terrain;

        for local_x in 0..CHUNK_W {
            let world_x = origin.x + local_x as i32;
            let surface = self.surface_at(world_x);

            for local_y in 0..CHUNK_H {
                let world_y = origin.y + local_y as i32;
                let depth = world_y - surface;
                let index = Chunk::index(local_x, local_y);

                let (material, biome) = if depth < 0 {
                    let in_band =
                        world_y >= terrain.cloud_band.0 && world_y < terrain.cloud_band.1;
                    let cloud = in_band
                        && self.cloud_noise.get_noise_2d(world_x as f32, world_y as f32 * 2.0)
                            > terrain.cloud_threshold;
                    let material = if cloud {
                        MaterialId::CLOUD
                    } else {
                        MaterialId::AIR
                    };
                    (material, Biome::Sky)
                } else if depth == 0 {
                    (MaterialId::GRASS, Biome::Surface)
                } else if depth < terrain.dirt_depth {
                    (MaterialId::SOFT_DIRT, Biome::Surface)
                } else {
                    let rock = self.rock_noise.get_noise_2d(world_x as f32, world_y as f32);
                    let material = if rock > terrain.dirt_pocket_threshold {
                        MaterialId::SMOOTH_DIRT
                    } else {
                        MaterialId::SMOOTH_STONE
                    };
                    let biome = if depth > CAVERN_DEPTH {
                        Biome::Caverns
                    } else {
                        Biome::Underground
                    };
                    (material, biome)
                };

                chunk.tiles[index] = textured(materials, material, world_x, world_y);
                chunk.biomes[index] = biome;

                if depth >= terrain.dirt_depth {
                    chunk.layer2[index] =
                        textured(materials, MaterialId::SMOOTH_STONE, world_x, world_y);
                    chunk.background[index] = CAVE_BACKGROUND;
                } else {
                    chunk.layer2[index] = MaterialInstance::AIR;
                    chunk.background[index] = sky_color(world_y, surface);
                }
            }
        }

        chunk.dirty = true;
        chunk.mesh_dirty = true;
    }

    /// Generate a chunk and run every phase-0 populator on it
    ///
    /// Phase-0 populators only see the chunk itself, so this is safe to run on
    /// a worker thread with no access to other chunks.
    pub fn generate_populated(
        &self,
        materials: &Materials,
        chunk_x: i32,
        chunk_y: i32,
    ) -> Result<Chunk, PopulateError> {
        let mut chunk = Chunk::new(chunk_x, chunk_y);
        self.generate_chunk(materials, &mut chunk);

        let mut rng = self.chunk_rng(chunk_x, chunk_y, 0);
        let mut hood = super::populators::Neighbourhood::single(&mut chunk, 0);
        let output = populate_phase(self, materials, &mut hood, 0, &mut rng)?;
        if !output.bodies.is_empty() {
            log::warn!(
                "[GEN] Chunk ({}, {}) phase 0 requested {} bodies, ignoring",
                chunk_x,
                chunk_y,
                output.bodies.len()
            );
        }

        chunk.generation_phase = 0;
        log::debug!(
            "[GEN] Chunk ({}, {}) generated - {} non-air tiles",
            chunk_x,
            chunk_y,
            chunk.count_non_air()
        );
        Ok(chunk)
    }
}

/// Instance with a small deterministic per-position color variation
pub(crate) fn textured(
    materials: &Materials,
    material: u16,
    world_x: i32,
    world_y: i32,
) -> MaterialInstance {
    if material == MaterialId::AIR {
        return MaterialInstance::AIR;
    }
    let base = materials.get(material).color;
    materials.instance_colored(material, vary_color(base, world_x, world_y))
}

fn vary_color(color: u32, x: i32, y: i32) -> u32 {
    let mut h = (x as u32).wrapping_mul(0x27d4_eb2d) ^ (y as u32).wrapping_mul(0x1656_67b1);
    h ^= h >> 15;
    let shift = (h % 17) as i32 - 8;

    let channel = |c: u32, s: u32| -> u32 {
        let v = ((c >> s) & 0xff) as i32 + shift;
        (v.clamp(0, 255) as u32) << s
    };
    (color & 0xff00_0000) | channel(color, 16) | channel(color, 8) | channel(color, 0)
}

fn sky_color(world_y: i32, surface: i32) -> u32 {
    let t = ((world_y - surface + 512) as f32 / 512.0).clamp(0.0, 1.0);
    let lerp = |s: u32| -> u32 {
        let a = ((SKY_TOP >> s) & 0xff) as f32;
        let b = ((SKY_BOTTOM >> s) & 0xff) as f32;
        ((a + (b - a) * t) as u32) << s
    };
    0xff00_0000 | lerp(16) | lerp(8) | lerp(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dunefield_simulation::PhysicsType;

    #[test]
    fn test_surface_layering() {
        let materials = Materials::new();
        let generator = WorldGenerator::new(42);
        let mut chunk = Chunk::new(0, -1);
        generator.generate_chunk(&materials, &mut chunk);

        let origin = chunk.origin();
        for local_x in [0usize, 37, 90, 127] {
            let surface = generator.surface_at(origin.x + local_x as i32);
            let local_y = surface - origin.y;
            if !(1..CHUNK_H as i32).contains(&local_y) {
                continue;
            }
            let grass = chunk.get_tile(local_x, local_y as usize);
            let above = chunk.get_tile(local_x, local_y as usize - 1);
            assert_eq!(grass.material, MaterialId::GRASS);
            assert_eq!(materials.physics(above.material), PhysicsType::Air);
        }
    }

    #[test]
    fn test_deep_chunk_is_solid() {
        let materials = Materials::new();
        let generator = WorldGenerator::new(7);
        let mut chunk = Chunk::new(3, 4);
        generator.generate_chunk(&materials, &mut chunk);

        assert_eq!(chunk.count_non_air(), dunefield_simulation::CHUNK_AREA);
        assert!(chunk.tiles.iter().all(|t| {
            t.material == MaterialId::SMOOTH_STONE || t.material == MaterialId::SMOOTH_DIRT
        }));
        assert!(chunk.biomes.iter().all(|b| *b == Biome::Underground || *b == Biome::Caverns));
    }

    #[test]
    fn test_generate_populated_sets_phase_zero() {
        let materials = Materials::new();
        let generator = WorldGenerator::new(3);
        let chunk = generator.generate_populated(&materials, 0, 1).unwrap();
        assert_eq!(chunk.generation_phase, 0);
    }

    #[test]
    fn test_chunk_rng_depends_on_inputs() {
        use crate::world::WorldRng;
        let generator = WorldGenerator::new(11);
        let a: Vec<i32> = {
            let mut rng = generator.chunk_rng(1, 2, 0);
            (0..8).map(|_| rng.gen_range_i32(0, 1_000_000)).collect()
        };
        let b: Vec<i32> = {
            let mut rng = generator.chunk_rng(1, 2, 0);
            (0..8).map(|_| rng.gen_range_i32(0, 1_000_000)).collect()
        };
        let c: Vec<i32> = {
            let mut rng = generator.chunk_rng(2, 1, 0);
            (0..8).map(|_| rng.gen_range_i32(0, 1_000_000)).collect()
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_vary_color_keeps_alpha() {
        for i in 0..64 {
            assert_eq!(vary_color(0x80112233, i, -i) & 0xff00_0000, 0x8000_0000);
        }
    }
}
