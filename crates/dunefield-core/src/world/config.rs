//! World configuration - serializable parameters for streaming, simulation and generation
//!
//! Everything is RON-serializable so presets can be saved next to a world and
//! reloaded. The seed lives in [`WorldConfig`]; the same [`WorldGenConfig`]
//! with a different seed produces a different world.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use dunefield_simulation::MaterialId;

/// Top-level world configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Name used for the save directory and metadata
    pub world_name: String,
    pub seed: u64,

    /// Size of the resident rectangle in chunks (width, height)
    pub load_zone_chunks: (i32, i32),
    /// Tiles trimmed from each side of the load zone to get the tick zone
    pub tick_zone_inset: i32,
    /// Tiles added around enabled bodies to get the mesh zone
    pub mesh_zone_margin: i32,
    /// Chebyshev distance (in chunks) beyond which cached chunks are evicted
    pub unload_distance: i32,
    /// Upper bound on chunk merges per `frame()`
    pub max_merges_per_frame: usize,
    /// Upper bound on populator phase advances per generation tick
    pub max_generation_steps: usize,
    /// Ticks between collision mesh rebuilds
    pub mesh_interval_ticks: u64,
    /// Generation worker threads (0 = rayon default)
    pub worker_threads: usize,

    /// Read and write chunk files
    pub persistence_enabled: bool,
    /// Root directory for saved worlds
    pub save_dir: PathBuf,

    /// Rigid body gravity (tiles/s^2, positive is down)
    pub gravity: f32,

    pub generation: WorldGenConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            world_name: "default".to_string(),
            seed: 42,
            load_zone_chunks: (5, 4),
            tick_zone_inset: 32,
            mesh_zone_margin: 100,
            unload_distance: 16,
            max_merges_per_frame: 16,
            max_generation_steps: 5,
            mesh_interval_ticks: 10,
            worker_threads: 0,
            persistence_enabled: true,
            save_dir: PathBuf::from("worlds"),
            gravity: 300.0,
            generation: WorldGenConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Load a configuration preset from a RON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read world config {:?}", path))?;
        let config = ron::from_str(&contents).context("Failed to parse world config")?;
        log::info!("Loaded world config from {:?}", path);
        Ok(config)
    }

    /// Save this configuration as a RON preset
    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = ron::ser::to_string_pretty(self, Default::default())
            .context("Failed to serialize world config")?;
        std::fs::write(path, serialized)
            .with_context(|| format!("Failed to write world config {:?}", path))?;
        Ok(())
    }

    /// Directory holding this world's chunks and metadata
    pub fn world_dir(&self) -> PathBuf {
        self.save_dir.join(&self.world_name)
    }

    /// Configuration without disk access, for tests and scratch worlds
    pub fn ephemeral(seed: u64) -> Self {
        Self {
            world_name: "ephemeral".to_string(),
            seed,
            persistence_enabled: false,
            ..Default::default()
        }
    }
}

/// Complete world generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldGenConfig {
    /// Display name for this configuration
    pub name: String,
    pub terrain: TerrainParams,
    pub caves: CaveParams,
    pub ores: Vec<OreConfig>,
    pub vegetation: VegetationParams,
}

/// Surface shape and layering (y grows downwards)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainParams {
    /// Average surface row
    pub surface_y: i32,
    /// Noise layer for surface height variation
    pub height_noise: NoiseLayerConfig,
    /// Height amplitude in tiles
    pub height_scale: f32,
    /// Soft dirt band thickness below the grass
    pub dirt_depth: i32,
    /// Noise deciding between stone and dirt pockets underground
    pub rock_noise: NoiseLayerConfig,
    /// Rock noise above this becomes smooth dirt instead of stone
    pub dirt_pocket_threshold: f32,
    /// Noise layer for clouds
    pub cloud_noise: NoiseLayerConfig,
    pub cloud_threshold: f32,
    /// Rows (top, bottom) where clouds may form
    pub cloud_band: (i32, i32),
}

/// Cave carving parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaveParams {
    /// Large cavern noise layer
    pub large_caves: NoiseLayerConfig,
    /// Tunnel noise layer (tunnels follow its zero crossings)
    pub tunnels: NoiseLayerConfig,
    /// Large cavern noise above this is carved
    pub large_threshold: f32,
    /// Absolute tunnel noise below this is carved
    pub tunnel_width: f32,
    /// Minimum depth below the surface for caves
    pub min_cave_depth: i32,
    /// Noise deciding where caverns flood
    pub pool_noise: NoiseLayerConfig,
    pub pool_threshold: f32,
    /// One in this many flooded cavern tiles become liquid
    pub pool_chance: i32,
    /// Depth below the surface where pools turn from water to lava
    pub lava_depth: i32,
}

/// Individual ore generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OreConfig {
    pub material_id: u16,
    pub name: String,
    pub noise: NoiseLayerConfig,
    /// Noise above this becomes ore (higher = rarer)
    pub threshold: f32,
    /// Shallowest depth below the surface where this ore appears
    pub min_depth: i32,
}

/// Vegetation placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VegetationParams {
    /// One in this many grass columns grows a tree
    pub tree_chance: i32,
    /// Minimum horizontal distance between trees
    pub min_tree_spacing: i32,
    pub trunk_height: (i32, i32),
    pub canopy_radius: i32,
    pub root_depth: i32,
}

/// Reusable noise layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseLayerConfig {
    /// Offset added to world seed for this layer
    pub seed_offset: i32,
    pub noise_type: NoiseTypeConfig,
    /// Base frequency (lower = larger features)
    pub frequency: f32,
    pub fractal_type: FractalTypeConfig,
    /// Number of fractal octaves (1-8)
    pub octaves: u8,
    pub lacunarity: f32,
    pub gain: f32,
}

/// Noise algorithm types (maps to FastNoiseLite::NoiseType)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseTypeConfig {
    OpenSimplex2,
    OpenSimplex2S,
    Cellular,
    Perlin,
    ValueCubic,
    Value,
}

/// Fractal combination types (maps to FastNoiseLite::FractalType)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FractalTypeConfig {
    None,
    FBm,
    Ridged,
    PingPong,
}

impl Default for WorldGenConfig {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            terrain: TerrainParams::default(),
            caves: CaveParams::default(),
            ores: default_ore_configs(),
            vegetation: VegetationParams::default(),
        }
    }
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            surface_y: -40,
            height_noise: NoiseLayerConfig {
                seed_offset: 1,
                frequency: 0.004,
                fractal_type: FractalTypeConfig::FBm,
                octaves: 3,
                ..Default::default()
            },
            height_scale: 32.0,
            dirt_depth: 14,
            rock_noise: NoiseLayerConfig {
                seed_offset: 2,
                frequency: 0.02,
                ..Default::default()
            },
            dirt_pocket_threshold: 0.55,
            cloud_noise: NoiseLayerConfig {
                seed_offset: 3,
                frequency: 0.01,
                ..Default::default()
            },
            cloud_threshold: 0.6,
            cloud_band: (-420, -260),
        }
    }
}

impl Default for CaveParams {
    fn default() -> Self {
        Self {
            large_caves: NoiseLayerConfig {
                seed_offset: 4,
                frequency: 0.012,
                fractal_type: FractalTypeConfig::FBm,
                octaves: 2,
                ..Default::default()
            },
            tunnels: NoiseLayerConfig {
                seed_offset: 5,
                frequency: 0.02,
                ..Default::default()
            },
            large_threshold: 0.45,
            tunnel_width: 0.06,
            min_cave_depth: 12,
            pool_noise: NoiseLayerConfig {
                seed_offset: 6,
                frequency: 0.008,
                ..Default::default()
            },
            pool_threshold: 0.45,
            pool_chance: 3,
            lava_depth: 300,
        }
    }
}

impl Default for VegetationParams {
    fn default() -> Self {
        Self {
            tree_chance: 24,
            min_tree_spacing: 12,
            trunk_height: (10, 18),
            canopy_radius: 5,
            root_depth: 4,
        }
    }
}

impl Default for NoiseLayerConfig {
    fn default() -> Self {
        Self {
            seed_offset: 0,
            noise_type: NoiseTypeConfig::OpenSimplex2,
            frequency: 0.01,
            fractal_type: FractalTypeConfig::None,
            octaves: 1,
            lacunarity: 2.0,
            gain: 0.5,
        }
    }
}

fn default_ore_configs() -> Vec<OreConfig> {
    vec![
        OreConfig {
            material_id: MaterialId::IRON_ORE,
            name: "Iron".to_string(),
            noise: NoiseLayerConfig {
                seed_offset: 7,
                frequency: 0.06,
                ..Default::default()
            },
            threshold: 0.6,
            min_depth: 8,
        },
        OreConfig {
            material_id: MaterialId::GOLD_ORE,
            name: "Gold".to_string(),
            noise: NoiseLayerConfig {
                seed_offset: 8,
                frequency: 0.08,
                ..Default::default()
            },
            threshold: 0.72,
            min_depth: 48,
        },
    ]
}

impl NoiseTypeConfig {
    pub fn to_fastnoise(&self) -> fastnoise_lite::NoiseType {
        match self {
            NoiseTypeConfig::OpenSimplex2 => fastnoise_lite::NoiseType::OpenSimplex2,
            NoiseTypeConfig::OpenSimplex2S => fastnoise_lite::NoiseType::OpenSimplex2S,
            NoiseTypeConfig::Cellular => fastnoise_lite::NoiseType::Cellular,
            NoiseTypeConfig::Perlin => fastnoise_lite::NoiseType::Perlin,
            NoiseTypeConfig::ValueCubic => fastnoise_lite::NoiseType::ValueCubic,
            NoiseTypeConfig::Value => fastnoise_lite::NoiseType::Value,
        }
    }
}

impl FractalTypeConfig {
    pub fn to_fastnoise(&self) -> fastnoise_lite::FractalType {
        match self {
            FractalTypeConfig::None => fastnoise_lite::FractalType::None,
            FractalTypeConfig::FBm => fastnoise_lite::FractalType::FBm,
            FractalTypeConfig::Ridged => fastnoise_lite::FractalType::Ridged,
            FractalTypeConfig::PingPong => fastnoise_lite::FractalType::PingPong,
        }
    }
}

impl NoiseLayerConfig {
    /// Create a FastNoiseLite instance from this config
    pub fn to_fastnoise(&self, base_seed: u64) -> fastnoise_lite::FastNoiseLite {
        let mut noise = fastnoise_lite::FastNoiseLite::with_seed(
            (base_seed as i32).wrapping_add(self.seed_offset),
        );
        noise.set_noise_type(Some(self.noise_type.to_fastnoise()));
        noise.set_frequency(Some(self.frequency));
        noise.set_fractal_type(Some(self.fractal_type.to_fastnoise()));
        noise.set_fractal_octaves(Some(self.octaves as i32));
        noise.set_fractal_lacunarity(Some(self.lacunarity));
        noise.set_fractal_gain(Some(self.gain));
        noise
    }
}
