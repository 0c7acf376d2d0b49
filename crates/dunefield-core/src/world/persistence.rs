//! Chunk and world metadata persistence

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use dunefield_simulation::{CHUNK_AREA, MaterialId, MaterialInstance};

use super::chunk::{Biome, Chunk};

/// World metadata stored in world.meta file (RON format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldMetadata {
    pub world_name: String,
    pub last_opened_version: String,
    pub last_opened_time: String,
    pub seed: u64,
}

impl WorldMetadata {
    /// Metadata stamped with the current crate version and local time
    pub fn new(world_name: &str, seed: u64) -> Self {
        Self {
            world_name: world_name.to_string(),
            last_opened_version: env!("CARGO_PKG_VERSION").to_string(),
            last_opened_time: chrono::Local::now().to_rfc3339(),
            seed,
        }
    }
}

impl Default for WorldMetadata {
    fn default() -> Self {
        Self::new("default", 0)
    }
}

/// On-disk tile; instance ids are session-local and reassigned on load
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StoredTile {
    material: u16,
    color: u32,
    temperature: i32,
    fluid_amount: f32,
}

impl From<&MaterialInstance> for StoredTile {
    fn from(tile: &MaterialInstance) -> Self {
        Self {
            material: tile.material,
            color: tile.color,
            temperature: tile.temperature,
            fluid_amount: tile.fluid_amount,
        }
    }
}

impl StoredTile {
    fn restore(&self) -> MaterialInstance {
        if self.material == MaterialId::AIR {
            return MaterialInstance::AIR;
        }
        let mut tile = MaterialInstance::new(self.material, self.color, self.temperature);
        tile.fluid_amount = self.fluid_amount;
        tile
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkRecord {
    x: i32,
    y: i32,
    phase: i32,
    tiles: Vec<StoredTile>,
    layer2: Vec<StoredTile>,
    background: Vec<u32>,
    biomes: Vec<Biome>,
}

impl ChunkRecord {
    fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            x: chunk.x,
            y: chunk.y,
            phase: chunk.generation_phase,
            tiles: chunk.tiles.iter().map(StoredTile::from).collect(),
            layer2: chunk.layer2.iter().map(StoredTile::from).collect(),
            background: chunk.background.clone(),
            biomes: chunk.biomes.clone(),
        }
    }

    fn into_chunk(self) -> Result<Chunk> {
        anyhow::ensure!(
            self.tiles.len() == CHUNK_AREA
                && self.layer2.len() == CHUNK_AREA
                && self.background.len() == CHUNK_AREA
                && self.biomes.len() == CHUNK_AREA,
            "Chunk ({}, {}) record has wrong array sizes",
            self.x,
            self.y
        );

        let mut chunk = Chunk::new(self.x, self.y);
        chunk.tiles = self.tiles.iter().map(StoredTile::restore).collect();
        chunk.layer2 = self.layer2.iter().map(StoredTile::restore).collect();
        chunk.background = self.background;
        chunk.biomes = self.biomes;
        chunk.generation_phase = self.phase;
        chunk.dirty = false;
        chunk.mesh_dirty = true;
        Ok(chunk)
    }
}

/// Manages chunk save/load operations with compression
pub struct ChunkPersistence {
    world_dir: PathBuf,
}

impl ChunkPersistence {
    /// Open (and create if needed) a world directory
    pub fn new(world_dir: impl Into<PathBuf>) -> Result<Self> {
        let world_dir = world_dir.into();
        std::fs::create_dir_all(world_dir.join("chunks"))
            .context("Failed to create world directories")?;
        Ok(Self { world_dir })
    }

    pub fn world_dir(&self) -> &Path {
        &self.world_dir
    }

    /// Whether a saved file exists for this chunk
    pub fn has_chunk(&self, chunk_x: i32, chunk_y: i32) -> bool {
        self.chunk_path(chunk_x, chunk_y).exists()
    }

    /// Save a chunk to disk with compression
    pub fn write_chunk(&self, chunk: &Chunk) -> Result<()> {
        let path = self.chunk_path(chunk.x, chunk.y);

        let serialized = bincode_next::serde::encode_to_vec(
            ChunkRecord::from_chunk(chunk),
            bincode_next::config::standard(),
        )
        .context("Failed to serialize chunk")?;
        let compressed = lz4_flex::compress_prepend_size(&serialized);
        let compressed_size = compressed.len();

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, compressed).context("Failed to write chunk temp file")?;
        std::fs::rename(temp_path, &path).context("Failed to rename chunk file")?;

        log::debug!(
            "[SAVE] Chunk ({}, {}) phase {} - {} non-air tiles, {} bytes",
            chunk.x,
            chunk.y,
            chunk.generation_phase,
            chunk.count_non_air(),
            compressed_size
        );
        Ok(())
    }

    /// Read a saved chunk
    ///
    /// Errors cover both missing and corrupt files; callers regenerate either way.
    pub fn read_chunk(&self, chunk_x: i32, chunk_y: i32) -> Result<Chunk> {
        let path = self.chunk_path(chunk_x, chunk_y);
        let compressed = std::fs::read(&path)
            .with_context(|| format!("Failed to read chunk file {}", path.display()))?;
        let serialized = lz4_flex::decompress_size_prepended(&compressed)
            .context("Failed to decompress chunk")?;

        let (record, _): (ChunkRecord, _) =
            bincode_next::serde::decode_from_slice(&serialized, bincode_next::config::standard())
                .map_err(|e| anyhow::anyhow!("Failed to deserialize chunk: {:?}", e))?;
        anyhow::ensure!(
            record.x == chunk_x && record.y == chunk_y,
            "Chunk file for ({}, {}) holds chunk ({}, {})",
            chunk_x,
            chunk_y,
            record.x,
            record.y
        );

        let chunk = record.into_chunk()?;
        log::debug!(
            "[LOAD] Chunk ({}, {}) from disk - {} non-air tiles",
            chunk_x,
            chunk_y,
            chunk.count_non_air()
        );
        Ok(chunk)
    }

    fn chunk_path(&self, x: i32, y: i32) -> PathBuf {
        self.world_dir
            .join("chunks")
            .join(format!("chunk_{}_{}.bin", x, y))
    }

    /// Save world metadata to disk
    pub fn save_metadata(&self, meta: &WorldMetadata) -> Result<()> {
        let path = self.world_dir.join("world.meta");
        let serialized = ron::ser::to_string_pretty(meta, Default::default())
            .context("Failed to serialize metadata")?;
        std::fs::write(path, serialized).context("Failed to write metadata file")?;
        Ok(())
    }

    /// Load world metadata, or None when missing or unreadable
    pub fn load_metadata(&self) -> Option<WorldMetadata> {
        let path = self.world_dir.join("world.meta");
        if !path.exists() {
            log::info!("No world metadata found in {:?}", self.world_dir);
            return None;
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match ron::from_str(&contents) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    log::warn!("Failed to parse metadata: {}, using defaults", e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read metadata: {}, using defaults", e);
                None
            }
        }
    }

    /// Delete all chunks and metadata
    pub fn delete_world(world_dir: &Path) -> Result<()> {
        if world_dir.exists() {
            std::fs::remove_dir_all(world_dir).context("Failed to delete world directory")?;
            log::info!("Deleted world {:?}", world_dir);
        }
        Ok(())
    }
}
