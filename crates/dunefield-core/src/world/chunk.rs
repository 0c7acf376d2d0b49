//! Chunk - a 128x128 unit of streaming, generation and persistence

use glam::{IVec2, Vec2};
use rapier2d::prelude::RigidBodyHandle;
use serde::{Deserialize, Serialize};

use dunefield_simulation::{CHUNK_AREA, CHUNK_H, CHUNK_W, MaterialInstance};

/// Coarse region classification recorded per tile at generation time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Biome {
    #[default]
    Default,
    Sky,
    Surface,
    Underground,
    Caverns,
}

/// A fixed-size tile sub-array plus its generation state
pub struct Chunk {
    pub x: i32,
    pub y: i32,

    /// Foreground tiles
    pub tiles: Vec<MaterialInstance>,
    /// Background tile layer
    pub layer2: Vec<MaterialInstance>,
    /// Background colors (0xAARRGGBB)
    pub background: Vec<u32>,
    pub biomes: Vec<Biome>,

    /// Convex collision polygons in world coordinates
    pub polygons: Vec<Vec<Vec2>>,
    /// Static body carrying the polygons as colliders
    pub static_body: Option<RigidBodyHandle>,

    /// Highest populator phase applied (-1 = no tiles yet)
    pub generation_phase: i32,

    /// Tiles changed since the chunk was last written to disk
    pub dirty: bool,
    /// Tiles changed since the collision polygons were last rebuilt
    pub mesh_dirty: bool,
}

impl Chunk {
    /// Phase of a chunk that has not been generated or loaded
    pub const UNGENERATED: i32 = -1;

    /// Create an empty (all air) chunk
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            tiles: vec![MaterialInstance::AIR; CHUNK_AREA],
            layer2: vec![MaterialInstance::AIR; CHUNK_AREA],
            background: vec![0; CHUNK_AREA],
            biomes: vec![Biome::Default; CHUNK_AREA],
            polygons: Vec::new(),
            static_body: None,
            generation_phase: Self::UNGENERATED,
            dirty: false,
            mesh_dirty: true,
        }
    }

    pub fn pos(&self) -> IVec2 {
        IVec2::new(self.x, self.y)
    }

    /// World coordinates of the top-left tile
    pub fn origin(&self) -> IVec2 {
        IVec2::new(self.x * CHUNK_W as i32, self.y * CHUNK_H as i32)
    }

    #[inline]
    pub fn index(local_x: usize, local_y: usize) -> usize {
        local_y * CHUNK_W + local_x
    }

    pub fn get_tile(&self, local_x: usize, local_y: usize) -> &MaterialInstance {
        &self.tiles[Self::index(local_x, local_y)]
    }

    pub fn set_tile(&mut self, local_x: usize, local_y: usize, tile: MaterialInstance) {
        self.tiles[Self::index(local_x, local_y)] = tile;
        self.dirty = true;
        self.mesh_dirty = true;
    }

    pub fn get_layer2(&self, local_x: usize, local_y: usize) -> &MaterialInstance {
        &self.layer2[Self::index(local_x, local_y)]
    }

    pub fn set_layer2(&mut self, local_x: usize, local_y: usize, tile: MaterialInstance) {
        self.layer2[Self::index(local_x, local_y)] = tile;
        self.dirty = true;
    }

    /// Tile at world coordinates, if they fall inside this chunk
    pub fn tile_at_world(&self, world_x: i32, world_y: i32) -> Option<&MaterialInstance> {
        let local = IVec2::new(world_x, world_y) - self.origin();
        if local.x < 0 || local.y < 0 || local.x >= CHUNK_W as i32 || local.y >= CHUNK_H as i32 {
            return None;
        }
        Some(self.get_tile(local.x as usize, local.y as usize))
    }

    pub fn is_generated(&self) -> bool {
        self.generation_phase >= 0
    }

    /// Count non-air foreground tiles (for logging)
    pub fn count_non_air(&self) -> usize {
        self.tiles.iter().filter(|t| !t.is_air()).count()
    }

    /// Chebyshev distance in chunks to another chunk coordinate
    pub fn chebyshev_distance(&self, cx: i32, cy: i32) -> i32 {
        (self.x - cx).abs().max((self.y - cy).abs())
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("generation_phase", &self.generation_phase)
            .field("dirty", &self.dirty)
            .field("polygons", &self.polygons.len())
            .finish()
    }
}

/// Convert world tile coordinates to (chunk coordinate, local x, local y)
pub fn world_to_chunk_coords(world_x: i32, world_y: i32) -> (IVec2, usize, usize) {
    let cx = world_x.div_euclid(CHUNK_W as i32);
    let cy = world_y.div_euclid(CHUNK_H as i32);
    let lx = world_x.rem_euclid(CHUNK_W as i32) as usize;
    let ly = world_y.rem_euclid(CHUNK_H as i32) as usize;
    (IVec2::new(cx, cy), lx, ly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dunefield_simulation::MaterialId;

    #[test]
    fn test_new_chunk_is_air_and_ungenerated() {
        let chunk = Chunk::new(3, -2);
        assert_eq!(chunk.count_non_air(), 0);
        assert!(!chunk.is_generated());
        assert_eq!(chunk.origin(), IVec2::new(384, -256));
    }

    #[test]
    fn test_set_tile_marks_dirty() {
        let mut chunk = Chunk::new(0, 0);
        chunk.dirty = false;
        chunk.set_tile(5, 6, MaterialInstance::new(MaterialId::STONE, 0xff7f7f7f, 0));
        assert!(chunk.dirty);
        assert_eq!(chunk.get_tile(5, 6).material, MaterialId::STONE);
        assert_eq!(chunk.count_non_air(), 1);
    }

    #[test]
    fn test_tile_at_world() {
        let mut chunk = Chunk::new(-1, 0);
        let tile = MaterialInstance::new(MaterialId::STONE, 0, 0);
        chunk.set_tile(127, 0, tile);
        assert_eq!(chunk.tile_at_world(-1, 0), Some(&tile));
        assert!(chunk.tile_at_world(0, 0).is_none());
    }

    #[test]
    fn test_world_to_chunk_coords_negative() {
        assert_eq!(world_to_chunk_coords(0, 0), (IVec2::new(0, 0), 0, 0));
        assert_eq!(world_to_chunk_coords(-1, -1), (IVec2::new(-1, -1), 127, 127));
        assert_eq!(world_to_chunk_coords(129, -129), (IVec2::new(1, -2), 1, 127));
    }

    #[test]
    fn test_chebyshev_distance() {
        let chunk = Chunk::new(2, -3);
        assert_eq!(chunk.chebyshev_distance(0, 0), 3);
        assert_eq!(chunk.chebyshev_distance(2, -3), 0);
    }
}
