//! Chunk store - sparse cache of resident chunks keyed by chunk coordinate

use ahash::{AHashMap, AHashSet};
use glam::IVec2;
use rstar::{AABB, RTree};
use slotmap::SlotMap;

use super::ChunkKey;
use super::chunk::Chunk;

/// Wrapper for chunk position to implement R-tree traits
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct ChunkPos(IVec2);

impl rstar::Point for ChunkPos {
    type Scalar = i32;
    const DIMENSIONS: usize = 2;

    fn generate(mut generator: impl FnMut(usize) -> Self::Scalar) -> Self {
        ChunkPos(IVec2::new(generator(0), generator(1)))
    }

    fn nth(&self, index: usize) -> Self::Scalar {
        match index {
            0 => self.0.x,
            _ => self.0.y,
        }
    }

    fn nth_mut(&mut self, index: usize) -> &mut Self::Scalar {
        match index {
            0 => &mut self.0.x,
            _ => &mut self.0.y,
        }
    }
}

/// Arena of chunks with a two-level (x, then y) coordinate index
#[derive(Default)]
pub struct ChunkStore {
    chunks: SlotMap<ChunkKey, Chunk>,
    index: AHashMap<i32, AHashMap<i32, ChunkKey>>,
    spatial_index: RTree<ChunkPos>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self, cx: i32, cy: i32) -> Option<ChunkKey> {
        self.index.get(&cx).and_then(|column| column.get(&cy)).copied()
    }

    pub fn contains(&self, cx: i32, cy: i32) -> bool {
        self.key(cx, cy).is_some()
    }

    pub fn get(&self, cx: i32, cy: i32) -> Option<&Chunk> {
        self.key(cx, cy).and_then(|key| self.chunks.get(key))
    }

    pub fn get_mut(&mut self, cx: i32, cy: i32) -> Option<&mut Chunk> {
        let key = self.key(cx, cy)?;
        self.chunks.get_mut(key)
    }

    /// Insert a chunk at its own coordinates, replacing any previous one
    pub fn put(&mut self, chunk: Chunk) -> ChunkKey {
        let (cx, cy) = (chunk.x, chunk.y);
        if let Some(key) = self.key(cx, cy)
            && let Some(slot) = self.chunks.get_mut(key)
        {
            *slot = chunk;
            return key;
        }

        let key = self.chunks.insert(chunk);
        self.index.entry(cx).or_default().insert(cy, key);
        self.spatial_index.insert(ChunkPos(IVec2::new(cx, cy)));
        key
    }

    /// Remove a chunk from the store, returning it
    pub fn evict(&mut self, cx: i32, cy: i32) -> Option<Chunk> {
        let column = self.index.get_mut(&cx)?;
        let key = column.remove(&cy)?;
        if column.is_empty() {
            self.index.remove(&cx);
        }
        self.spatial_index.remove(&ChunkPos(IVec2::new(cx, cy)));
        self.chunks.remove(key)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Chunk> {
        self.chunks.values_mut()
    }

    /// Coordinates of resident chunks within a Chebyshev radius (inclusive)
    pub fn coords_within(&self, center: IVec2, radius: i32) -> Vec<IVec2> {
        let envelope = AABB::from_corners(
            ChunkPos(center - IVec2::splat(radius)),
            ChunkPos(center + IVec2::splat(radius)),
        );
        self.spatial_index
            .locate_in_envelope(&envelope)
            .map(|p| p.0)
            .collect()
    }

    /// Generation phases of the 8 neighbours (None where not resident)
    pub fn neighbour_phases(&self, cx: i32, cy: i32) -> [Option<i32>; 8] {
        let mut phases = [None; 8];
        let mut i = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                phases[i] = self.get(cx + dx, cy + dy).map(|c| c.generation_phase);
                i += 1;
            }
        }
        phases
    }

    /// Mutable access to the 3x3 block around a chunk, row-major, centre at index 4
    pub fn neighbourhood_mut(&mut self, cx: i32, cy: i32) -> [Option<&mut Chunk>; 9] {
        let mut keys = [None; 9];
        for dy in -1..=1 {
            for dx in -1..=1 {
                keys[((dy + 1) * 3 + dx + 1) as usize] = self.key(cx + dx, cy + dy);
            }
        }

        let mut slots: [Option<&mut Chunk>; 9] = Default::default();
        for (key, chunk) in self.chunks.iter_mut() {
            if let Some(i) = keys.iter().position(|k| *k == Some(key)) {
                slots[i] = Some(chunk);
            }
        }
        slots
    }

    /// Chunks farther than `unload_distance` from `center` that may be evicted now
    ///
    /// Pending coordinates are never returned, and neither is a chunk that a
    /// resident neighbour still needs as context for its next populator phase.
    pub fn eviction_candidates(
        &self,
        center: IVec2,
        unload_distance: i32,
        pending: &AHashSet<IVec2>,
    ) -> Vec<IVec2> {
        let near: AHashSet<IVec2> = self.coords_within(center, unload_distance).into_iter().collect();
        self.spatial_index
            .iter()
            .map(|p| p.0)
            .filter(|pos| !near.contains(pos) && !pending.contains(pos))
            .filter(|pos| {
                let Some(phase) = self.get(pos.x, pos.y).map(|c| c.generation_phase) else {
                    return false;
                };
                self.coords_within(*pos, 1)
                    .into_iter()
                    .filter_map(|n| self.get(n.x, n.y))
                    .all(|neighbour| neighbour.generation_phase >= phase)
            })
            .collect()
    }
}
