//! Live tile arrays for the resident rectangle (load zone)
//!
//! All public accessors take world tile coordinates. The grid keeps three
//! independent dirty arrays (tiles, layer2, background) that only the render
//! hand-off clears, plus the liquid flow field and a per-sweep visited map.

use glam::IVec2;

use dunefield_simulation::{CHUNK_H, CHUNK_W, MaterialId, MaterialInstance};

use super::chunk::Chunk;

/// Axis-aligned rectangle in world tile coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl TileRect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn from_corners(min: IVec2, max_exclusive: IVec2) -> Self {
        Self::new(min.x, min.y, max_exclusive.x - min.x, max_exclusive.y - min.y)
    }

    pub fn right(&self) -> i32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.h
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    pub fn center(&self) -> IVec2 {
        IVec2::new(self.x + self.w / 2, self.y + self.h / 2)
    }

    /// Shrink by `n` tiles on every side
    pub fn inset(&self, n: i32) -> Self {
        Self::new(self.x + n, self.y + n, (self.w - 2 * n).max(0), (self.h - 2 * n).max(0))
    }

    pub fn intersection(&self, other: &TileRect) -> Option<TileRect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        (x1 > x0 && y1 > y0).then(|| TileRect::new(x0, y0, x1 - x0, y1 - y0))
    }

    pub fn union(&self, other: &TileRect) -> TileRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        TileRect::from_corners(
            IVec2::new(self.x.min(other.x), self.y.min(other.y)),
            IVec2::new(self.right().max(other.right()), self.bottom().max(other.bottom())),
        )
    }

    /// Rectangle covered by a chunk
    pub fn of_chunk(cx: i32, cy: i32) -> TileRect {
        TileRect::new(cx * CHUNK_W as i32, cy * CHUNK_H as i32, CHUNK_W as i32, CHUNK_H as i32)
    }
}

/// The live world arrays
pub struct TileGrid {
    origin: IVec2,
    width: i32,
    height: i32,

    pub(crate) tiles: Vec<MaterialInstance>,
    pub(crate) layer2: Vec<MaterialInstance>,
    pub(crate) background: Vec<u32>,

    pub(crate) dirty: Vec<bool>,
    pub(crate) layer2_dirty: Vec<bool>,
    pub(crate) background_dirty: Vec<bool>,

    pub(crate) flow_x: Vec<f32>,
    pub(crate) flow_y: Vec<f32>,
    pub(crate) prev_flow_x: Vec<f32>,
    pub(crate) prev_flow_y: Vec<f32>,

    pub(crate) visited: Vec<bool>,
}

impl TileGrid {
    pub fn new(origin: IVec2, width: i32, height: i32) -> Self {
        let area = (width.max(0) * height.max(0)) as usize;
        Self {
            origin,
            width,
            height,
            tiles: vec![MaterialInstance::AIR; area],
            layer2: vec![MaterialInstance::AIR; area],
            background: vec![0; area],
            dirty: vec![false; area],
            layer2_dirty: vec![false; area],
            background_dirty: vec![false; area],
            flow_x: vec![0.0; area],
            flow_y: vec![0.0; area],
            prev_flow_x: vec![0.0; area],
            prev_flow_y: vec![0.0; area],
            visited: vec![false; area],
        }
    }

    pub fn origin(&self) -> IVec2 {
        self.origin
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn rect(&self) -> TileRect {
        TileRect::new(self.origin.x, self.origin.y, self.width, self.height)
    }

    /// Array index of a world tile, if resident
    #[inline]
    pub fn index(&self, x: i32, y: i32) -> Option<usize> {
        let lx = x - self.origin.x;
        let ly = y - self.origin.y;
        if lx < 0 || ly < 0 || lx >= self.width || ly >= self.height {
            return None;
        }
        Some((ly * self.width + lx) as usize)
    }

    /// World coordinates of an array index
    #[inline]
    pub fn coords(&self, index: usize) -> IVec2 {
        let i = index as i32;
        IVec2::new(i % self.width + self.origin.x, i / self.width + self.origin.y)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.index(x, y).is_some()
    }

    pub fn get(&self, x: i32, y: i32) -> Option<&MaterialInstance> {
        self.index(x, y).map(|i| &self.tiles[i])
    }

    pub fn get_mut(&mut self, x: i32, y: i32) -> Option<&mut MaterialInstance> {
        self.index(x, y).map(|i| &mut self.tiles[i])
    }

    /// Material id at a world tile (None outside the grid)
    pub fn material(&self, x: i32, y: i32) -> Option<u16> {
        self.get(x, y).map(|t| t.material)
    }

    /// Write a tile and flag it dirty. Returns false outside the grid.
    pub fn set(&mut self, x: i32, y: i32, tile: MaterialInstance) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.tiles[i] = tile;
                self.dirty[i] = true;
                true
            }
            None => false,
        }
    }

    pub fn get_layer2(&self, x: i32, y: i32) -> Option<&MaterialInstance> {
        self.index(x, y).map(|i| &self.layer2[i])
    }

    pub fn set_layer2(&mut self, x: i32, y: i32, tile: MaterialInstance) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.layer2[i] = tile;
                self.layer2_dirty[i] = true;
                true
            }
            None => false,
        }
    }

    pub fn get_background(&self, x: i32, y: i32) -> Option<u32> {
        self.index(x, y).map(|i| self.background[i])
    }

    pub fn set_background(&mut self, x: i32, y: i32, color: u32) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.background[i] = color;
                self.background_dirty[i] = true;
                true
            }
            None => false,
        }
    }

    #[inline]
    pub(crate) fn mark_dirty(&mut self, index: usize) {
        self.dirty[index] = true;
    }

    /// Swap two tiles by index, flagging both dirty
    pub(crate) fn swap(&mut self, a: usize, b: usize) {
        self.tiles.swap(a, b);
        self.dirty[a] = true;
        self.dirty[b] = true;
    }

    pub fn any_dirty(&self) -> bool {
        self.dirty.iter().any(|d| *d)
            || self.layer2_dirty.iter().any(|d| *d)
            || self.background_dirty.iter().any(|d| *d)
    }

    /// Bounding rectangle of all dirty tiles (any layer)
    pub fn dirty_bounds(&self) -> Option<TileRect> {
        let mut bounds: Option<TileRect> = None;
        for i in 0..self.tiles.len() {
            if self.dirty[i] || self.layer2_dirty[i] || self.background_dirty[i] {
                let p = self.coords(i);
                let cell = TileRect::new(p.x, p.y, 1, 1);
                bounds = Some(bounds.map_or(cell, |b| b.union(&cell)));
            }
        }
        bounds
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.fill(false);
        self.layer2_dirty.fill(false);
        self.background_dirty.fill(false);
    }

    pub(crate) fn clear_visited(&mut self) {
        self.visited.fill(false);
    }

    /// Rotate the flow field: current becomes previous, current is zeroed
    pub(crate) fn rotate_flow(&mut self) {
        std::mem::swap(&mut self.flow_x, &mut self.prev_flow_x);
        std::mem::swap(&mut self.flow_y, &mut self.prev_flow_y);
        self.flow_x.fill(0.0);
        self.flow_y.fill(0.0);
    }

    /// Copy a chunk's layers onto the grid and flag the region dirty
    pub fn write_chunk(&mut self, chunk: &Chunk) -> bool {
        let Some(area) = TileRect::of_chunk(chunk.x, chunk.y).intersection(&self.rect()) else {
            return false;
        };
        let origin = chunk.origin();
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                let local = Chunk::index((x - origin.x) as usize, (y - origin.y) as usize);
                if let Some(i) = self.index(x, y) {
                    self.tiles[i] = chunk.tiles[local];
                    self.layer2[i] = chunk.layer2[local];
                    self.background[i] = chunk.background[local];
                    self.dirty[i] = true;
                    self.layer2_dirty[i] = true;
                    self.background_dirty[i] = true;
                }
            }
        }
        true
    }

    /// Copy live tiles back into a chunk's cache, skipping loading placeholders
    ///
    /// Marks the chunk dirty when any tile differs from the cached one.
    pub fn read_chunk(&self, chunk: &mut Chunk) {
        let Some(area) = TileRect::of_chunk(chunk.x, chunk.y).intersection(&self.rect()) else {
            return;
        };
        let origin = chunk.origin();
        let mut changed = false;
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                let Some(i) = self.index(x, y) else {
                    continue;
                };
                if self.tiles[i].material == MaterialId::TEST_SOLID {
                    continue;
                }
                let local = Chunk::index((x - origin.x) as usize, (y - origin.y) as usize);
                if chunk.tiles[local] != self.tiles[i]
                    || chunk.layer2[local] != self.layer2[i]
                    || chunk.background[local] != self.background[i]
                {
                    changed = true;
                }
                chunk.tiles[local] = self.tiles[i];
                chunk.layer2[local] = self.layer2[i];
                chunk.background[local] = self.background[i];
            }
        }
        if changed {
            chunk.dirty = true;
            chunk.mesh_dirty = true;
        }
    }

    /// Fill a region with a tile value (each cell gets its own parcel)
    pub fn fill_rect(&mut self, rect: TileRect, template: &MaterialInstance) {
        let Some(area) = rect.intersection(&self.rect()) else {
            return;
        };
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                let tile = if template.is_air() {
                    MaterialInstance::AIR
                } else {
                    template.duplicate()
                };
                self.set(x, y, tile);
            }
        }
    }

    /// Move the grid to a new origin, keeping tiles at their world coordinates
    ///
    /// Cells that scroll out are dropped; newly exposed cells are filled with
    /// `fill` and flagged dirty.
    pub fn recenter(&mut self, new_origin: IVec2, fill: &MaterialInstance) {
        if new_origin == self.origin {
            return;
        }
        let fresh = TileGrid::new(new_origin, self.width, self.height);
        let old = std::mem::replace(self, fresh);
        let overlap = old.rect().intersection(&self.rect());

        for i in 0..self.tiles.len() {
            let p = self.coords(i);
            let kept = overlap
                .filter(|r| r.contains(p.x, p.y))
                .and_then(|_| old.index(p.x, p.y));
            match kept {
                Some(j) => {
                    self.tiles[i] = old.tiles[j];
                    self.layer2[i] = old.layer2[j];
                    self.background[i] = old.background[j];
                    self.dirty[i] = old.dirty[j];
                    self.layer2_dirty[i] = old.layer2_dirty[j];
                    self.background_dirty[i] = old.background_dirty[j];
                    self.flow_x[i] = old.flow_x[j];
                    self.flow_y[i] = old.flow_y[j];
                    self.prev_flow_x[i] = old.prev_flow_x[j];
                    self.prev_flow_y[i] = old.prev_flow_y[j];
                }
                None => {
                    self.tiles[i] = if fill.is_air() {
                        MaterialInstance::AIR
                    } else {
                        fill.duplicate()
                    };
                    self.dirty[i] = true;
                    self.layer2_dirty[i] = true;
                    self.background_dirty[i] = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stone() -> MaterialInstance {
        MaterialInstance::new(MaterialId::STONE, 0xff7f7f7f, 0)
    }

    #[test]
    fn test_rect_ops() {
        let a = TileRect::new(0, 0, 10, 10);
        let b = TileRect::new(5, -5, 10, 10);
        assert_eq!(a.intersection(&b), Some(TileRect::new(5, 0, 5, 5)));
        assert_eq!(a.union(&b), TileRect::new(0, -5, 15, 15));
        assert!(a.intersection(&TileRect::new(20, 20, 1, 1)).is_none());
        assert_eq!(a.inset(2), TileRect::new(2, 2, 6, 6));
    }

    #[test]
    fn test_index_with_negative_origin() {
        let grid = TileGrid::new(IVec2::new(-64, -32), 128, 64);
        assert_eq!(grid.index(-64, -32), Some(0));
        assert_eq!(grid.index(63, 31), Some(128 * 64 - 1));
        assert!(grid.index(64, 0).is_none());
        assert_eq!(grid.coords(129), IVec2::new(-63, -31));
    }

    #[test]
    fn test_set_marks_only_target_dirty() {
        let mut grid = TileGrid::new(IVec2::ZERO, 8, 8);
        assert!(grid.set(3, 4, stone()));
        assert!(!grid.set(9, 4, stone()));

        let i = grid.index(3, 4).unwrap();
        assert!(grid.dirty[i]);
        assert_eq!(grid.dirty.iter().filter(|d| **d).count(), 1);
        assert_eq!(grid.dirty_bounds(), Some(TileRect::new(3, 4, 1, 1)));

        grid.clear_dirty();
        assert!(!grid.any_dirty());
    }

    #[test]
    fn test_write_and_read_chunk() {
        let mut grid = TileGrid::new(IVec2::new(-64, 0), 256, 128);
        let mut chunk = Chunk::new(0, 0);
        let tile = stone();
        chunk.set_tile(10, 20, tile);

        assert!(grid.write_chunk(&chunk));
        assert_eq!(grid.get(10, 20), Some(&tile));

        let replacement = stone();
        grid.set(11, 20, replacement);
        chunk.dirty = false;
        grid.read_chunk(&mut chunk);
        assert!(chunk.dirty);
        assert_eq!(chunk.get_tile(11, 20), &replacement);
    }

    #[test]
    fn test_read_chunk_skips_placeholders() {
        let mut grid = TileGrid::new(IVec2::ZERO, 128, 128);
        grid.fill_rect(grid.rect(), &MaterialInstance::new(MaterialId::TEST_SOLID, 0xffff0000, 0));
        let mut chunk = Chunk::new(0, 0);
        chunk.dirty = false;
        grid.read_chunk(&mut chunk);
        assert!(!chunk.dirty);
        assert_eq!(chunk.count_non_air(), 0);
    }

    #[test]
    fn test_recenter_keeps_world_positions() {
        let mut grid = TileGrid::new(IVec2::ZERO, 16, 16);
        let tile = stone();
        grid.set(10, 10, tile);
        grid.clear_dirty();

        grid.recenter(IVec2::new(8, 0), &MaterialInstance::AIR);
        assert_eq!(grid.origin(), IVec2::new(8, 0));
        assert_eq!(grid.get(10, 10), Some(&tile));
        // Newly exposed column at x = 16..24 is dirty, kept area is not
        assert!(grid.dirty[grid.index(20, 0).unwrap()]);
        assert!(!grid.dirty[grid.index(10, 10).unwrap()]);
    }
}
