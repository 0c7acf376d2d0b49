//! World - owns the live grid, the chunk cache and every simulation system

use std::sync::Arc;

use ahash::AHashSet;
use glam::{IVec2, Vec2};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use rayon::prelude::*;
use slotmap::SlotMap;

use dunefield_simulation::{
    CHUNK_H, CHUNK_W, CellData, MaterialId, MaterialInstance, Materials, PhysicsType,
    SETTLE_THRESHOLD,
};

use super::ca_update::CellularAutomataUpdater;
use super::cells::{particle_pixels, update_cells};
use super::chunk::{Chunk, world_to_chunk_coords};
use super::chunk_loader::{ChunkLoader, LoadRequest, LoaderError, ReadyChunk};
use super::chunk_store::ChunkStore;
use super::config::WorldConfig;
use super::context::WorldContext;
use super::grid::{TileGrid, TileRect};
use super::mesh::build_polygons;
use super::persistence::WorldMetadata;
use super::physics::{DebugDraw, PhysicsWorld};
use super::populators::{BodySpawn, advance_chunk, ready_to_advance};
use super::rigid_body::{
    BodyDesc, BodyKind, BodyPose, FLOOD_FILL_CAP, RigidBody, SettleOutcome, carve, flood_fill,
    settle,
};
use super::stats::TickStats;
use super::temperature::TemperatureSimulator;
use super::{BodyKey, CellKey};

const FIXED_TIMESTEP: f32 = 1.0 / 60.0;
const MAX_STEPS_PER_FRAME: u32 = 2;

/// Solid regions up to this size are dust and get removed instead of carved
const DUST_MAX_TILES: usize = 10;

/// Dispatch/collect rounds `load_blocking` tries before giving up on retries
const MAX_BLOCKING_ROUNDS: usize = 8;

/// Chunk coordinates of the load zone, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkSpan {
    min: IVec2,
    max: IVec2,
}

impl ChunkSpan {
    fn contains(&self, pos: IVec2) -> bool {
        pos.cmpge(self.min).all() && pos.cmple(self.max).all()
    }

    /// Chebyshev distance from the span, 0 inside
    fn distance(&self, pos: IVec2) -> i32 {
        let below = (self.min - pos).max(IVec2::ZERO);
        let above = (pos - self.max).max(IVec2::ZERO);
        below.max(above).max_element()
    }
}

/// A rigid body's pixels and transform for drawing
#[derive(Debug, Clone)]
pub struct BodyRenderData {
    pub position: Vec2,
    pub angle: f32,
    pub w: i32,
    pub h: i32,
    /// Row-major colours, 0 where the buffer is empty
    pub pixels: Vec<u32>,
}

/// Everything the renderer needs after a tick
///
/// All per-tile arrays are row-major over the load zone.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub origin: IVec2,
    pub width: i32,
    pub height: i32,

    /// Tile colours (0xAARRGGBB)
    pub pixels: Vec<u32>,
    /// Emission colour, 0 for tiles that give no light
    pub emission: Vec<u32>,
    /// Liquid flow magnitude averaged over the last two sweeps
    pub flow: Vec<f32>,
    pub layer2: Vec<u32>,
    pub background: Vec<u32>,

    pub dirty: Vec<bool>,
    pub layer2_dirty: Vec<bool>,
    pub background_dirty: Vec<bool>,
    pub dirty_bounds: Option<TileRect>,

    /// Free particle colours
    pub particles: Vec<u32>,
    pub bodies: Vec<BodyRenderData>,
}

/// The simulated world
pub struct World {
    ctx: Arc<WorldContext>,

    /// Live arrays for the load zone
    grid: TileGrid,

    /// Every resident chunk, including context-only ones outside the load zone
    store: ChunkStore,

    /// Background loading and generation
    loader: ChunkLoader,

    /// Free particles
    cells: SlotMap<CellKey, CellData>,

    /// Rigid bodies carrying tiles
    bodies: SlotMap<BodyKey, RigidBody>,

    physics: PhysicsWorld,

    temperature: TemperatureSimulator,

    /// Chunk at the middle of the load zone
    center_chunk: IVec2,

    /// Region whose chunks keep their collision meshes current
    mesh_zone: TileRect,

    /// Chunks loaded only as populator context (never advanced)
    context_only: AHashSet<IVec2>,

    /// Chunks whose grid region shows loading placeholders until merged
    pending_render: AHashSet<IVec2>,

    /// Particle colours from the last tick
    particle_buffer: Vec<u32>,

    /// Body the load zone follows
    host_player: Option<BodyKey>,

    /// Placeholder written over regions that are still loading
    loading_tile: MaterialInstance,

    rng: Xoshiro256StarStar,
    tick_count: u64,

    /// Simulation time accumulator
    time_accumulator: f32,

    stats: TickStats,
}

impl World {
    /// Create a world centred on `center_chunk` and queue its load zone
    pub fn new(ctx: Arc<WorldContext>, center_chunk: IVec2) -> anyhow::Result<Self> {
        let config = &ctx.config;
        let (zone_w, zone_h) = config.load_zone_chunks;
        let grid = TileGrid::new(
            zone_origin(center_chunk, config),
            zone_w.max(1) * CHUNK_W as i32,
            zone_h.max(1) * CHUNK_H as i32,
        );
        let loader = ChunkLoader::new(config.worker_threads)?;
        let physics = PhysicsWorld::new(config.gravity);
        let loading_tile = ctx.materials.instance(MaterialId::TEST_SOLID);
        let rng = Xoshiro256StarStar::seed_from_u64(ctx.seed());

        let mut world = Self {
            ctx,
            grid,
            store: ChunkStore::new(),
            loader,
            cells: SlotMap::with_key(),
            bodies: SlotMap::with_key(),
            physics,
            temperature: TemperatureSimulator::new(),
            center_chunk,
            mesh_zone: TileRect::default(),
            context_only: AHashSet::new(),
            pending_render: AHashSet::new(),
            particle_buffer: Vec::new(),
            host_player: None,
            loading_tile,
            rng,
            tick_count: 0,
            time_accumulator: 0.0,
            stats: TickStats::default(),
        };

        world.queue_zone(None);
        log::info!(
            "World created around chunk {} ({}x{} tiles, {} chunks queued)",
            center_chunk,
            world.grid.width(),
            world.grid.height(),
            world.loader.pending_count()
        );
        Ok(world)
    }

    /// Create a world from a configuration, opening its save directory
    pub fn from_config(config: WorldConfig) -> anyhow::Result<Self> {
        let ctx = WorldContext::new(config)?;
        Self::new(ctx, IVec2::ZERO)
    }

    pub fn context(&self) -> &Arc<WorldContext> {
        &self.ctx
    }

    pub fn materials(&self) -> &Materials {
        &self.ctx.materials
    }

    pub fn config(&self) -> &WorldConfig {
        &self.ctx.config
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn loader(&self) -> &ChunkLoader {
        &self.loader
    }

    pub fn cells(&self) -> &SlotMap<CellKey, CellData> {
        &self.cells
    }

    pub fn bodies(&self) -> &SlotMap<BodyKey, RigidBody> {
        &self.bodies
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn center_chunk(&self) -> IVec2 {
        self.center_chunk
    }

    /// World rectangle backed by the live grid
    pub fn load_zone(&self) -> TileRect {
        self.grid.rect()
    }

    /// Inset of the load zone that is simulated each tick
    pub fn tick_zone(&self) -> TileRect {
        self.grid.rect().inset(self.ctx.config.tick_zone_inset)
    }

    pub fn mesh_zone(&self) -> TileRect {
        self.mesh_zone
    }

    /// Whether a resident chunk is held only as context for its neighbours
    pub fn is_context_only(&self, chunk_x: i32, chunk_y: i32) -> bool {
        self.context_only.contains(&IVec2::new(chunk_x, chunk_y))
    }

    fn zone_span(&self) -> ChunkSpan {
        let (w, h) = self.ctx.config.load_zone_chunks;
        let min = self.grid.origin() / IVec2::new(CHUNK_W as i32, CHUNK_H as i32);
        ChunkSpan {
            min,
            max: min + IVec2::new(w.max(1) - 1, h.max(1) - 1),
        }
    }

    // ===== Update loop =====

    /// Advance by `dt` seconds of wall time
    ///
    /// Streams chunks first, then runs fixed simulation steps. Returns the
    /// number of ticks run.
    pub fn update(&mut self, dt: f32) -> u32 {
        if let Some(position) = self
            .host_player
            .and_then(|key| self.body_pose(key))
            .map(|pose| pose.position)
        {
            self.set_center(position.x.floor() as i32, position.y.floor() as i32);
        }

        self.frame();
        self.tick_chunk_generation();

        // Fixed timestep simulation
        self.time_accumulator += dt;
        let mut steps = 0;
        while self.time_accumulator >= FIXED_TIMESTEP && steps < MAX_STEPS_PER_FRAME {
            self.tick();
            self.time_accumulator -= FIXED_TIMESTEP;
            steps += 1;
        }

        // Drop the backlog instead of spiralling when frames run long
        if self.time_accumulator > FIXED_TIMESTEP * 2.0 {
            self.time_accumulator = FIXED_TIMESTEP;
        }
        steps
    }

    /// Run one fixed simulation step over the tick zone
    ///
    /// Dirty flags accumulate across ticks until [`World::render_handoff`].
    pub fn tick(&mut self) {
        self.stats = TickStats {
            merged_chunks: self.stats.merged_chunks,
            ..TickStats::default()
        };
        let tick_zone = self.tick_zone();

        // 1. Enable bodies inside the tick zone and size the mesh zone
        self.update_body_zones(tick_zone);

        // 2. Rigid body physics
        self.physics.step();

        // 3. Project bodies onto the grid
        self.settle_bodies();

        // 4. Cellular automaton
        let mut spawned = Vec::new();
        CellularAutomataUpdater::update(
            &mut self.grid,
            tick_zone,
            &self.ctx.materials,
            self.tick_count,
            &mut spawned,
            &mut self.stats,
            &mut self.rng,
        );
        for cell in spawned {
            self.cells.insert(cell);
        }

        // 5. Heat conduction and temperature reactions
        self.temperature
            .update(&mut self.grid, tick_zone, &self.ctx.materials, &mut self.stats);

        // 6. Free particles
        update_cells(&mut self.cells, &mut self.grid, tick_zone, &self.ctx.materials);

        // 7. Lift loose solid regions out of the terrain
        self.carve_check(tick_zone);

        // 8. Collision meshes
        if self.tick_count % self.ctx.config.mesh_interval_ticks.max(1) == 0
            && !self.mesh_zone.is_empty()
        {
            self.remesh(self.mesh_zone);
        }

        self.particle_buffer = particle_pixels(&self.cells, self.grid.rect());
        self.stats.live_cells = self.cells.len() as u32;
        self.stats.live_bodies = self.bodies.len() as u32;
        self.tick_count += 1;
    }

    fn update_body_zones(&mut self, tick_zone: TileRect) {
        let poses = self.body_poses();
        let bodies = &self.bodies;
        let placement: Vec<(BodyKey, TileRect, bool)> = poses
            .par_iter()
            .filter_map(|(key, pose)| {
                let body = bodies.get(*key)?;
                let center = body.center(pose);
                let inside = tick_zone.contains(center.x.floor() as i32, center.y.floor() as i32);
                Some((*key, body.world_bounds(pose), inside))
            })
            .collect();

        let margin = self.ctx.config.mesh_zone_margin;
        let mut mesh_zone: Option<TileRect> = None;
        for (key, bounds, inside) in placement {
            let Some(body) = self.bodies.get_mut(key) else {
                continue;
            };
            body.enabled = inside;
            self.physics.set_enabled(body.handle, inside);
            if inside && body.kind == BodyKind::Dynamic {
                let zone = bounds.inset(-margin);
                mesh_zone = Some(mesh_zone.map_or(zone, |z| z.union(&zone)));
            }
        }
        self.mesh_zone = mesh_zone
            .and_then(|zone| zone.intersection(&self.grid.rect()))
            .unwrap_or_default();
    }

    fn settle_bodies(&mut self) {
        let keys: Vec<BodyKey> = self.bodies.keys().collect();
        for key in keys {
            let Some(body) = self.bodies.get_mut(key) else {
                continue;
            };
            if !body.enabled {
                continue;
            }
            let Some(pose) = pose_of(&self.physics, body.handle) else {
                continue;
            };

            if body.kind == BodyKind::Dynamic && self.physics.is_resting(body.handle) {
                body.rest_ticks += 1;
            } else {
                body.rest_ticks = 0;
            }
            let weld = body.kind == BodyKind::Dynamic && body.rest_ticks >= SETTLE_THRESHOLD as u32;

            let outcome = settle(body, &pose, &mut self.grid, &self.ctx.materials, weld);
            self.apply_settle(key, outcome);
        }
    }

    fn apply_settle(&mut self, key: BodyKey, outcome: SettleOutcome) {
        let Some(body) = self.bodies.get(key) else {
            return;
        };
        let (handle, empty) = (body.handle, body.is_empty());

        if let Some((fx, fy)) = outcome.damping {
            self.physics.damp_velocity(handle, fx, fy);
        }
        self.stats.ejections += outcome.ejected.len() as u32;
        for cell in outcome.ejected {
            self.cells.insert(cell);
        }
        if empty {
            log::debug!("[SETTLE] Body {:?} fully settled, removing", key);
            self.remove_body(key);
        }
    }

    fn carve_check(&mut self, tick_zone: TileRect) {
        let Some(zone) = tick_zone.intersection(&self.grid.rect()) else {
            return;
        };
        let start = IVec2::new(
            self.rng.gen_range(zone.x..zone.right()),
            self.rng.gen_range(zone.y..zone.bottom()),
        );
        let region = flood_fill(&self.grid, &self.ctx.materials, start, FLOOD_FILL_CAP);

        match region.len() {
            0 => {}
            n if n <= DUST_MAX_TILES => {
                for p in &region {
                    self.grid.set(p.x, p.y, MaterialInstance::AIR);
                }
                log::trace!("[CARVE] Removed {} tiles of floating dust at {}", n, start);
            }
            n if n < FLOOD_FILL_CAP => {
                self.carve_region(&region);
            }
            _ => {}
        }
    }

    /// Rebuild collision meshes for changed chunks overlapping `area`
    fn remesh(&mut self, area: TileRect) {
        let Some(area) = area.intersection(&self.grid.rect()) else {
            return;
        };
        let size = IVec2::new(CHUNK_W as i32, CHUNK_H as i32);
        let min = IVec2::new(area.x, area.y).div_euclid(size);
        let max = IVec2::new(area.right() - 1, area.bottom() - 1).div_euclid(size);

        let materials = &self.ctx.materials;
        let mut jobs = Vec::new();
        for cy in min.y..=max.y {
            for cx in min.x..=max.x {
                let Some(chunk) = self.store.get_mut(cx, cy) else {
                    continue;
                };
                self.grid.read_chunk(chunk);
                if !chunk.mesh_dirty {
                    continue;
                }
                let occupancy: Vec<bool> = chunk
                    .tiles
                    .iter()
                    .map(|t| {
                        matches!(
                            materials.physics(t.material),
                            PhysicsType::Solid | PhysicsType::Object
                        )
                    })
                    .collect();
                jobs.push((IVec2::new(cx, cy), occupancy));
            }
        }
        if jobs.is_empty() {
            return;
        }

        let meshes: Vec<(IVec2, Vec<Vec<Vec2>>)> = jobs
            .into_par_iter()
            .map(|(pos, occupancy)| {
                let (_, convex) = build_polygons(size.x, size.y, |x, y| {
                    occupancy[Chunk::index(x as usize, y as usize)]
                });
                let origin = (pos * size).as_vec2();
                let polygons = convex
                    .into_iter()
                    .map(|polygon| polygon.into_iter().map(|p| p + origin).collect())
                    .collect();
                (pos, polygons)
            })
            .collect();

        let rebuilt = meshes.len();
        for (pos, polygons) in meshes {
            if let Some(chunk) = self.store.get_mut(pos.x, pos.y) {
                chunk.static_body = self
                    .physics
                    .set_static_geometry(chunk.static_body.take(), &polygons);
                chunk.polygons = polygons;
                chunk.mesh_dirty = false;
            }
        }
        log::debug!("[MESH] Rebuilt collision meshes for {} chunks", rebuilt);
    }

    // ===== Streaming =====

    /// Launch queued loads and merge finished chunks, at most
    /// `max_merges_per_frame` of them
    ///
    /// Merging happens here, on the caller's thread, and writes each chunk in
    /// one call: no tick ever sees half a chunk.
    pub fn frame(&mut self) -> usize {
        self.loader.dispatch(&self.ctx);
        self.loader.collect();

        let ready = self.loader.take_ready(self.ctx.config.max_merges_per_frame);
        let merged = ready.len();
        for chunk in ready {
            self.merge(chunk);
        }
        self.stats.merged_chunks = merged as u32;
        merged
    }

    /// Load everything queued right now, ignoring the merge budget
    pub fn load_blocking(&mut self) -> usize {
        let mut merged = 0;
        for _ in 0..MAX_BLOCKING_ROUNDS {
            self.loader.dispatch(&self.ctx);
            self.loader.collect_blocking();
            let ready = self.loader.take_ready(usize::MAX);
            if ready.is_empty() && self.loader.pending_count() == 0 {
                break;
            }
            merged += ready.len();
            for chunk in ready {
                self.merge(chunk);
            }
        }
        merged
    }

    fn merge(&mut self, ready: ReadyChunk) {
        let ReadyChunk {
            request,
            chunk,
            source,
        } = ready;
        let pos = request.pos;

        let mut inserted = false;
        if let Some(chunk) = chunk {
            if self.store.contains(pos.x, pos.y) {
                log::debug!("[MERGE] Chunk {} already resident, keeping cached copy", pos);
            } else {
                self.store.put(chunk);
                inserted = true;
            }
        }
        if request.populate {
            self.context_only.remove(&pos);
        } else if inserted {
            self.context_only.insert(pos);
        }

        let render = self.pending_render.remove(&pos) || request.render;
        if render && let Some(chunk) = self.store.get(pos.x, pos.y) {
            if self.grid.write_chunk(chunk) {
                log::debug!("[MERGE] Chunk {} merged into grid ({:?})", pos, source);
            }
        }
    }

    /// Request a chunk
    ///
    /// With `render`, its region of the live grid shows a loading placeholder
    /// until the merge. `populate = false` loads it only as context for its
    /// neighbours' populators.
    pub fn queue_load_chunk(
        &mut self,
        chunk_x: i32,
        chunk_y: i32,
        populate: bool,
        render: bool,
    ) -> Result<(), LoaderError> {
        let request = LoadRequest::new(chunk_x, chunk_y, populate, render);
        let area = TileRect::of_chunk(chunk_x, chunk_y);

        if render && area.intersection(&self.grid.rect()).is_some() {
            if let Some(chunk) = self.store.get_mut(chunk_x, chunk_y) {
                self.grid.read_chunk(chunk);
            }
            self.grid.fill_rect(area, &self.loading_tile);
            self.pending_render.insert(request.pos);
        }

        if self.store.contains(chunk_x, chunk_y) {
            self.loader.request_cached(request)
        } else {
            self.loader.request(request)
        }
    }

    /// Queue every chunk of the load zone plus the context ring around it
    ///
    /// Chunks that were already inside `previous` are skipped.
    fn queue_zone(&mut self, previous: Option<ChunkSpan>) {
        let span = self.zone_span();
        let max_phase = self.ctx.generator.max_phase();
        let ring = max_phase.max(1);

        for cy in span.min.y - ring..=span.max.y + ring {
            for cx in span.min.x - ring..=span.max.x + ring {
                let pos = IVec2::new(cx, cy);
                let result = if span.contains(pos) {
                    if previous.is_some_and(|p| p.contains(pos)) {
                        continue;
                    }
                    self.queue_load_chunk(cx, cy, true, true)
                } else {
                    if self.store.contains(cx, cy) || self.loader.is_pending(pos) {
                        continue;
                    }
                    let populate = span.distance(pos) < max_phase;
                    self.queue_load_chunk(cx, cy, populate, false)
                };
                if let Err(e) = result {
                    log::trace!("[LOAD] {}", e);
                }
            }
        }
    }

    /// Move the load zone so it is centred on the chunk holding (x, y)
    ///
    /// Live tiles are saved into their cached chunks before the arrays
    /// shift by whole chunks; newly exposed chunks are queued.
    pub fn set_center(&mut self, world_x: i32, world_y: i32) {
        let (chunk, _, _) = world_to_chunk_coords(world_x, world_y);
        if chunk == self.center_chunk {
            return;
        }

        for cached in self.store.iter_mut() {
            self.grid.read_chunk(cached);
        }
        let previous = self.zone_span();
        self.center_chunk = chunk;
        self.grid
            .recenter(zone_origin(chunk, &self.ctx.config), &self.loading_tile);
        let span = self.zone_span();
        self.pending_render.retain(|pos| span.contains(*pos));

        self.queue_zone(Some(previous));
        log::info!(
            "Load zone moved to chunk {} ({} chunks pending)",
            chunk,
            self.loader.pending_count()
        );
    }

    /// Evict distant chunks, then advance ready chunks by one populator phase
    pub fn tick_chunk_generation(&mut self) {
        self.evict_distant_chunks();

        let max_phase = self.ctx.generator.max_phase();
        let center = self.center_chunk;
        let mut ready: Vec<IVec2> = self
            .store
            .coords_within(center, self.ctx.config.unload_distance)
            .into_iter()
            .filter(|pos| !self.context_only.contains(pos))
            .filter(|pos| ready_to_advance(&self.store, pos.x, pos.y, max_phase))
            .collect();
        ready.sort_by_key(|pos| ((*pos - center).abs().max_element(), pos.y, pos.x));
        ready.truncate(self.ctx.config.max_generation_steps);

        for pos in ready {
            self.advance_chunk_phase(pos);
        }
    }

    fn advance_chunk_phase(&mut self, pos: IVec2) {
        // Live tiles are authoritative for anything on the grid
        for dy in -1..=1 {
            for dx in -1..=1 {
                if let Some(chunk) = self.store.get_mut(pos.x + dx, pos.y + dy) {
                    self.grid.read_chunk(chunk);
                }
            }
        }

        let ctx = Arc::clone(&self.ctx);
        let advance = match advance_chunk(&mut self.store, &ctx.generator, &ctx.materials, pos.x, pos.y) {
            Ok(advance) => advance,
            Err(e) => {
                log::error!("[POPULATE] Chunk {} failed: {}", pos, e);
                return;
            }
        };

        for spawn in advance.bodies {
            self.spawn_body(spawn);
        }

        let mut written = vec![pos];
        written.extend(advance.touched.into_iter().filter(|c| *c != pos));
        for c in written {
            let Some(chunk) = self.store.get_mut(c.x, c.y) else {
                continue;
            };
            if !self.pending_render.contains(&c) {
                self.grid.write_chunk(chunk);
            }
            if let Some(persistence) = &ctx.persistence {
                match persistence.write_chunk(chunk) {
                    Ok(()) => chunk.dirty = false,
                    Err(e) => log::warn!("[SAVE] Failed to save chunk {}: {:#}", c, e),
                }
            }
        }
    }

    fn spawn_body(&mut self, spawn: BodySpawn) {
        let desc = BodyDesc::new(spawn.kind, spawn.x, spawn.y, spawn.w, spawn.h, spawn.tiles);
        let key = self.make_rigid_body(desc);
        if let Some(body) = self.bodies.get_mut(key) {
            body.weld = spawn.weld;
        }
    }

    fn evict_distant_chunks(&mut self) {
        let pending = self.loader.pending_coords();
        let candidates = self.store.eviction_candidates(
            self.center_chunk,
            self.ctx.config.unload_distance,
            &pending,
        );

        for pos in candidates {
            self.stash_bodies_in(pos);
            let Some(mut chunk) = self.store.evict(pos.x, pos.y) else {
                continue;
            };
            self.grid.read_chunk(&mut chunk);
            if let Some(handle) = chunk.static_body.take() {
                self.physics.remove_body(handle);
            }
            if chunk.dirty
                && let Some(persistence) = &self.ctx.persistence
                && let Err(e) = persistence.write_chunk(&chunk)
            {
                log::warn!("[SAVE] Failed to save evicted chunk {}: {:#}", pos, e);
            }
            self.loader.forget(pos);
            self.context_only.remove(&pos);
            log::debug!("[EVICT] Chunk {} unloaded (dirty: {})", pos, chunk.dirty);
        }
    }

    /// Weld bodies centred in `pos` into the cached chunks before eviction
    fn stash_bodies_in(&mut self, pos: IVec2) {
        let keys: Vec<BodyKey> = self
            .bodies
            .iter()
            .filter(|(_, body)| {
                pose_of(&self.physics, body.handle).is_some_and(|pose| {
                    let center = body.center(&pose);
                    let (chunk, _, _) =
                        world_to_chunk_coords(center.x.floor() as i32, center.y.floor() as i32);
                    chunk == pos
                })
            })
            .map(|(key, _)| key)
            .collect();

        for key in keys {
            let Some(pose) = self.body_pose(key) else {
                continue;
            };
            let Some(body) = self.remove_body(key) else {
                continue;
            };
            let mut dropped = 0;
            for ty in 0..body.h {
                for tx in 0..body.w {
                    let Some(tile) = body.tiles[(ty * body.w + tx) as usize] else {
                        continue;
                    };
                    let at = RigidBody::project(tx, ty, &pose);
                    let (chunk_pos, lx, ly) = world_to_chunk_coords(at.x, at.y);
                    match self.store.get_mut(chunk_pos.x, chunk_pos.y) {
                        Some(chunk) if chunk.get_tile(lx, ly).is_air() => chunk.set_tile(lx, ly, tile),
                        _ => dropped += 1,
                    }
                }
            }
            log::debug!(
                "[EVICT] Stashed body {:?} into chunk {} ({} tiles dropped)",
                key,
                pos,
                dropped
            );
        }
    }

    /// Write every changed resident chunk plus the world metadata
    ///
    /// Returns the number of chunks written; 0 without persistence.
    pub fn save_all(&mut self) -> anyhow::Result<usize> {
        let Some(persistence) = &self.ctx.persistence else {
            return Ok(0);
        };

        let mut saved = 0;
        for chunk in self.store.iter_mut() {
            self.grid.read_chunk(chunk);
            if chunk.dirty && chunk.is_generated() {
                persistence.write_chunk(chunk)?;
                chunk.dirty = false;
                saved += 1;
            }
        }
        persistence.save_metadata(&WorldMetadata::new(
            &self.ctx.config.world_name,
            self.ctx.seed(),
        ))?;
        log::info!("[SAVE] Saved {} chunks of world '{}'", saved, self.ctx.config.world_name);
        Ok(saved)
    }

    // ===== Rendering =====

    /// Snapshot the live arrays for the renderer and clear the dirty flags
    pub fn render_handoff(&mut self) -> RenderFrame {
        let poses = self.body_poses();
        let grid = &self.grid;
        let materials = &self.ctx.materials;
        let bodies = &self.bodies;

        let ((pixels, emission), body_data) = rayon::join(
            || {
                let pixels: Vec<u32> = grid.tiles.par_iter().map(|t| t.color).collect();
                let emission: Vec<u32> = grid.tiles.par_iter().map(|t| emission_of(materials, t)).collect();
                (pixels, emission)
            },
            || {
                poses
                    .iter()
                    .filter_map(|(key, pose)| {
                        let body = bodies.get(*key)?;
                        Some(BodyRenderData {
                            position: pose.position,
                            angle: pose.angle,
                            w: body.w,
                            h: body.h,
                            pixels: body.tiles.iter().map(|t| t.map_or(0, |t| t.color)).collect(),
                        })
                    })
                    .collect::<Vec<_>>()
            },
        );

        let flow = (0..grid.tiles.len())
            .map(|i| {
                let fx = (grid.flow_x[i] + grid.prev_flow_x[i]) * 0.5;
                let fy = (grid.flow_y[i] + grid.prev_flow_y[i]) * 0.5;
                Vec2::new(fx, fy).length()
            })
            .collect();

        let frame = RenderFrame {
            origin: grid.origin(),
            width: grid.width(),
            height: grid.height(),
            pixels,
            emission,
            flow,
            layer2: grid.layer2.iter().map(|t| t.color).collect(),
            background: grid.background.clone(),
            dirty: grid.dirty.clone(),
            layer2_dirty: grid.layer2_dirty.clone(),
            background_dirty: grid.background_dirty.clone(),
            dirty_bounds: grid.dirty_bounds(),
            particles: self.particle_buffer.clone(),
            bodies: body_data,
        };
        self.grid.clear_dirty();
        frame
    }

    /// Send every collider outline to a debug overlay
    pub fn debug_draw(&self, sink: &mut dyn DebugDraw) {
        self.physics.debug_draw(sink);
    }

    // ===== Tiles =====

    /// Foreground tile at world coordinates, from the grid or a cached chunk
    pub fn get_tile(&self, x: i32, y: i32) -> Option<MaterialInstance> {
        if let Some(tile) = self.grid.get(x, y) {
            return Some(*tile);
        }
        let (pos, lx, ly) = world_to_chunk_coords(x, y);
        self.store.get(pos.x, pos.y).map(|c| *c.get_tile(lx, ly))
    }

    /// Write a foreground tile; false when (x, y) is not resident
    pub fn set_tile(&mut self, x: i32, y: i32, tile: MaterialInstance) -> bool {
        if self.grid.contains(x, y) {
            return self.grid.set(x, y, tile);
        }
        let (pos, lx, ly) = world_to_chunk_coords(x, y);
        match self.store.get_mut(pos.x, pos.y) {
            Some(chunk) => {
                chunk.set_tile(lx, ly, tile);
                true
            }
            None => false,
        }
    }

    pub fn get_tile_layer2(&self, x: i32, y: i32) -> Option<MaterialInstance> {
        if let Some(tile) = self.grid.get_layer2(x, y) {
            return Some(*tile);
        }
        let (pos, lx, ly) = world_to_chunk_coords(x, y);
        self.store.get(pos.x, pos.y).map(|c| *c.get_layer2(lx, ly))
    }

    pub fn set_tile_layer2(&mut self, x: i32, y: i32, tile: MaterialInstance) -> bool {
        if self.grid.contains(x, y) {
            return self.grid.set_layer2(x, y, tile);
        }
        let (pos, lx, ly) = world_to_chunk_coords(x, y);
        match self.store.get_mut(pos.x, pos.y) {
            Some(chunk) => {
                chunk.set_layer2(lx, ly, tile);
                true
            }
            None => false,
        }
    }

    /// Blast a circle of `radius` tiles around (x, y)
    ///
    /// Solids inside the radius are destroyed, loose matter inside it and
    /// non-solids out to twice the radius fly off as particles.
    pub fn explosion(&mut self, x: i32, y: i32, radius: i32) {
        let radius = radius.max(1);
        let outer = radius * 2;
        let mut destroyed = 0;
        let mut ejected = 0;

        for ty in y - outer..y + outer {
            for tx in x - outer..x + outer {
                let Some(tile) = self.grid.get(tx, ty).copied() else {
                    continue;
                };
                if tile.is_air() || tile.material == MaterialId::TEST_SOLID {
                    continue;
                }
                let physics = self.ctx.materials.physics(tile.material);
                let (dx, dy) = (tx - x, ty - y);
                let d2 = dx * dx + dy * dy;

                let inner = d2 < radius * radius;
                if inner && (physics == PhysicsType::Solid || self.rng.gen_bool(0.6)) {
                    self.grid.set(tx, ty, MaterialInstance::AIR);
                    destroyed += 1;
                } else if inner || (d2 < outer * outer && physics != PhysicsType::Solid) {
                    let mut debris = tile;
                    if inner {
                        debris.color = darken(debris.color);
                    }
                    let vx = dx as f32 / 10.0 + self.rng.gen_range(-0.5..0.5);
                    let vy = dy as f32 / 6.0 + self.rng.gen_range(-0.5..0.5);
                    self.cells
                        .insert(CellData::new(debris, tx as f32, ty as f32, vx, vy, 0.0, 0.1));
                    self.grid.set(tx, ty, MaterialInstance::AIR);
                    ejected += 1;
                }
            }
        }

        self.stats.ejections += ejected;
        self.remesh(TileRect::new(x - outer, y - outer, outer * 2, outer * 2));
        log::debug!(
            "Explosion at ({}, {}) radius {}: {} destroyed, {} ejected",
            x,
            y,
            radius,
            destroyed,
            ejected
        );
    }

    // ===== Particles =====

    pub fn add_cell(&mut self, cell: CellData) -> CellKey {
        self.cells.insert(cell)
    }

    /// Remove a particle, running its death callback
    pub fn remove_cell(&mut self, key: CellKey) -> bool {
        match self.cells.remove(key) {
            Some(cell) => {
                cell.kill();
                true
            }
            None => false,
        }
    }

    // ===== Rigid bodies =====

    /// Create a rigid body with its physics counterpart
    pub fn make_rigid_body(&mut self, desc: BodyDesc) -> BodyKey {
        let (outline, convex) = desc.polygons();
        let handle = self.physics.create_body(
            desc.kind,
            Vec2::new(desc.x, desc.y),
            desc.angle,
            &convex,
            desc.density,
            desc.friction,
        );
        let body = RigidBody::new(handle, desc.kind, desc.w, desc.h, desc.tiles, outline);
        self.bodies.insert(body)
    }

    /// Destroy a body without returning its tiles to the grid
    pub fn remove_body(&mut self, key: BodyKey) -> Option<RigidBody> {
        let body = self.bodies.remove(key)?;
        self.physics.remove_body(body.handle);
        if self.host_player == Some(key) {
            self.host_player = None;
        }
        Some(body)
    }

    /// Current transform and velocity of a body
    pub fn body_pose(&self, key: BodyKey) -> Option<BodyPose> {
        let body = self.bodies.get(key)?;
        pose_of(&self.physics, body.handle)
    }

    fn body_poses(&self) -> Vec<(BodyKey, BodyPose)> {
        self.bodies
            .iter()
            .filter_map(|(key, body)| pose_of(&self.physics, body.handle).map(|pose| (key, pose)))
            .collect()
    }

    /// Lift the listed grid tiles into a new dynamic body
    pub fn carve_region(&mut self, cells: &[IVec2]) -> Option<BodyKey> {
        let region = carve(&mut self.grid, cells)?;
        let rect = region.rect;
        let desc = BodyDesc::new(
            BodyKind::Dynamic,
            rect.x as f32,
            rect.y as f32,
            rect.w,
            rect.h,
            region.tiles,
        );
        let key = self.make_rigid_body(desc);
        log::debug!(
            "[CARVE] {} tiles at ({}, {}) {}x{} -> body {:?}",
            cells.len(),
            rect.x,
            rect.y,
            rect.w,
            rect.h,
            key
        );
        self.remesh(rect);
        Some(key)
    }

    /// Carve every non-air tile inside `rect`
    pub fn carve_rect(&mut self, rect: TileRect) -> Option<BodyKey> {
        let cells: Vec<IVec2> = (rect.y..rect.bottom())
            .flat_map(|y| (rect.x..rect.right()).map(move |x| IVec2::new(x, y)))
            .filter(|p| {
                self.grid
                    .get(p.x, p.y)
                    .is_some_and(|t| !t.is_air() && t.material != MaterialId::TEST_SOLID)
            })
            .collect();
        self.carve_region(&cells)
    }

    /// Weld a body into the grid now, whatever its speed
    ///
    /// Returns the number of tiles written; the body is removed once empty.
    pub fn settle_body(&mut self, key: BodyKey) -> usize {
        let Some(body) = self.bodies.get_mut(key) else {
            return 0;
        };
        let Some(pose) = pose_of(&self.physics, body.handle) else {
            return 0;
        };
        let outcome = settle(body, &pose, &mut self.grid, &self.ctx.materials, true);
        let welded = outcome.welded;
        self.apply_settle(key, outcome);
        welded
    }

    pub fn host_player(&self) -> Option<BodyKey> {
        self.host_player
    }

    /// Make the load zone follow a body
    pub fn set_host_player(&mut self, key: Option<BodyKey>) {
        self.host_player = key.filter(|k| self.bodies.contains_key(*k));
    }
}

fn zone_origin(center_chunk: IVec2, config: &WorldConfig) -> IVec2 {
    let (w, h) = config.load_zone_chunks;
    (center_chunk - IVec2::new(w.max(1) / 2, h.max(1) / 2)) * IVec2::new(CHUNK_W as i32, CHUNK_H as i32)
}

fn pose_of(physics: &PhysicsWorld, handle: rapier2d::prelude::RigidBodyHandle) -> Option<BodyPose> {
    let (position, angle) = physics.transform(handle)?;
    Some(BodyPose {
        position,
        angle,
        linvel: physics.linvel(handle).unwrap_or(Vec2::ZERO),
    })
}

fn emission_of(materials: &Materials, tile: &MaterialInstance) -> u32 {
    if tile.is_air() {
        return 0;
    }
    let def = materials.get(tile.material);
    if def.emit > 0 { def.emit_color } else { 0 }
}

/// Quarter brightness, alpha kept
fn darken(color: u32) -> u32 {
    let r = ((color >> 16) & 0xff) / 4;
    let g = ((color >> 8) & 0xff) / 4;
    let b = (color & 0xff) / 4;
    (color & 0xff00_0000) | (r << 16) | (g << 8) | b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::chunk_loader::LoadState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn small_world() -> World {
        let config = WorldConfig {
            load_zone_chunks: (1, 1),
            tick_zone_inset: 0,
            worker_threads: 2,
            ..WorldConfig::ephemeral(7)
        };
        let ctx = WorldContext::new(config).unwrap();
        World::new(ctx, IVec2::ZERO).unwrap()
    }

    /// Loaded world with the whole grid cleared to air
    fn cleared_world() -> World {
        let mut world = small_world();
        world.load_blocking();
        let rect = world.load_zone();
        world.grid.fill_rect(rect, &MaterialInstance::AIR);
        world.grid.clear_dirty();
        world
    }

    #[test]
    fn test_new_world_queues_zone_and_ring() {
        let world = small_world();
        // 1x1 load zone plus one ring of context chunks
        assert_eq!(world.loader().pending_count(), 9);
        assert!(
            world
                .grid()
                .tiles
                .iter()
                .all(|t| t.material == MaterialId::TEST_SOLID)
        );
    }

    #[test]
    fn test_load_blocking_merges_everything() {
        let mut world = small_world();
        assert_eq!(world.load_blocking(), 9);
        assert_eq!(world.store().len(), 9);
        assert_eq!(world.loader().pending_count(), 0);
        assert_eq!(world.loader().state(IVec2::ZERO), Some(LoadState::Merged));
        assert!(world.is_context_only(1, 1));
        assert!(!world.is_context_only(0, 0));
        assert!(
            world
                .grid()
                .tiles
                .iter()
                .all(|t| t.material != MaterialId::TEST_SOLID)
        );
    }

    #[test]
    fn test_context_chunks_never_advance() {
        let mut world = small_world();
        world.load_blocking();
        for _ in 0..4 {
            world.tick_chunk_generation();
        }
        let max_phase = world.context().generator.max_phase();
        assert_eq!(world.store().get(0, 0).unwrap().generation_phase, max_phase);
        assert_eq!(world.store().get(1, 0).unwrap().generation_phase, 0);
    }

    #[test]
    fn test_fixed_timestep_caps_steps() {
        let mut world = cleared_world();
        assert_eq!(world.update(FIXED_TIMESTEP * 0.5), 0);
        assert_eq!(world.update(FIXED_TIMESTEP * 0.6), 1);
        assert_eq!(world.update(1.0), MAX_STEPS_PER_FRAME);
        assert!(world.time_accumulator <= FIXED_TIMESTEP * 2.0);
        assert_eq!(world.tick_count(), 3);
    }

    #[test]
    fn test_render_handoff_clears_dirty() {
        let mut world = cleared_world();
        let stone = world.materials().instance(MaterialId::STONE);
        world.set_tile(10, 10, stone);

        let first = world.render_handoff();
        assert_eq!(first.dirty_bounds, Some(TileRect::new(10, 10, 1, 1)));
        assert_eq!(first.pixels[(10 * first.width + 10) as usize], stone.color);

        let second = world.render_handoff();
        assert!(second.dirty.iter().all(|d| !d));
        assert_eq!(first.pixels, second.pixels);
    }

    #[test]
    fn test_emission_for_lava() {
        let mut world = cleared_world();
        let lava = world.materials().instance(MaterialId::LAVA);
        world.set_tile(3, 3, lava);
        let frame = world.render_handoff();
        let expected = world.materials().get(MaterialId::LAVA).emit_color;
        assert_eq!(frame.emission[(3 * frame.width + 3) as usize], expected);
        assert_eq!(frame.emission[0], 0);
    }

    #[test]
    fn test_tiles_outside_grid_come_from_cache() {
        let mut world = small_world();
        world.load_blocking();
        let outside = IVec2::new(CHUNK_W as i32 + 5, 5);
        assert!(!world.grid().contains(outside.x, outside.y));

        let cloud = world.materials().instance(MaterialId::CLOUD);
        assert!(world.set_tile(outside.x, outside.y, cloud));
        assert_eq!(world.get_tile(outside.x, outside.y).map(|t| t.id()), Some(cloud.id()));
        assert!(!world.set_tile(10_000, 10_000, cloud));
        assert!(world.get_tile(10_000, 10_000).is_none());
    }

    #[test]
    fn test_explosion_clears_solids_and_ejects_loose_matter() {
        let mut world = cleared_world();
        let materials = Materials::new();
        for y in 55..80 {
            for x in 40..80 {
                world.set_tile(x, y, materials.instance(MaterialId::STONE));
            }
        }
        world.set_tile(60, 50, materials.instance(MaterialId::GENERIC_SAND));

        world.explosion(60, 60, 8);

        assert!(world.get_tile(60, 60).unwrap().is_air());
        // Loose matter in the outer ring flies off
        assert!(world.get_tile(60, 50).unwrap().is_air());
        // Stone outside the inner radius survives
        assert_eq!(world.get_tile(60, 71).map(|t| t.material), Some(MaterialId::STONE));
        assert!(!world.cells().is_empty());
    }

    #[test]
    fn test_dust_is_removed_by_carve_check() {
        let mut world = cleared_world();
        let stone = world.materials().instance(MaterialId::STONE);
        for x in 0..CHUNK_W as i32 {
            for y in 0..CHUNK_H as i32 {
                if (x + y) % 2 == 0 {
                    world.grid.set(x, y, stone.duplicate());
                }
            }
        }
        // Isolated single tiles: any hit is dust
        let zone = world.tick_zone();
        for _ in 0..50 {
            world.carve_check(zone);
        }
        let left = world.grid().tiles.iter().filter(|t| !t.is_air()).count();
        assert!(left < (CHUNK_W * CHUNK_H) / 2);
        assert!(world.bodies().is_empty());
    }

    #[test]
    fn test_carve_check_lifts_floating_rock() {
        let mut world = cleared_world();
        let stone = world.materials().instance(MaterialId::STONE);
        for y in 0..CHUNK_H as i32 {
            for x in 0..CHUNK_W as i32 {
                world.grid.set(x, y, stone.duplicate());
            }
        }
        let rock = TileRect::new(20, 20, 10, 10);
        world.grid.fill_rect(TileRect::new(18, 18, 14, 14), &MaterialInstance::AIR);
        world.grid.fill_rect(rock, &stone);

        let zone = world.tick_zone();
        for _ in 0..10_000 {
            world.carve_check(zone);
            if !world.bodies().is_empty() {
                break;
            }
        }
        assert!(!world.bodies().is_empty(), "the floating rock should be carved eventually");
        let body = world.bodies().values().next().unwrap();
        assert_eq!(body.tile_count(), 100);
        assert!(world.get_tile(25, 25).unwrap().is_air());
    }

    #[test]
    fn test_remove_cell_runs_callback_once() {
        let mut world = cleared_world();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let cell = CellData::new(world.materials().instance(MaterialId::GENERIC_SAND), 5.0, 5.0, 0.0, 0.0, 0.0, 0.0)
            .on_death(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        let key = world.add_cell(cell);
        assert!(world.remove_cell(key));
        assert!(!world.remove_cell(key));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resting_body_welds_back() {
        let mut world = cleared_world();
        let materials = Materials::new();
        for x in 0..CHUNK_W as i32 {
            for y in 100..CHUNK_H as i32 {
                world.set_tile(x, y, materials.instance(MaterialId::SMOOTH_STONE));
            }
        }
        let mut cells = Vec::new();
        for y in 90..100 {
            for x in 50..60 {
                world.set_tile(x, y, materials.instance(MaterialId::STONE));
                cells.push(IVec2::new(x, y));
            }
        }
        let key = world.carve_region(&cells).unwrap();
        assert!(world.get_tile(55, 95).unwrap().is_air());

        for _ in 0..120 {
            world.tick();
            if !world.bodies().contains_key(key) {
                break;
            }
        }
        assert!(!world.bodies().contains_key(key), "body should weld back at rest");
        let stone = (85..100)
            .flat_map(|y| (40..70).map(move |x| (x, y)))
            .filter(|&(x, y)| world.get_tile(x, y).is_some_and(|t| t.material == MaterialId::STONE))
            .count();
        let particles = world.cells().len();
        assert!(stone + particles >= 90, "stone {} particles {}", stone, particles);
    }

    #[test]
    fn test_set_center_shifts_zone_and_queues() {
        let mut world = small_world();
        world.load_blocking();
        let marker = world.materials().instance(MaterialId::CLOUD);
        world.set_tile(5, 5, marker);

        world.set_center(CHUNK_W as i32 + 10, 10);
        assert_eq!(world.center_chunk(), IVec2::new(1, 0));
        assert_eq!(world.load_zone().x, CHUNK_W as i32);
        // The old centre was saved into its cached chunk
        assert_eq!(world.store().get(0, 0).map(|c| c.get_tile(5, 5).id()), Some(marker.id()));
        // (1, 0) was a context chunk, now requested from the cache
        world.load_blocking();
        assert!(!world.is_context_only(1, 0));
        assert_eq!(world.get_tile(5, 5).map(|t| t.id()), Some(marker.id()));
    }

    #[test]
    fn test_distant_chunks_are_evicted() {
        let config = WorldConfig {
            load_zone_chunks: (1, 1),
            unload_distance: 2,
            worker_threads: 2,
            ..WorldConfig::ephemeral(3)
        };
        let mut world = World::new(WorldContext::new(config).unwrap(), IVec2::ZERO).unwrap();
        world.load_blocking();
        world.set_center(10 * CHUNK_W as i32, 0);
        world.load_blocking();
        world.tick_chunk_generation();

        assert!(!world.store().contains(0, 0));
        assert!(world.store().contains(10, 0));
        assert_eq!(world.loader().state(IVec2::ZERO), None);
    }
}
