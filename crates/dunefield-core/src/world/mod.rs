//! World management - chunks, streaming, simulation and rigid bodies

mod ca_update;
mod cells;
mod chunk;
mod chunk_loader;
mod chunk_store;
pub mod config;
mod context;
pub mod generation;
mod grid;
pub mod mesh;
pub mod persistence;
mod physics;
pub mod populators;
mod rigid_body;
pub mod rng_trait;
pub mod stats;
mod temperature;
#[allow(clippy::module_inception)]
mod world;

slotmap::new_key_type! {
    /// Handle to a resident chunk
    pub struct ChunkKey;
    /// Handle to a rigid body
    pub struct BodyKey;
    /// Handle to a free particle
    pub struct CellKey;
}

pub use ca_update::{CellularAutomataUpdater, MAX_ITERATIONS, vertical_flow};
pub use cells::{Deposit, find_deposit, particle_pixels, update_cells};
pub use chunk::{Biome, Chunk, world_to_chunk_coords};
pub use chunk_loader::{
    ChunkLoader, ChunkSource, LoadRequest, LoadState, LoaderError, MAX_LOAD_ATTEMPTS, ReadyChunk,
};
pub use chunk_store::ChunkStore;
pub use config::{WorldConfig, WorldGenConfig};
pub use context::WorldContext;
pub use generation::WorldGenerator;
pub use grid::{TileGrid, TileRect};
pub use persistence::{ChunkPersistence, WorldMetadata};
pub use physics::{DebugDraw, PhysicsWorld, REST_SPEED};
pub use populators::{
    BodySpawn, Neighbourhood, PhaseAdvance, PopulateError, Populator, PopulatorKind,
    advance_chunk, ready_to_advance,
};
pub use rigid_body::{
    BodyDesc, BodyKind, BodyPose, BodyShape, CarvedRegion, FLOOD_FILL_CAP, RigidBody,
    SettleOutcome, carve, flood_fill, settle,
};
pub use rng_trait::WorldRng;
pub use stats::{NoopStats, SimStats, TickStats};
pub use temperature::TemperatureSimulator;
pub use world::{BodyRenderData, RenderFrame, World};
