//! Material simulation data for Dunefield
//!
//! This crate provides the foundational data types shared by the world simulation:
//! - Material catalog (MaterialId, MaterialDef, Materials, PhysicsType)
//! - Interaction and temperature reaction tables
//! - Tile values (MaterialInstance) and free particles (CellData)
//! - Chunk and liquid constants

mod cell;
mod materials;
mod tile;

pub use cell::{CellData, DeathCallback, ObjectState};
pub use materials::{
    Interaction, InteractionKind, MaterialDef, MaterialId, Materials, PhysicsType, Reaction,
    ReactionKind,
};
pub use tile::{
    CHUNK_AREA, CHUNK_H, CHUNK_W, FLUID_DEFAULT_AMOUNT, FLUID_FLOW_SPEED, FLUID_MAX_COMPRESSION,
    FLUID_MAX_FLOW, FLUID_MAX_VALUE, FLUID_MIN_FLOW, FLUID_MIN_VALUE, MaterialInstance,
    SETTLE_THRESHOLD, next_instance_id,
};
