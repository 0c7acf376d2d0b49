//! Chunk-streamed falling-sand world simulation
//!
//! The [`world::World`] owns the live tile grid for the load zone, the chunk
//! cache, background generation, the cellular automaton, free particles and
//! rapier2d rigid bodies. Material data lives in `dunefield-simulation`.

pub mod world;

pub use dunefield_simulation as simulation;
pub use world::{World, WorldConfig, WorldContext};
