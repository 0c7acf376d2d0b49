//! Tile value type and grid constants
//!
//! A [`MaterialInstance`] is one parcel of matter sitting in a grid cell. Every
//! instance carries an id drawn from a process-wide counter, so two instances
//! compare equal only if they are the same parcel, never because their fields
//! happen to match.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::MaterialId;

/// Width of a chunk in tiles
pub const CHUNK_W: usize = 128;

/// Height of a chunk in tiles
pub const CHUNK_H: usize = 128;

/// Total tiles in a chunk
pub const CHUNK_AREA: usize = CHUNK_W * CHUNK_H;

/// Nominal amount of liquid a single tile holds uncompressed
pub const FLUID_MAX_VALUE: f32 = 0.5;
/// Liquid below this amount evaporates
pub const FLUID_MIN_VALUE: f32 = 0.0005;
/// Extra liquid a tile may hold per tile of liquid stacked above it
pub const FLUID_MAX_COMPRESSION: f32 = 0.1;
pub const FLUID_MIN_FLOW: f32 = 0.05;
pub const FLUID_MAX_FLOW: f32 = 8.0;
pub const FLUID_FLOW_SPEED: f32 = 1.0;
/// Amount a freshly created liquid tile starts with
pub const FLUID_DEFAULT_AMOUNT: f32 = 2.0;

/// Ticks without movement after which a loose tile is considered settled
pub const SETTLE_THRESHOLD: u8 = 10;

static NEXT_INSTANCE_ID: AtomicU32 = AtomicU32::new(1);

/// Draw a fresh, never reused instance id
pub fn next_instance_id() -> u32 {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// The per-cell payload of the world grid
#[derive(Clone, Copy, Debug)]
pub struct MaterialInstance {
    /// Material id in the catalog
    pub material: u16,
    /// Resolved display color (0xAARRGGBB)
    pub color: u32,
    pub temperature: i32,
    id: u32,
    /// Liquid content (liquids only)
    pub fluid_amount: f32,
    /// Pending liquid change applied at the end of a sweep
    pub fluid_amount_diff: f32,
    /// Ticks since this tile last moved
    pub settle_count: u8,
    /// Movement marker used by the automaton (sand: still falling, liquid: frozen)
    pub moved: bool,
}

impl MaterialInstance {
    /// Empty space. Air is the absence of matter, so every air tile shares id 0.
    pub const AIR: MaterialInstance = MaterialInstance {
        material: MaterialId::AIR,
        color: 0,
        temperature: 0,
        id: 0,
        fluid_amount: 0.0,
        fluid_amount_diff: 0.0,
        settle_count: 0,
        moved: false,
    };

    /// Create a new parcel of matter with a fresh id
    pub fn new(material: u16, color: u32, temperature: i32) -> Self {
        Self {
            material,
            color,
            temperature,
            id: next_instance_id(),
            fluid_amount: FLUID_DEFAULT_AMOUNT,
            fluid_amount_diff: 0.0,
            settle_count: 0,
            moved: false,
        }
    }

    /// Unique id of this parcel
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Same material and color, but a distinct parcel
    pub fn duplicate(&self) -> Self {
        Self {
            id: next_instance_id(),
            ..*self
        }
    }

    /// Replace the material while keeping temperature, producing a new parcel
    pub fn transmute(&self, material: u16, color: u32) -> Self {
        let mut tile = Self::new(material, color, self.temperature);
        tile.fluid_amount = self.fluid_amount;
        tile
    }

    pub fn is_air(&self) -> bool {
        self.material == MaterialId::AIR
    }
}

impl PartialEq for MaterialInstance {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MaterialInstance {}
