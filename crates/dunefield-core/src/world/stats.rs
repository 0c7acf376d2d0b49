//! Simulation statistics collection

/// Trait for collecting simulation statistics
///
/// Simulation passes report through this trait so callers decide whether
/// anything is counted at all.
pub trait SimStats {
    /// A tile moved to another grid cell
    fn record_tile_moved(&mut self);

    /// A tile changed material through a temperature reaction
    fn record_state_change(&mut self);

    /// A material interaction fired
    fn record_reaction(&mut self);

    /// A tile left the grid as a free particle
    fn record_ejection(&mut self) {}
}

/// A no-op implementation for when stats collection is not needed
#[derive(Default)]
pub struct NoopStats;

impl SimStats for NoopStats {
    fn record_tile_moved(&mut self) {}
    fn record_state_change(&mut self) {}
    fn record_reaction(&mut self) {}
}

/// Per-tick counters kept by the world
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub tiles_moved: u32,
    pub state_changes: u32,
    pub reactions: u32,
    pub ejections: u32,
    pub merged_chunks: u32,
    pub live_cells: u32,
    pub live_bodies: u32,
}

impl TickStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl SimStats for TickStats {
    fn record_tile_moved(&mut self) {
        self.tiles_moved += 1;
    }

    fn record_state_change(&mut self) {
        self.state_changes += 1;
    }

    fn record_reaction(&mut self) {
        self.reactions += 1;
    }

    fn record_ejection(&mut self) {
        self.ejections += 1;
    }
}
