//! Free particles of matter that have left the grid

use std::fmt;

use crate::MaterialInstance;

/// Invoked exactly once when a particle is removed from the world
pub type DeathCallback = Box<dyn FnOnce(&CellData) + Send + Sync>;

/// Whether a particle may still pass through OBJECT tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectState {
    /// Not stepped yet
    #[default]
    Unknown,
    /// Spawned inside an object and has not left it
    Inside,
    /// Collides with everything
    Free,
}

/// Kinematic point mass carrying one tile's worth of matter
pub struct CellData {
    pub tile: MaterialInstance,

    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub ax: f32,
    pub ay: f32,

    /// Point the particle is pulled towards (vacuum tools)
    pub target: Option<(f32, f32)>,
    pub target_force: f32,

    /// Remaining ticks for temporary particles
    pub lifetime: i32,
    /// Ticks over which the particle fades before expiring
    pub fade: i32,
    /// Temporary particles vanish instead of depositing into the grid
    pub temporary: bool,
    pub object_state: ObjectState,

    on_death: Option<DeathCallback>,
}

impl CellData {
    pub fn new(tile: MaterialInstance, x: f32, y: f32, vx: f32, vy: f32, ax: f32, ay: f32) -> Self {
        Self {
            tile,
            x,
            y,
            vx,
            vy,
            ax,
            ay,
            target: None,
            target_force: 0.0,
            lifetime: 0,
            fade: 0,
            temporary: false,
            object_state: ObjectState::Unknown,
            on_death: None,
        }
    }

    /// Make this a temporary particle that expires after `lifetime` ticks
    pub fn with_lifetime(mut self, lifetime: i32, fade: i32) -> Self {
        self.lifetime = lifetime;
        self.fade = fade;
        self.temporary = true;
        self
    }

    pub fn with_target(mut self, x: f32, y: f32, force: f32) -> Self {
        self.target = Some((x, y));
        self.target_force = force;
        self
    }

    pub fn on_death(mut self, callback: impl FnOnce(&CellData) + Send + Sync + 'static) -> Self {
        self.on_death = Some(Box::new(callback));
        self
    }

    /// Opacity factor for fading temporary particles (1.0 = opaque)
    pub fn fade_factor(&self) -> f32 {
        if !self.temporary || self.fade <= 0 || self.lifetime >= self.fade {
            1.0
        } else {
            (self.lifetime.max(0) as f32) / (self.fade as f32)
        }
    }

    /// Consume the particle, running its termination callback
    pub fn kill(mut self) {
        if let Some(callback) = self.on_death.take() {
            callback(&self);
        }
    }
}

impl fmt::Debug for CellData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellData")
            .field("material", &self.tile.material)
            .field("pos", &(self.x, self.y))
            .field("vel", &(self.vx, self.vy))
            .field("lifetime", &self.lifetime)
            .field("temporary", &self.temporary)
            .field("has_callback", &self.on_death.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MaterialId;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sand() -> MaterialInstance {
        MaterialInstance::new(MaterialId::GENERIC_SAND, 0xffc2b280, 0)
    }

    #[test]
    fn test_kill_runs_callback_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cell = CellData::new(sand(), 1.0, 2.0, 0.0, 0.0, 0.0, 0.1).on_death(move |c| {
            assert_eq!(c.x, 1.0);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        cell.kill();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_kill_without_callback() {
        CellData::new(sand(), 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).kill();
    }

    #[test]
    fn test_fade_factor() {
        let mut cell = CellData::new(sand(), 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).with_lifetime(30, 10);
        assert_eq!(cell.fade_factor(), 1.0);
        cell.lifetime = 5;
        assert!((cell.fade_factor() - 0.5).abs() < f32::EPSILON);
    }
}
