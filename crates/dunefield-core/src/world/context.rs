//! Shared, read-only world services handed to every subsystem

use std::sync::Arc;

use anyhow::Result;

use dunefield_simulation::Materials;

use super::config::WorldConfig;
use super::generation::WorldGenerator;
use super::persistence::{ChunkPersistence, WorldMetadata};

/// Everything the world and its worker threads read but never mutate
pub struct WorldContext {
    pub materials: Materials,
    pub config: WorldConfig,
    pub generator: WorldGenerator,
    pub persistence: Option<ChunkPersistence>,
}

impl WorldContext {
    /// Build the context, opening the save directory when persistence is enabled
    ///
    /// An existing world keeps the seed recorded in its metadata.
    pub fn new(mut config: WorldConfig) -> Result<Arc<Self>> {
        let persistence = if config.persistence_enabled {
            let persistence = ChunkPersistence::new(config.world_dir())?;
            if let Some(meta) = persistence.load_metadata() {
                if meta.seed != config.seed {
                    log::info!(
                        "World '{}' was created with seed {}, using it instead of {}",
                        meta.world_name,
                        meta.seed,
                        config.seed
                    );
                }
                config.seed = meta.seed;
            }
            persistence.save_metadata(&WorldMetadata::new(&config.world_name, config.seed))?;
            Some(persistence)
        } else {
            None
        };

        let generator = WorldGenerator::from_config(config.seed, config.generation.clone());
        log::info!(
            "World '{}' ready (seed: {}, persistence: {})",
            config.world_name,
            config.seed,
            persistence.is_some()
        );

        Ok(Arc::new(Self {
            materials: Materials::new(),
            config,
            generator,
            persistence,
        }))
    }

    /// Context without any disk access
    pub fn ephemeral(seed: u64) -> Arc<Self> {
        let config = WorldConfig::ephemeral(seed);
        let generator = WorldGenerator::from_config(seed, config.generation.clone());
        Arc::new(Self {
            materials: Materials::new(),
            config,
            generator,
            persistence: None,
        })
    }

    pub fn seed(&self) -> u64 {
        self.config.seed
    }
}
