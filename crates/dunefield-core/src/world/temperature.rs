//! Temperature simulation system
//!
//! Heat is conducted over the 3x3 neighbourhood of every non-air tile in the
//! tick zone. Hot neighbours weigh more than cold ones, so heat spreads
//! quickly from lava and fire. New temperatures are computed into a scratch
//! buffer first so the result does not depend on sweep order; reactions
//! (melting, boiling, freezing) run on the updated values.

use dunefield_simulation::Materials;

use super::SimStats;
use super::grid::{TileGrid, TileRect};

/// Temperature units at which a neighbour counts with full weight
const HEAT_SCALE: f32 = 64.0;

/// Conduction and temperature reactions
#[derive(Default)]
pub struct TemperatureSimulator {
    scratch: Vec<i32>,
}

impl TemperatureSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conduct heat inside `zone`, then apply reactions
    ///
    /// Temperature changes alone never dirty a tile; a reaction replaces the
    /// tile (new id) and does.
    pub fn update(
        &mut self,
        grid: &mut TileGrid,
        zone: TileRect,
        materials: &Materials,
        stats: &mut dyn SimStats,
    ) {
        let Some(zone) = zone.intersection(&grid.rect()) else {
            return;
        };

        self.scratch.clear();
        for y in zone.y..zone.bottom() {
            for x in zone.x..zone.right() {
                self.scratch.push(conduct(grid, materials, x, y));
            }
        }

        let mut i = 0;
        for y in zone.y..zone.bottom() {
            for x in zone.x..zone.right() {
                let temperature = self.scratch[i];
                i += 1;

                let Some(tile) = grid.get_mut(x, y) else {
                    continue;
                };
                if tile.is_air() {
                    continue;
                }
                tile.temperature = temperature;

                let def = materials.get(tile.material);
                if let Some(reaction) = def.reactions.iter().find(|r| r.triggers(temperature)) {
                    let replaced = tile.transmute(reaction.into, materials.get(reaction.into).color);
                    log::trace!(
                        "Tile ({}, {}) {} -> {} at {}",
                        x,
                        y,
                        def.name,
                        materials.get(reaction.into).name,
                        temperature
                    );
                    grid.set(x, y, replaced);
                    stats.record_state_change();
                }
            }
        }
    }
}

/// New temperature of the tile at (x, y); air keeps 0
fn conduct(grid: &TileGrid, materials: &Materials, x: i32, y: i32) -> i32 {
    let Some(tile) = grid.get(x, y) else {
        return 0;
    };
    if tile.is_air() {
        return tile.temperature;
    }
    let def = materials.get(tile.material);

    let mut weighted = 0.0f32;
    let mut weight = 0.01f32;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let Some(neighbour) = grid.get(x + dx, y + dy) else {
                continue;
            };
            if neighbour.is_air() {
                continue;
            }
            let t = neighbour.temperature as f32;
            let factor = t.abs() / HEAT_SCALE * materials.get(neighbour.material).conduction_other;
            weighted += t * factor;
            weight += factor;
        }
    }

    let own = tile.temperature as f32;
    let cs = def.conduction_self;
    def.add_temp + ((weighted / weight) * cs + own * (1.0 - cs)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{NoopStats, TickStats};
    use dunefield_simulation::MaterialId;
    use glam::IVec2;

    fn grid() -> TileGrid {
        TileGrid::new(IVec2::ZERO, 8, 8)
    }

    #[test]
    fn test_cold_stone_stays_cold() {
        let materials = Materials::new();
        let mut g = grid();
        g.set(3, 3, materials.instance(MaterialId::STONE));
        g.clear_dirty();

        let rect = g.rect();
        TemperatureSimulator::new().update(&mut g, rect, &materials, &mut NoopStats);

        assert_eq!(g.get(3, 3).unwrap().temperature, 0);
        assert!(!g.any_dirty());
    }

    #[test]
    fn test_heat_spreads_without_dirtying() {
        let materials = Materials::new();
        let mut g = grid();
        let mut hot = materials.instance(MaterialId::STONE);
        hot.temperature = 200;
        g.set(3, 3, hot);
        g.set(4, 3, materials.instance(MaterialId::STONE));
        let id = g.get(4, 3).unwrap().id();
        g.clear_dirty();

        let rect = g.rect();
        TemperatureSimulator::new().update(&mut g, rect, &materials, &mut NoopStats);

        let warmed = g.get(4, 3).unwrap();
        assert!(warmed.temperature > 150, "got {}", warmed.temperature);
        assert_eq!(warmed.id(), id);
        assert!(!g.any_dirty());
    }

    #[test]
    fn test_water_next_to_lava_boils() {
        let materials = Materials::new();
        let mut g = grid();
        g.set(3, 3, materials.instance(MaterialId::WATER));
        g.set(3, 4, materials.instance(MaterialId::LAVA));
        g.clear_dirty();

        let mut stats = TickStats::default();
        let rect = g.rect();
        TemperatureSimulator::new().update(&mut g, rect, &materials, &mut stats);

        let steam = g.get(3, 3).unwrap();
        assert_eq!(steam.material, MaterialId::STEAM);
        assert!(steam.temperature > 128);
        assert!(g.dirty[g.index(3, 3).unwrap()]);
        assert_eq!(stats.state_changes, 1);
    }

    #[test]
    fn test_cool_lava_turns_to_obsidian() {
        let materials = Materials::new();
        let mut g = grid();
        let mut lava = materials.instance(MaterialId::LAVA);
        lava.temperature = 100;
        g.set(2, 2, lava);

        let rect = g.rect();
        TemperatureSimulator::new().update(&mut g, rect, &materials, &mut NoopStats);

        assert_eq!(g.material(2, 2), Some(MaterialId::OBSIDIAN));
    }

    #[test]
    fn test_only_zone_is_updated() {
        let materials = Materials::new();
        let mut g = grid();
        let mut lava = materials.instance(MaterialId::LAVA);
        lava.temperature = 100;
        g.set(7, 7, lava);

        TemperatureSimulator::new().update(&mut g, TileRect::new(0, 0, 4, 4), &materials, &mut NoopStats);

        assert_eq!(g.material(7, 7), Some(MaterialId::LAVA));
        assert_eq!(g.get(7, 7).unwrap().temperature, 100);
    }
}
