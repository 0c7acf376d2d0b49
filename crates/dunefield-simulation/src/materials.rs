//! Material definitions and registry

use serde::{Deserialize, Serialize};

use crate::MaterialInstance;

/// Built-in material IDs
pub struct MaterialId;

impl MaterialId {
    pub const AIR: u16 = 0;

    // Generic templates, one per physics class
    pub const GENERIC_SOLID: u16 = 1;
    pub const GENERIC_SAND: u16 = 2;
    pub const GENERIC_LIQUID: u16 = 3;
    pub const GENERIC_GAS: u16 = 4;
    pub const GENERIC_PASSABLE: u16 = 5;
    pub const GENERIC_OBJECT: u16 = 6;

    /// Placeholder shown while a chunk is still loading
    pub const TEST_SOLID: u16 = 7;

    // Terrain
    pub const STONE: u16 = 8;
    pub const GRASS: u16 = 9;
    pub const DIRT: u16 = 10;
    pub const SMOOTH_STONE: u16 = 11;
    pub const COBBLE_STONE: u16 = 12;
    pub const SMOOTH_DIRT: u16 = 13;
    pub const COBBLE_DIRT: u16 = 14;
    pub const SOFT_DIRT: u16 = 15;
    pub const SOFT_DIRT_SAND: u16 = 16;
    pub const FLAT_COBBLE_STONE: u16 = 17;
    pub const FLAT_COBBLE_DIRT: u16 = 18;
    pub const CLOUD: u16 = 19;
    pub const WOOD: u16 = 20;

    // Fluids and gases
    pub const WATER: u16 = 21;
    pub const LAVA: u16 = 22;
    pub const STEAM: u16 = 23;
    pub const FIRE: u16 = 24;

    // Minerals
    pub const GOLD_ORE: u16 = 25;
    pub const GOLD_MOLTEN: u16 = 26;
    pub const GOLD_SOLID: u16 = 27;
    pub const IRON_ORE: u16 = 28;
    pub const OBSIDIAN: u16 = 29;
}

/// How a material behaves in the cellular automaton
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicsType {
    /// Empty space
    Air,
    /// Static terrain, only moves when carved into a rigid body
    Solid,
    /// Granular matter that falls and piles up
    Sand,
    /// Liquid, simulated with fluid amounts
    Soup,
    /// Rises and drifts
    Gas,
    /// Occupies a tile but lets others pass (fire)
    Passable,
    /// Tile owned by a rigid body
    Object,
}

/// Effect applied when a moving tile meets a specific neighbour material
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum InteractionKind {
    /// Replace every tile of the neighbour material within `radius` of the offset
    Transform { into: u16, radius: i32 },
    /// Fill the tile at the offset with a material if it is air
    Spawn { material: u16 },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Neighbour material that triggers this interaction
    pub with: u16,
    pub kind: InteractionKind,
    /// Offset from the acting tile where the effect is centred
    pub offset: (i32, i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReactionKind {
    TemperatureAbove,
    TemperatureBelow,
}

/// Phase change triggered by temperature
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub kind: ReactionKind,
    pub threshold: i32,
    pub into: u16,
}

impl Reaction {
    pub fn triggers(&self, temperature: i32) -> bool {
        match self.kind {
            ReactionKind::TemperatureAbove => temperature > self.threshold,
            ReactionKind::TemperatureBelow => temperature < self.threshold,
        }
    }
}

/// Definition of a material's properties
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaterialDef {
    pub id: u16,
    pub name: String,
    pub physics: PhysicsType,

    /// Base color (0xAARRGGBB)
    pub color: u32,
    /// Density, compared when loose tiles displace each other
    pub density: f32,
    /// Automaton passes per tick (0 = never updated)
    pub iterations: u8,
    /// Higher values let sand slide further before sticking
    pub slipperiness: i32,

    /// Light emission intensity (0 = none)
    pub emit: u8,
    pub emit_color: u32,

    // Thermal properties
    pub conduction_self: f32,
    pub conduction_other: f32,
    /// Heat added every tick
    pub add_temp: i32,
    /// Temperature of freshly created instances
    pub default_temperature: i32,

    /// Fire may ignite this material
    pub flammable: bool,

    pub interactions: Vec<Interaction>,
    pub reactions: Vec<Reaction>,
}

impl Default for MaterialDef {
    fn default() -> Self {
        Self {
            id: 0,
            name: "unknown".to_string(),
            physics: PhysicsType::Solid,
            color: 0xffff00ff, // Magenta for missing materials
            density: 1.0,
            iterations: 0,
            slipperiness: 1,
            emit: 0,
            emit_color: 0,
            conduction_self: 1.0,
            conduction_other: 1.0,
            add_temp: 0,
            default_temperature: 0,
            flammable: false,
            interactions: Vec::new(),
            reactions: Vec::new(),
        }
    }
}

impl MaterialDef {
    /// Interactions triggered by a given neighbour material
    pub fn interactions_with(&self, neighbour: u16) -> impl Iterator<Item = &Interaction> {
        self.interactions.iter().filter(move |i| i.with == neighbour)
    }

    pub fn is_loose(&self) -> bool {
        matches!(self.physics, PhysicsType::Sand | PhysicsType::Soup)
    }
}

/// Registry of all materials
pub struct Materials {
    materials: Vec<MaterialDef>,
}

impl Materials {
    pub fn new() -> Self {
        let mut materials = Self {
            materials: Vec::new(),
        };
        materials.register_defaults();
        materials
    }

    fn register_defaults(&mut self) {
        self.register(MaterialDef {
            id: MaterialId::AIR,
            name: "air".to_string(),
            physics: PhysicsType::Air,
            color: 0x00000000,
            density: 0.0,
            conduction_self: 0.8,
            conduction_other: 0.8,
            ..Default::default()
        });

        self.register(MaterialDef {
            id: MaterialId::GENERIC_SOLID,
            name: "generic solid".to_string(),
            color: 0xff808080,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::GENERIC_SAND,
            name: "generic sand".to_string(),
            physics: PhysicsType::Sand,
            color: 0xffc2b280,
            density: 10.0,
            iterations: 2,
            slipperiness: 20,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::GENERIC_LIQUID,
            name: "generic liquid".to_string(),
            physics: PhysicsType::Soup,
            color: 0xc04060c0,
            density: 1.5,
            iterations: 3,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::GENERIC_GAS,
            name: "generic gas".to_string(),
            physics: PhysicsType::Gas,
            color: 0x80c0c0c0,
            density: -1.0,
            iterations: 1,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::GENERIC_PASSABLE,
            name: "generic passable".to_string(),
            physics: PhysicsType::Passable,
            color: 0x80a0a0a0,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::GENERIC_OBJECT,
            name: "generic object".to_string(),
            physics: PhysicsType::Object,
            color: 0xff606060,
            density: 1000.0,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::TEST_SOLID,
            name: "loading".to_string(),
            color: 0xffff0000,
            ..Default::default()
        });

        // Terrain
        self.register(MaterialDef {
            id: MaterialId::STONE,
            name: "stone".to_string(),
            color: 0xff7f7f7f,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::GRASS,
            name: "grass".to_string(),
            physics: PhysicsType::Sand,
            color: 0xff3f9b2f,
            density: 12.0,
            iterations: 1,
            slipperiness: 20,
            flammable: true,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::DIRT,
            name: "dirt".to_string(),
            physics: PhysicsType::Sand,
            color: 0xff7a5230,
            density: 15.0,
            iterations: 1,
            slipperiness: 8,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::SMOOTH_STONE,
            name: "smooth stone".to_string(),
            color: 0xff6e6e72,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::COBBLE_STONE,
            name: "cobblestone".to_string(),
            color: 0xff5d5d61,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::SMOOTH_DIRT,
            name: "smooth dirt".to_string(),
            color: 0xff6b4a2b,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::COBBLE_DIRT,
            name: "cobbled dirt".to_string(),
            color: 0xff5e4026,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::SOFT_DIRT,
            name: "soft dirt".to_string(),
            color: 0xff84593a,
            density: 15.0,
            iterations: 2,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::SOFT_DIRT_SAND,
            name: "loose soft dirt".to_string(),
            physics: PhysicsType::Sand,
            color: 0xff84593a,
            density: 15.0,
            iterations: 2,
            slipperiness: 8,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::FLAT_COBBLE_STONE,
            name: "flat cobblestone".to_string(),
            color: 0xff66666a,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::FLAT_COBBLE_DIRT,
            name: "flat cobbled dirt".to_string(),
            color: 0xff66472a,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::CLOUD,
            name: "cloud".to_string(),
            color: 0x80ffffff,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::WOOD,
            name: "wood".to_string(),
            color: 0xff6f4a24,
            flammable: true,
            ..Default::default()
        });

        // Fluids and gases
        self.register(MaterialDef {
            id: MaterialId::WATER,
            name: "water".to_string(),
            physics: PhysicsType::Soup,
            color: 0x803f6fdf,
            density: 1.5,
            iterations: 6,
            emit: 40,
            emit_color: 0x403f6fdf,
            interactions: vec![
                Interaction {
                    with: MaterialId::LAVA,
                    kind: InteractionKind::Transform {
                        into: MaterialId::OBSIDIAN,
                        radius: 1,
                    },
                    offset: (0, 1),
                },
                Interaction {
                    with: MaterialId::LAVA,
                    kind: InteractionKind::Spawn {
                        material: MaterialId::STEAM,
                    },
                    offset: (0, -1),
                },
            ],
            reactions: vec![Reaction {
                kind: ReactionKind::TemperatureAbove,
                threshold: 128,
                into: MaterialId::STEAM,
            }],
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::LAVA,
            name: "lava".to_string(),
            physics: PhysicsType::Soup,
            color: 0xc0ff5a10,
            density: 2.0,
            iterations: 1,
            emit: 255,
            emit_color: 0xffff6a20,
            conduction_self: 0.5,
            conduction_other: 0.7,
            add_temp: 2,
            default_temperature: 1024,
            reactions: vec![Reaction {
                kind: ReactionKind::TemperatureBelow,
                threshold: 512,
                into: MaterialId::OBSIDIAN,
            }],
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::STEAM,
            name: "steam".to_string(),
            physics: PhysicsType::Gas,
            color: 0x80d0d0d8,
            density: -1.0,
            iterations: 1,
            default_temperature: 160,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::FIRE,
            name: "fire".to_string(),
            physics: PhysicsType::Passable,
            color: 0xffff6432,
            density: 20.0,
            iterations: 1,
            emit: 255,
            emit_color: 0xffff7830,
            default_temperature: 256,
            ..Default::default()
        });

        // Minerals
        self.register(MaterialDef {
            id: MaterialId::GOLD_ORE,
            name: "gold ore".to_string(),
            physics: PhysicsType::Sand,
            color: 0xffc8a83c,
            density: 20.0,
            iterations: 2,
            slipperiness: 20,
            reactions: vec![Reaction {
                kind: ReactionKind::TemperatureAbove,
                threshold: 512,
                into: MaterialId::GOLD_MOLTEN,
            }],
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::GOLD_MOLTEN,
            name: "molten gold".to_string(),
            physics: PhysicsType::Soup,
            color: 0xffffc040,
            density: 20.0,
            iterations: 4,
            emit: 160,
            emit_color: 0xffffc040,
            default_temperature: 640,
            reactions: vec![Reaction {
                kind: ReactionKind::TemperatureBelow,
                threshold: 128,
                into: MaterialId::GOLD_SOLID,
            }],
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::GOLD_SOLID,
            name: "solid gold".to_string(),
            color: 0xffe6b422,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::IRON_ORE,
            name: "iron ore".to_string(),
            physics: PhysicsType::Sand,
            color: 0xff9a6d5a,
            density: 20.0,
            iterations: 2,
            slipperiness: 20,
            ..Default::default()
        });
        self.register(MaterialDef {
            id: MaterialId::OBSIDIAN,
            name: "obsidian".to_string(),
            color: 0xff24182e,
            ..Default::default()
        });

        log::debug!("Registered {} materials", self.materials.len());
    }

    fn register(&mut self, material: MaterialDef) {
        let id = material.id as usize;

        if self.materials.len() <= id {
            self.materials.resize(id + 1, MaterialDef::default());
        }

        self.materials[id] = material;
    }

    /// Get material definition by ID (air for unknown ids)
    pub fn get(&self, id: u16) -> &MaterialDef {
        self.materials
            .get(id as usize)
            .unwrap_or(&self.materials[0])
    }

    pub fn physics(&self, id: u16) -> PhysicsType {
        self.get(id).physics
    }

    /// Create a fresh instance of a material with its base color and temperature
    pub fn instance(&self, id: u16) -> MaterialInstance {
        let def = self.get(id);
        if def.physics == PhysicsType::Air {
            return MaterialInstance::AIR;
        }
        MaterialInstance::new(def.id, def.color, def.default_temperature)
    }

    /// Create a fresh instance with an explicit color (texture variation)
    pub fn instance_colored(&self, id: u16, color: u32) -> MaterialInstance {
        let def = self.get(id);
        MaterialInstance::new(def.id, color, def.default_temperature)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaterialDef> {
        self.materials.iter()
    }
}

impl Default for Materials {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_match_registry_slots() {
        let materials = Materials::new();
        for (slot, def) in materials.iter().enumerate() {
            assert_eq!(def.id as usize, slot, "material {} registered out of place", def.name);
        }
    }

    #[test]
    fn test_unknown_id_falls_back_to_air() {
        let materials = Materials::new();
        assert_eq!(materials.get(9999).physics, PhysicsType::Air);
    }

    #[test]
    fn test_reaction_thresholds() {
        let materials = Materials::new();
        let lava = materials.get(MaterialId::LAVA);
        let reaction = lava.reactions[0];
        assert!(reaction.triggers(100));
        assert!(!reaction.triggers(1024));

        let water = materials.get(MaterialId::WATER);
        assert!(water.reactions[0].triggers(200));
        assert!(!water.reactions[0].triggers(20));
    }

    #[test]
    fn test_fresh_lava_is_hot_enough_to_stay_liquid() {
        let materials = Materials::new();
        let lava = materials.instance(MaterialId::LAVA);
        let def = materials.get(MaterialId::LAVA);
        assert!(!def.reactions.iter().any(|r| r.triggers(lava.temperature)));
    }

    #[test]
    fn test_water_lava_interactions() {
        let materials = Materials::new();
        let water = materials.get(MaterialId::WATER);
        assert_eq!(water.interactions_with(MaterialId::LAVA).count(), 2);
        assert_eq!(water.interactions_with(MaterialId::STONE).count(), 0);
    }
}
