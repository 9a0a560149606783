use serde::{Deserialize, Serialize};

use crate::geo::Coord;

/// The kind of scan work an instance dispenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceType {
    CirclePokemon,
    CircleRaid,
    SmartCircleRaid,
    AutoQuest,
    PokemonIv,
    Leveling,
    GatherToken,
}

impl InstanceType {
    pub fn label(&self) -> &'static str {
        match self {
            InstanceType::CirclePokemon => "Circle Pokemon",
            InstanceType::CircleRaid => "Circle Raid",
            InstanceType::SmartCircleRaid => "Smart Circle Raid",
            InstanceType::AutoQuest => "Auto Quest",
            InstanceType::PokemonIv => "Pokemon IV",
            InstanceType::Leveling => "Leveling",
            InstanceType::GatherToken => "Gather Token",
        }
    }
}

/// Scan area: either a single polygon / circle-centre list, or several named
/// geofences for the quest and IV instance types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Area {
    Single(Vec<Coord>),
    Multi(Vec<Vec<Coord>>),
}

impl Area {
    /// All rings of the area; a single list becomes one ring.
    pub fn rings(&self) -> Vec<Vec<Coord>> {
        match self {
            Area::Single(coords) => vec![coords.clone()],
            Area::Multi(rings) => rings.clone(),
        }
    }

    pub fn first_coord(&self) -> Option<Coord> {
        match self {
            Area::Single(coords) => coords.first().copied(),
            Area::Multi(rings) => rings.first().and_then(|ring| ring.first()).copied(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Area::Single(coords) => coords.is_empty(),
            Area::Multi(rings) => rings.iter().all(|ring| ring.is_empty()),
        }
    }
}

fn default_max_level() -> u8 {
    29
}

fn default_iv_queue_limit() -> usize {
    100
}

fn default_spin_limit() -> u32 {
    500
}

/// Opaque-per-type configuration bag, persisted alongside the instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceData {
    pub area: Option<Area>,
    #[serde(default)]
    pub min_level: u8,
    #[serde(default = "default_max_level")]
    pub max_level: u8,
    #[serde(default)]
    pub timezone_offset: i32,
    #[serde(default)]
    pub pokemon_ids: Vec<u16>,
    #[serde(default)]
    pub scatter_pokemon_ids: Vec<u16>,
    #[serde(default = "default_iv_queue_limit")]
    pub iv_queue_limit: usize,
    #[serde(default = "default_spin_limit")]
    pub spin_limit: u32,
    #[serde(default)]
    pub restart_on_complete: bool,
}

impl Default for InstanceData {
    fn default() -> Self {
        Self {
            area: None,
            min_level: 0,
            max_level: default_max_level(),
            timezone_offset: 0,
            pokemon_ids: Vec::new(),
            scatter_pokemon_ids: Vec::new(),
            iv_queue_limit: default_iv_queue_limit(),
            spin_limit: default_spin_limit(),
            restart_on_complete: false,
        }
    }
}

/// A named, configured unit of scan work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InstanceType,
    #[serde(default)]
    pub data: InstanceData,
}
