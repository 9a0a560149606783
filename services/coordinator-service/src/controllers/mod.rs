mod auto_quest;
mod circle;
mod iv;
mod leveling;
mod smart_raid;

pub use auto_quest::AutoQuestController;
pub use circle::CircleController;
pub use iv::PokemonIvController;
pub use leveling::LevelingController;
pub use smart_raid::SmartCircleRaidController;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::geo::{Coord, Geofence};
use crate::instance::{Instance, InstanceType};

/// A unit of work handed to a polling device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub action: &'static str,
    pub lat: f64,
    pub lon: f64,
    pub min_level: u8,
    pub max_level: u8,
}

/// A wild pokemon sighting offered to controllers by the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct Sighting {
    pub encounter_id: String,
    pub pokemon_id: u16,
    pub coord: Coord,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("instance {0} has no usable area")]
    EmptyArea(String),
    #[error("instance {0} needs a non-empty pokemon id list")]
    EmptyPokemonList(String),
}

/// Task-dispensing logic for one live instance. Implementations must never
/// block; queue operations are O(log n) or better.
pub trait TaskController: Send + Sync {
    /// Name of the instance this controller serves.
    fn name(&self) -> &str;

    /// Next task for a requesting device, or `None` when exhausted.
    fn get_task(&self, uuid: &str, username: Option<&str>, startup: bool) -> Option<Task>;

    /// Short human-readable progress line.
    fn status(&self) -> String;

    /// Pokemon ids eligible for opportunistic scatter scans.
    fn scatter_allow_list(&self) -> Vec<u16> {
        Vec::new()
    }

    /// Offer a sighting for IV queueing. Default: ignored.
    fn offer_sighting(&self, _sighting: &Sighting) {}

    /// Report a completed quest at a stop coordinate. Default: ignored.
    fn mark_stop_done(&self, _coord: &Coord) {}

    /// Queued-but-unconsumed work, drained on instance reload.
    fn drain_pending(&self) -> Vec<Sighting> {
        Vec::new()
    }

    /// Size of the internal work queue, for status reporting.
    fn pending(&self) -> usize {
        0
    }
}

/// Construct the controller variant matching the instance type. This is the
/// factory operation: configuration problems surface here, not at poll time.
pub fn build(
    instance: &Instance,
    complete_tx: mpsc::UnboundedSender<String>,
) -> Result<Arc<dyn TaskController>, BuildError> {
    let name = instance.name.clone();
    let data = &instance.data;
    let area = data
        .area
        .as_ref()
        .filter(|area| !area.is_empty())
        .ok_or_else(|| BuildError::EmptyArea(name.clone()))?;

    let controller: Arc<dyn TaskController> = match instance.kind {
        InstanceType::CirclePokemon => Arc::new(CircleController::new(
            name,
            "scan_pokemon",
            flatten(area.rings()),
            data.min_level,
            data.max_level,
        )),
        InstanceType::CircleRaid => Arc::new(CircleController::new(
            name,
            "scan_raid",
            flatten(area.rings()),
            data.min_level,
            data.max_level,
        )),
        InstanceType::SmartCircleRaid => Arc::new(SmartCircleRaidController::new(
            name,
            flatten(area.rings()),
            data.min_level,
            data.max_level,
        )),
        InstanceType::AutoQuest => Arc::new(AutoQuestController::new(
            name,
            area.rings(),
            data.min_level,
            data.max_level,
            data.spin_limit,
            data.restart_on_complete,
            complete_tx,
        )),
        InstanceType::PokemonIv => {
            if data.pokemon_ids.is_empty() {
                return Err(BuildError::EmptyPokemonList(name));
            }
            Arc::new(PokemonIvController::new(
                name,
                area.rings().into_iter().map(Geofence::new).collect(),
                data.pokemon_ids.clone(),
                data.scatter_pokemon_ids.clone(),
                data.iv_queue_limit,
                data.min_level,
                data.max_level,
            ))
        }
        InstanceType::Leveling => Arc::new(LevelingController::new(
            instance.name.clone(),
            "leveling",
            area.first_coord()
                .ok_or_else(|| BuildError::EmptyArea(instance.name.clone()))?,
            data.min_level,
            data.max_level,
        )),
        InstanceType::GatherToken => Arc::new(LevelingController::new(
            instance.name.clone(),
            "gather_token",
            area.first_coord()
                .ok_or_else(|| BuildError::EmptyArea(instance.name.clone()))?,
            data.min_level,
            data.max_level,
        )),
    };
    Ok(controller)
}

fn flatten(rings: Vec<Vec<Coord>>) -> Vec<Coord> {
    rings.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Area, InstanceData};

    fn instance(kind: InstanceType, data: InstanceData) -> Instance {
        Instance {
            name: "test".to_string(),
            kind,
            data,
        }
    }

    #[test]
    fn build_rejects_missing_area() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = build(&instance(InstanceType::CirclePokemon, InstanceData::default()), tx)
            .err()
            .expect("should fail");
        assert!(matches!(err, BuildError::EmptyArea(_)));
    }

    #[test]
    fn build_rejects_iv_without_pokemon_ids() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let data = InstanceData {
            area: Some(Area::Single(vec![Coord::new(1.0, 1.0)])),
            ..InstanceData::default()
        };
        let err = build(&instance(InstanceType::PokemonIv, data), tx)
            .err()
            .expect("should fail");
        assert!(matches!(err, BuildError::EmptyPokemonList(_)));
    }

    #[test]
    fn build_constructs_each_variant() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let area = Some(Area::Single(vec![Coord::new(1.0, 1.0), Coord::new(2.0, 2.0)]));
        for kind in [
            InstanceType::CirclePokemon,
            InstanceType::CircleRaid,
            InstanceType::SmartCircleRaid,
            InstanceType::AutoQuest,
            InstanceType::Leveling,
            InstanceType::GatherToken,
        ] {
            let data = InstanceData {
                area: area.clone(),
                ..InstanceData::default()
            };
            assert!(build(&instance(kind, data), tx.clone()).is_ok(), "{kind:?}");
        }
    }
}
