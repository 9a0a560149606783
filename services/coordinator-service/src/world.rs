use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::controllers::Sighting;
use crate::decoder::{
    ClientWeather, EncounterResponse, FortData, FortDetailsResponse, GymInfoResponse,
    NearbyPokemon, Quest, WildPokemon,
};
use crate::geo::Coord;

/// Number of consecutive empty map-object uploads from the same cell before
/// we call the cell confirmed-empty.
const EMPTY_CONFIRM_COUNT: u32 = 3;

#[derive(Debug, Clone)]
pub struct PokemonRecord {
    pub encounter_id: String,
    pub pokemon_id: u16,
    pub coord: Coord,
    pub atk_iv: Option<u8>,
    pub def_iv: Option<u8>,
    pub sta_iv: Option<u8>,
    pub updated: u64,
}

#[derive(Debug, Clone)]
pub struct FortRecord {
    pub id: String,
    pub coord: Coord,
    pub is_gym: bool,
    pub enabled: bool,
    pub name: Option<String>,
    pub updated: u64,
}

#[derive(Debug, Clone)]
pub struct QuestRecord {
    pub fort_id: String,
    pub quest_type: u16,
    pub coord: Coord,
    pub updated: u64,
}

#[derive(Debug, Clone)]
pub struct WeatherRecord {
    pub cell_id: u64,
    pub condition: u8,
    pub updated: u64,
}

/// In-memory world state fed by the ingestion pipeline. This is the sink the
/// rest of the map stack reads from; records are keyed by their upstream ids
/// and updated last-write-wins.
#[derive(Default)]
pub struct WorldStore {
    pokemon: RwLock<HashMap<String, PokemonRecord>>,
    forts: RwLock<HashMap<String, FortRecord>>,
    quests: RwLock<HashMap<String, QuestRecord>>,
    weather: RwLock<HashMap<u64, WeatherRecord>>,
    cells: RwLock<HashMap<u64, u64>>,
    empty_counts: RwLock<HashMap<u64, u32>>,
}

fn now() -> u64 {
    Utc::now().timestamp() as u64
}

impl WorldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn consume_cells(&self, cell_ids: &[u64]) {
        let ts = now();
        let mut cells = self.cells.write().await;
        for &id in cell_ids {
            cells.insert(id, ts);
        }
    }

    pub async fn consume_weather(&self, weather: &[ClientWeather]) {
        let ts = now();
        let mut map = self.weather.write().await;
        for w in weather {
            map.insert(
                w.s2_cell_id,
                WeatherRecord {
                    cell_id: w.s2_cell_id,
                    condition: w.gameplay_weather.gameplay_condition,
                    updated: ts,
                },
            );
        }
    }

    /// Wild sightings carry their own coordinates and are always stored.
    /// Returns the sightings so the caller can offer them to controllers.
    pub async fn consume_wild(&self, wilds: &[WildPokemon]) -> Vec<Sighting> {
        let ts = now();
        let mut map = self.pokemon.write().await;
        let mut sightings = Vec::with_capacity(wilds.len());
        for wild in wilds {
            let coord = Coord::new(wild.latitude, wild.longitude);
            let record = map
                .entry(wild.encounter_id.clone())
                .or_insert_with(|| PokemonRecord {
                    encounter_id: wild.encounter_id.clone(),
                    pokemon_id: wild.pokemon_data.pokemon_id,
                    coord,
                    atk_iv: None,
                    def_iv: None,
                    sta_iv: None,
                    updated: ts,
                });
            record.pokemon_id = wild.pokemon_data.pokemon_id;
            record.coord = coord;
            record.updated = ts;
            sightings.push(Sighting {
                encounter_id: wild.encounter_id.clone(),
                pokemon_id: wild.pokemon_data.pokemon_id,
                coord,
            });
        }
        sightings
    }

    /// Nearby sightings have no coordinates of their own; they are only kept
    /// when the referenced fort is already known.
    pub async fn consume_nearby(&self, nearby: &[NearbyPokemon]) -> usize {
        let ts = now();
        let forts = self.forts.read().await;
        let mut map = self.pokemon.write().await;
        let mut stored = 0;
        for n in nearby {
            let Some(fort) = forts.get(&n.fort_id) else {
                debug!(fort_id = %n.fort_id, "nearby sighting for unknown fort");
                continue;
            };
            map.entry(n.encounter_id.clone())
                .or_insert_with(|| PokemonRecord {
                    encounter_id: n.encounter_id.clone(),
                    pokemon_id: n.pokemon_id,
                    coord: fort.coord,
                    atk_iv: None,
                    def_iv: None,
                    sta_iv: None,
                    updated: ts,
                });
            stored += 1;
        }
        stored
    }

    pub async fn consume_forts(&self, forts: &[FortData]) {
        let ts = now();
        let mut map = self.forts.write().await;
        for fort in forts {
            let coord = Coord::new(fort.latitude, fort.longitude);
            let record = map.entry(fort.id.clone()).or_insert_with(|| FortRecord {
                id: fort.id.clone(),
                coord,
                is_gym: fort.r#type == 0,
                enabled: fort.enabled,
                name: None,
                updated: ts,
            });
            record.coord = coord;
            record.is_gym = fort.r#type == 0;
            record.enabled = fort.enabled;
            record.updated = ts;
        }
    }

    pub async fn consume_fort_details(&self, details: &[FortDetailsResponse]) {
        let ts = now();
        let mut map = self.forts.write().await;
        for d in details {
            match map.get_mut(&d.fort_id) {
                Some(record) => {
                    record.name = Some(d.name.clone());
                    record.updated = ts;
                }
                None => {
                    map.insert(
                        d.fort_id.clone(),
                        FortRecord {
                            id: d.fort_id.clone(),
                            coord: Coord::new(d.latitude, d.longitude),
                            is_gym: false,
                            enabled: true,
                            name: Some(d.name.clone()),
                            updated: ts,
                        },
                    );
                }
            }
        }
    }

    pub async fn consume_gym_infos(&self, infos: &[GymInfoResponse]) {
        let ts = now();
        let mut map = self.forts.write().await;
        for info in infos {
            if let Some(record) = map.get_mut(&info.fort_id) {
                record.name = Some(info.name.clone());
                record.is_gym = true;
                record.updated = ts;
            } else {
                warn!(fort_id = %info.fort_id, "gym info for unknown fort");
            }
        }
    }

    /// Store quests and return the coordinate of each quest's fort so the
    /// caller can confirm visited stops against the quest-mode controller.
    pub async fn consume_quests(&self, quests: &[Quest]) -> Vec<Coord> {
        let ts = now();
        let forts = self.forts.read().await;
        let mut map = self.quests.write().await;
        let mut coords = Vec::with_capacity(quests.len());
        for quest in quests {
            let coord = forts
                .get(&quest.fort_id)
                .map(|f| f.coord)
                .unwrap_or_else(|| Coord::new(quest.latitude, quest.longitude));
            map.insert(
                quest.fort_id.clone(),
                QuestRecord {
                    fort_id: quest.fort_id.clone(),
                    quest_type: quest.quest_type,
                    coord,
                    updated: ts,
                },
            );
            coords.push(coord);
        }
        coords
    }

    /// Apply full-detail encounters: these carry IVs and win over any prior
    /// wild sighting for the same encounter id.
    pub async fn consume_encounters(&self, encounters: &[EncounterResponse]) -> usize {
        let ts = now();
        let mut map = self.pokemon.write().await;
        let mut stored = 0;
        for enc in encounters {
            let Some(wp) = enc.wild_pokemon.as_ref() else {
                continue;
            };
            let coord = Coord::new(wp.latitude, wp.longitude);
            let record = map
                .entry(wp.encounter_id.clone())
                .or_insert_with(|| PokemonRecord {
                    encounter_id: wp.encounter_id.clone(),
                    pokemon_id: wp.pokemon_data.pokemon_id,
                    coord,
                    atk_iv: None,
                    def_iv: None,
                    sta_iv: None,
                    updated: ts,
                });
            record.pokemon_id = wp.pokemon_data.pokemon_id;
            record.coord = coord;
            record.atk_iv = wp.pokemon_data.individual_attack;
            record.def_iv = wp.pokemon_data.individual_defense;
            record.sta_iv = wp.pokemon_data.individual_stamina;
            record.updated = ts;
            stored += 1;
        }
        stored
    }

    pub async fn has_iv(&self, encounter_id: &str) -> bool {
        self.pokemon
            .read()
            .await
            .get(encounter_id)
            .map(|p| p.atk_iv.is_some())
            .unwrap_or(false)
    }

    pub async fn pokemon(&self, encounter_id: &str) -> Option<PokemonRecord> {
        self.pokemon.read().await.get(encounter_id).cloned()
    }

    pub async fn fort(&self, id: &str) -> Option<FortRecord> {
        self.forts.read().await.get(id).cloned()
    }

    pub async fn quest(&self, fort_id: &str) -> Option<QuestRecord> {
        self.quests.read().await.get(fort_id).cloned()
    }

    pub async fn weather(&self, cell_id: u64) -> Option<WeatherRecord> {
        self.weather.read().await.get(&cell_id).cloned()
    }

    pub async fn counts(&self) -> (usize, usize, usize) {
        let pokemon = self.pokemon.read().await.len();
        let forts = self.forts.read().await.len();
        let quests = self.quests.read().await.len();
        (pokemon, forts, quests)
    }

    /// Bump the empty-upload counter for each cell; returns the cells that
    /// just reached the confirmation threshold.
    pub async fn note_empty(&self, cell_ids: &[u64]) -> Vec<u64> {
        let mut counts = self.empty_counts.write().await;
        let mut confirmed = Vec::new();
        for &id in cell_ids {
            let count = counts.entry(id).or_insert(0);
            *count += 1;
            if *count == EMPTY_CONFIRM_COUNT {
                confirmed.push(id);
            }
        }
        confirmed
    }

    /// A non-empty upload resets the counters for its cells.
    pub async fn note_filled(&self, cell_ids: &[u64]) {
        let mut counts = self.empty_counts.write().await;
        for id in cell_ids {
            counts.remove(id);
        }
    }
}
