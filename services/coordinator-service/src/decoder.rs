use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

/// Method ids carried in raw upload frames. Anything else is skipped by the
/// ingestion pipeline rather than rejected.
pub const METHOD_PLAYER: u32 = 2;
pub const METHOD_INVENTORY: u32 = 4;
pub const METHOD_FORT_SEARCH: u32 = 101;
pub const METHOD_ENCOUNTER: u32 = 102;
pub const METHOD_FORT_DETAILS: u32 = 104;
pub const METHOD_GYM_INFO: u32 = 156;
pub const METHOD_MAP_OBJECTS: u32 = 106;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown method {0}")]
    UnknownMethod(u32),
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PokemonData {
    #[serde(default)]
    pub pokemon_id: u16,
    pub individual_attack: Option<u8>,
    pub individual_defense: Option<u8>,
    pub individual_stamina: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WildPokemon {
    pub encounter_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub pokemon_data: PokemonData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NearbyPokemon {
    pub encounter_id: String,
    #[serde(default)]
    pub pokemon_id: u16,
    #[serde(default)]
    pub fort_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FortData {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// 0 = gym, 1 = pokestop in the upstream enum.
    #[serde(default)]
    pub r#type: u8,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapCell {
    pub s2_cell_id: u64,
    #[serde(default)]
    pub center_lat: f64,
    #[serde(default)]
    pub center_lon: f64,
    #[serde(default)]
    pub current_timestamp_ms: u64,
    #[serde(default)]
    pub wild_pokemons: Vec<WildPokemon>,
    #[serde(default)]
    pub nearby_pokemons: Vec<NearbyPokemon>,
    #[serde(default)]
    pub forts: Vec<FortData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientWeather {
    pub s2_cell_id: u64,
    #[serde(default)]
    pub gameplay_weather: GameplayWeather,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameplayWeather {
    #[serde(default)]
    pub gameplay_condition: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapObjects {
    #[serde(default)]
    pub map_cells: Vec<MapCell>,
    #[serde(default)]
    pub client_weather: Vec<ClientWeather>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Player {
    #[serde(default)]
    pub player_data: PlayerData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerData {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub inventory_delta: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Quest {
    pub fort_id: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub quest_type: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChallengeQuest {
    pub quest: Option<Quest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FortSearchResponse {
    #[serde(default)]
    pub challenge_quest: ChallengeQuest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncounterResponse {
    pub wild_pokemon: Option<WildPokemon>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FortDetailsResponse {
    pub fort_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GymInfoResponse {
    #[serde(default)]
    pub gym_status_and_defenders: serde_json::Value,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fort_id: String,
}

/// One decoded upload frame, tagged by its source method.
#[derive(Debug, Clone)]
pub enum Frame {
    Player(Player),
    Inventory(Inventory),
    FortSearch(FortSearchResponse),
    Encounter(EncounterResponse),
    FortDetails(FortDetailsResponse),
    GymInfo(GymInfoResponse),
    MapObjects(MapObjects),
}

/// Decode one frame: base64-wrapped JSON, selected by method id. The device
/// client does the protobuf work; by the time data reaches us it is already
/// plain JSON.
pub fn decode(method: u32, data: &str) -> Result<Frame, DecodeError> {
    let bytes = STANDARD.decode(data)?;
    let frame = match method {
        METHOD_PLAYER => Frame::Player(serde_json::from_slice(&bytes)?),
        METHOD_INVENTORY => Frame::Inventory(serde_json::from_slice(&bytes)?),
        METHOD_FORT_SEARCH => Frame::FortSearch(serde_json::from_slice(&bytes)?),
        METHOD_ENCOUNTER => Frame::Encounter(serde_json::from_slice(&bytes)?),
        METHOD_FORT_DETAILS => Frame::FortDetails(serde_json::from_slice(&bytes)?),
        METHOD_GYM_INFO => Frame::GymInfo(serde_json::from_slice(&bytes)?),
        METHOD_MAP_OBJECTS => Frame::MapObjects(serde_json::from_slice(&bytes)?),
        other => return Err(DecodeError::UnknownMethod(other)),
    };
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(json: &str) -> String {
        STANDARD.encode(json)
    }

    #[test]
    fn decodes_map_objects() {
        let data = encode(
            r#"{"map_cells":[{"s2_cell_id":42,"current_timestamp_ms":1000,
                "wild_pokemons":[{"encounter_id":"e1","latitude":1.0,"longitude":2.0,
                    "pokemon_data":{"pokemon_id":25}}],
                "forts":[{"id":"f1","latitude":1.0,"longitude":2.0,"type":1,"enabled":true}]}],
              "client_weather":[{"s2_cell_id":42,"gameplay_weather":{"gameplay_condition":3}}]}"#,
        );
        match decode(METHOD_MAP_OBJECTS, &data).unwrap() {
            Frame::MapObjects(mo) => {
                assert_eq!(mo.map_cells.len(), 1);
                assert_eq!(mo.map_cells[0].wild_pokemons[0].pokemon_data.pokemon_id, 25);
                assert_eq!(mo.client_weather[0].gameplay_weather.gameplay_condition, 3);
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn decodes_encounter_with_ivs() {
        let data = encode(
            r#"{"wild_pokemon":{"encounter_id":"e1","latitude":1.0,"longitude":2.0,
                "pokemon_data":{"pokemon_id":25,"individual_attack":15,
                    "individual_defense":14,"individual_stamina":13}}}"#,
        );
        match decode(METHOD_ENCOUNTER, &data).unwrap() {
            Frame::Encounter(enc) => {
                let wp = enc.wild_pokemon.unwrap();
                assert_eq!(wp.pokemon_data.individual_attack, Some(15));
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_method_is_an_error() {
        let data = encode("{}");
        assert!(matches!(
            decode(999, &data),
            Err(DecodeError::UnknownMethod(999))
        ));
    }

    #[test]
    fn bad_base64_is_an_error() {
        assert!(matches!(
            decode(METHOD_PLAYER, "!!not base64!!"),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let data = encode(r#"{"map_cells": "nope"}"#);
        assert!(matches!(
            decode(METHOD_MAP_OBJECTS, &data),
            Err(DecodeError::Malformed(_))
        ));
    }
}
