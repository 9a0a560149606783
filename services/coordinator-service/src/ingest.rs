use axum::http::StatusCode;
use tracing::{debug, info, warn};

use crate::decoder::{
    self, ClientWeather, EncounterResponse, Frame, FortData, FortDetailsResponse, GymInfoResponse,
    NearbyPokemon, Quest, WildPokemon,
};
use crate::geo::Coord;
use crate::models::{RawFrame, RawRequest, RawSummary, ScatterPokemon};
use crate::service::ServiceError;
use crate::state::AppState;

/// Wilds further than this from the target encounter are never scatter
/// candidates.
const SCATTER_RADIUS_M: f64 = 35.0;
/// Floor for the cell-center fallback of the in-area check.
const CELL_RADIUS_FLOOR_M: f64 = 100.0;
/// Devices below this trainer level do not get full encounter payloads, so
/// their encounter frames are dropped unless the client is MAD-style.
const ENCOUNTER_MIN_LEVEL: u8 = 30;

struct Accumulated {
    cells: Vec<u64>,
    cell_centers: Vec<Coord>,
    weather: Vec<ClientWeather>,
    wilds: Vec<WildPokemon>,
    nearby: Vec<NearbyPokemon>,
    forts: Vec<FortData>,
    fort_details: Vec<FortDetailsResponse>,
    gym_infos: Vec<GymInfoResponse>,
    quests: Vec<Quest>,
    encounters: Vec<EncounterResponse>,
    gmo_frames: usize,
    empty_gmo_frames: usize,
    invalid_gmo_frames: usize,
}

impl Accumulated {
    fn new() -> Self {
        Self {
            cells: Vec::new(),
            cell_centers: Vec::new(),
            weather: Vec::new(),
            wilds: Vec::new(),
            nearby: Vec::new(),
            forts: Vec::new(),
            fort_details: Vec::new(),
            gym_infos: Vec::new(),
            quests: Vec::new(),
            encounters: Vec::new(),
            gmo_frames: 0,
            empty_gmo_frames: 0,
            invalid_gmo_frames: 0,
        }
    }
}

/// Strip the `Optional("...")` wrapper some clients put around usernames.
fn unwrap_username(raw: &str) -> String {
    raw.strip_prefix("Optional(")
        .and_then(|s| s.strip_suffix(')'))
        .map(|s| s.trim_matches('"'))
        .unwrap_or(raw)
        .to_string()
}

/// Ingest one raw upload: decode every frame, merge the results into the
/// world store, feed sightings and visited stops back into the controllers,
/// and answer the device's questions about its own upload.
pub async fn handle_raw(state: &AppState, req: RawRequest) -> Result<RawSummary, ServiceError> {
    let mut is_mad = false;
    let frames: Vec<RawFrame> = if let Some(contents) = req.contents.clone() {
        contents
    } else if let Some(protos) = req.protos.clone() {
        protos
    } else if let Some(gmo) = req.gmo.clone() {
        gmo
    } else if req.payload.is_some() {
        is_mad = true;
        vec![RawFrame {
            method: req.type_id,
            data: req.payload.clone(),
            type_id: None,
            payload: None,
        }]
    } else {
        return Err(ServiceError::new(
            StatusCode::BAD_REQUEST,
            "no_content",
            "upload carries no contents, protos, gmo or payload",
        ));
    };

    let username = if is_mad {
        Some("PogoDroid".to_string())
    } else {
        req.username.as_deref().map(unwrap_username)
    };
    let trainer_level = req.trainer_level();

    if let (Some(username), Some(level)) = (username.as_deref(), trainer_level) {
        if level > 0 {
            state.accounts.set_level_if_changed(username, level).await;
        }
    }

    if let (Some(uuid), Some(lat), Some(lon)) =
        (req.uuid.as_deref(), req.lat_target, req.lon_target)
    {
        state.devices.set_location(uuid, lat, lon).await;
    }

    let mut acc = Accumulated::new();
    for frame in &frames {
        let Some(data) = frame.data.as_deref().or(frame.payload.as_deref()) else {
            debug!("frame without data skipped");
            continue;
        };
        // Some clients omit the method id on map-object uploads.
        let method = frame
            .method
            .or(frame.type_id)
            .unwrap_or(decoder::METHOD_MAP_OBJECTS);
        match decoder::decode(method, data) {
            Ok(decoded) => consume_frame(state, &mut acc, decoded).await,
            Err(err) => {
                debug!(method, error = %err, "undecodable frame skipped");
                if method == decoder::METHOD_MAP_OBJECTS {
                    acc.gmo_frames += 1;
                    acc.invalid_gmo_frames += 1;
                }
            }
        }
    }

    // Devices under the encounter level upload truncated encounter frames;
    // MAD-style clients are trusted to filter on their side.
    let level_allows_encounters =
        is_mad || trainer_level.map(|l| l >= ENCOUNTER_MIN_LEVEL).unwrap_or(false);
    if !level_allows_encounters && !acc.encounters.is_empty() {
        debug!(
            count = acc.encounters.len(),
            level = trainer_level,
            "encounters dropped for low-level device"
        );
        acc.encounters.clear();
    }

    let summary = merge(state, req, acc, username, trainer_level).await;
    Ok(summary)
}

async fn consume_frame(state: &AppState, acc: &mut Accumulated, frame: Frame) {
    match frame {
        Frame::Player(_) | Frame::Inventory(_) => {}
        Frame::FortSearch(fs) => {
            if let Some(quest) = fs.challenge_quest.quest {
                acc.quests.push(quest);
            }
        }
        Frame::Encounter(enc) => acc.encounters.push(enc),
        Frame::FortDetails(fd) => acc.fort_details.push(fd),
        Frame::GymInfo(gi) => acc.gym_infos.push(gi),
        Frame::MapObjects(mo) => {
            acc.gmo_frames += 1;
            if mo.map_cells.is_empty() {
                acc.invalid_gmo_frames += 1;
                return;
            }
            // Cell ids and centers count even for empty cells; the in-area
            // fallback exists for exactly the no-content case.
            let cell_ids: Vec<u64> = mo.map_cells.iter().map(|c| c.s2_cell_id).collect();
            for cell in &mo.map_cells {
                acc.cells.push(cell.s2_cell_id);
                acc.cell_centers.push(Coord::new(cell.center_lat, cell.center_lon));
            }
            let empty = mo.map_cells.iter().all(|c| {
                c.wild_pokemons.is_empty() && c.nearby_pokemons.is_empty() && c.forts.is_empty()
            });
            if empty {
                acc.empty_gmo_frames += 1;
                let confirmed = state.world.note_empty(&cell_ids).await;
                for cell_id in confirmed {
                    warn!(cell_id, "cell confirmed empty after repeated empty uploads");
                }
                return;
            }
            state.world.note_filled(&cell_ids).await;
            for cell in mo.map_cells {
                acc.wilds.extend(cell.wild_pokemons);
                acc.nearby.extend(cell.nearby_pokemons);
                acc.forts.extend(cell.forts);
            }
            acc.weather.extend(mo.client_weather);
        }
    }
}

async fn merge(
    state: &AppState,
    req: RawRequest,
    acc: Accumulated,
    username: Option<String>,
    trainer_level: Option<u8>,
) -> RawSummary {
    let mut summary = RawSummary {
        level: trainer_level,
        contains_gmos: acc.gmo_frames > 0,
        only_empty_gmos: acc.gmo_frames > 0 && acc.empty_gmo_frames == acc.gmo_frames,
        only_invalid_gmos: acc.gmo_frames > 0 && acc.invalid_gmo_frames == acc.gmo_frames,
        ..RawSummary::default()
    };

    // In-area check against the device's assigned target coordinate. Forts
    // and wilds are authoritative; bare cell centers only count within a
    // wider radius since a cell covers a lot of ground.
    if let (Some(lat), Some(lon)) = (req.lat_target, req.lon_target) {
        let target = Coord::new(lat, lon);
        let max_dist = req.target_max_distance.unwrap_or(state.target_max_distance);
        let near_content = acc
            .forts
            .iter()
            .map(|f| Coord::new(f.latitude, f.longitude))
            .chain(acc.wilds.iter().map(|w| Coord::new(w.latitude, w.longitude)))
            .any(|c| target.within(&c, max_dist));
        let in_area = near_content
            || acc
                .cell_centers
                .iter()
                .any(|c| target.within(c, max_dist.max(CELL_RADIUS_FLOOR_M)));
        summary.in_area = Some(in_area);
        summary.lat_target = Some(lat);
        summary.lon_target = Some(lon);
    }

    // Echo the target encounter's position so the device can walk to it.
    let mut target_coord = None;
    if let Some(target_id) = req.pokemon_encounter_id.as_deref() {
        if let Some(wild) = acc.wilds.iter().find(|w| w.encounter_id == target_id) {
            let coord = Coord::new(wild.latitude, wild.longitude);
            summary.pokemon_lat = Some(coord.lat);
            summary.pokemon_lon = Some(coord.lon);
            summary.pokemon_encounter_id = Some(target_id.to_string());
            target_coord = Some(coord);
        }
    }

    state.world.consume_cells(&acc.cells).await;
    state.world.consume_weather(&acc.weather).await;
    summary.nearby = state.world.consume_nearby(&acc.nearby).await;
    let sightings = state.world.consume_wild(&acc.wilds).await;
    summary.wild = sightings.len();
    for sighting in &sightings {
        state.coordinator.offer_sighting(sighting).await;
    }
    summary.forts = acc.forts.len();
    state.world.consume_forts(&acc.forts).await;
    state.world.consume_fort_details(&acc.fort_details).await;
    state.world.consume_gym_infos(&acc.gym_infos).await;

    let quest_coords = state.world.consume_quests(&acc.quests).await;
    summary.quests = quest_coords.len();
    if let Some(uuid) = req.uuid.as_deref() {
        if let Some(controller) = state.coordinator.controller_for_device(uuid).await {
            for coord in &quest_coords {
                controller.mark_stop_done(coord);
            }
        }
    }

    // Scatter candidates: other wilds close to the target encounter that the
    // device could also tap, when they carry no stored IVs yet and are on
    // the controller's scatter allow-list.
    if req.list_scatter_pokemon {
        if let (Some(target_id), Some(target)) =
            (req.pokemon_encounter_id.as_deref(), target_coord)
        {
            let allow = match req.uuid.as_deref() {
                Some(uuid) => state
                    .coordinator
                    .controller_for_device(uuid)
                    .await
                    .map(|c| c.scatter_allow_list())
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            let mut scatter = Vec::new();
            for wild in &acc.wilds {
                if wild.encounter_id == target_id {
                    continue;
                }
                if !allow.contains(&wild.pokemon_data.pokemon_id) {
                    continue;
                }
                let coord = Coord::new(wild.latitude, wild.longitude);
                if !target.within(&coord, SCATTER_RADIUS_M) {
                    continue;
                }
                if state.world.has_iv(&wild.encounter_id).await {
                    continue;
                }
                scatter.push(ScatterPokemon {
                    lat: coord.lat,
                    lon: coord.lon,
                    id: wild.pokemon_data.pokemon_id,
                });
            }
            summary.scatter_pokemon = Some(scatter);
        }
    }

    let stored_encounters = state.world.consume_encounters(&acc.encounters).await;
    // A guaranteed-scan poll only cares whether its one target was actually
    // encountered, not how many encounters rode along.
    summary.encounters = match req.pokemon_encounter_id_for_encounter.as_deref() {
        Some(target_id) => acc
            .encounters
            .iter()
            .filter_map(|e| e.wild_pokemon.as_ref())
            .any(|wp| wp.encounter_id == target_id) as usize,
        None => stored_encounters,
    };

    info!(
        uuid = req.uuid.as_deref().unwrap_or("unknown"),
        username = username.as_deref().unwrap_or("unknown"),
        wild = summary.wild,
        nearby = summary.nearby,
        forts = summary.forts,
        quests = summary.quests,
        encounters = summary.encounters,
        "raw upload processed"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use crate::account::{Account, AccountPool};
    use crate::coordinator::Coordinator;
    use crate::device::DeviceRegistry;
    use crate::geo::Coord;
    use crate::instance::{Area, Instance, InstanceData, InstanceType};
    use crate::scheduler::AssignmentScheduler;
    use crate::storage::SnapshotStore;
    use crate::world::WorldStore;

    async fn app_state() -> AppState {
        let store = Arc::new(SnapshotStore::new(
            std::env::temp_dir().join(format!("scanmap-{}", Uuid::new_v4())),
        ));
        let devices = Arc::new(DeviceRegistry::new(Vec::new(), Arc::clone(&store)));
        let accounts = Arc::new(AccountPool::new(Vec::new(), Arc::clone(&store)));
        let (tx, _rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(Coordinator::new(tx));
        let scheduler = Arc::new(AssignmentScheduler::new(
            Vec::new(),
            Arc::clone(&devices),
            Arc::clone(&coordinator),
            Arc::clone(&store),
            0,
        ));
        AppState {
            coordinator,
            devices,
            accounts,
            world: Arc::new(WorldStore::new()),
            scheduler,
            store,
            target_max_distance: 250.0,
        }
    }

    fn gmo_frame(json: &str) -> RawFrame {
        RawFrame {
            method: Some(decoder::METHOD_MAP_OBJECTS),
            data: Some(STANDARD.encode(json)),
            type_id: None,
            payload: None,
        }
    }

    fn request(frames: Vec<RawFrame>) -> RawRequest {
        RawRequest {
            uuid: Some("dev1".to_string()),
            username: Some("trainer".to_string()),
            trainer_level: None,
            lat_target: None,
            lon_target: None,
            target_max_distance: None,
            pokemon_encounter_id: None,
            pokemon_encounter_id_for_encounter: None,
            list_scatter_pokemon: false,
            contents: Some(frames),
            protos: None,
            gmo: None,
            type_id: None,
            payload: None,
        }
    }

    const ONE_WILD: &str = r#"{"map_cells":[{"s2_cell_id":7,"center_lat":1.0,"center_lon":2.0,
        "wild_pokemons":[{"encounter_id":"e1","latitude":1.0,"longitude":2.0,
            "pokemon_data":{"pokemon_id":25}}]}]}"#;

    #[tokio::test]
    async fn rejects_upload_without_content() {
        let state = app_state().await;
        let mut req = request(Vec::new());
        req.contents = None;
        let err = handle_raw(&state, req).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wild_sightings_reach_world_and_controllers() {
        let state = app_state().await;
        state
            .coordinator
            .add_instance(Instance {
                name: "iv".to_string(),
                kind: InstanceType::PokemonIv,
                data: InstanceData {
                    area: Some(Area::Multi(vec![vec![
                        Coord::new(0.0, 0.0),
                        Coord::new(0.0, 3.0),
                        Coord::new(3.0, 3.0),
                        Coord::new(3.0, 0.0),
                    ]])),
                    pokemon_ids: vec![25],
                    ..InstanceData::default()
                },
            })
            .await
            .unwrap();

        let summary = handle_raw(&state, request(vec![gmo_frame(ONE_WILD)]))
            .await
            .unwrap();
        assert_eq!(summary.wild, 1);
        assert!(summary.contains_gmos);
        assert!(!summary.only_empty_gmos);
        assert!(state.world.pokemon("e1").await.is_some());
        let controller = state.coordinator.controller_for_instance("iv").await.unwrap();
        assert_eq!(controller.pending(), 1);
    }

    #[tokio::test]
    async fn mad_payload_reports_as_pogodroid() {
        let state = app_state().await;
        state
            .accounts
            .add_many(vec![Account::new(
                "PogoDroid".to_string(),
                "pw".to_string(),
                1,
            )])
            .await;

        let mut req = request(Vec::new());
        req.contents = None;
        req.username = Some("ignored".to_string());
        req.trainer_level = Some(serde_json::json!(33));
        req.type_id = Some(decoder::METHOD_MAP_OBJECTS);
        req.payload = Some(STANDARD.encode(ONE_WILD));

        let summary = handle_raw(&state, req).await.unwrap();
        assert_eq!(summary.wild, 1);
        assert_eq!(state.accounts.get("PogoDroid").await.unwrap().level, 33);
    }

    #[tokio::test]
    async fn optional_wrapper_is_stripped_from_username() {
        let state = app_state().await;
        state
            .accounts
            .add_many(vec![Account::new("ash".to_string(), "pw".to_string(), 1)])
            .await;
        let mut req = request(vec![gmo_frame(ONE_WILD)]);
        req.username = Some(r#"Optional("ash")"#.to_string());
        req.trainer_level = Some(serde_json::json!(12));
        handle_raw(&state, req).await.unwrap();
        assert_eq!(state.accounts.get("ash").await.unwrap().level, 12);
    }

    #[tokio::test]
    async fn in_area_uses_forts_then_cell_centers() {
        let state = app_state().await;
        let fort_gmo = r#"{"map_cells":[{"s2_cell_id":7,"center_lat":1.0,"center_lon":2.0,
            "forts":[{"id":"f1","latitude":1.0,"longitude":2.0,"type":1,"enabled":true}]}]}"#;
        let mut req = request(vec![gmo_frame(fort_gmo)]);
        req.lat_target = Some(1.0);
        req.lon_target = Some(2.0);
        let summary = handle_raw(&state, req).await.unwrap();
        assert_eq!(summary.in_area, Some(true));

        // A degree of latitude is ~111km; nothing near this target.
        let mut far = request(vec![gmo_frame(fort_gmo)]);
        far.lat_target = Some(50.0);
        far.lon_target = Some(50.0);
        let summary = handle_raw(&state, far).await.unwrap();
        assert_eq!(summary.in_area, Some(false));
    }

    #[tokio::test]
    async fn empty_gmo_cell_center_still_counts_for_in_area() {
        let state = app_state().await;
        let empty = r#"{"map_cells":[{"s2_cell_id":7,"center_lat":1.0,"center_lon":2.0}]}"#;
        let mut req = request(vec![gmo_frame(empty)]);
        req.lat_target = Some(1.0);
        req.lon_target = Some(2.0);
        let summary = handle_raw(&state, req).await.unwrap();
        assert!(summary.only_empty_gmos);
        assert_eq!(summary.in_area, Some(true));
    }

    #[tokio::test]
    async fn frame_without_method_defaults_to_map_objects() {
        let state = app_state().await;
        let frame = RawFrame {
            method: None,
            data: Some(STANDARD.encode(ONE_WILD)),
            type_id: None,
            payload: None,
        };
        let summary = handle_raw(&state, request(vec![frame])).await.unwrap();
        assert_eq!(summary.wild, 1);
        assert!(summary.contains_gmos);
    }

    #[tokio::test]
    async fn wild_at_target_coord_is_in_area() {
        let state = app_state().await;
        let mut req = request(vec![gmo_frame(ONE_WILD)]);
        req.lat_target = Some(1.0);
        req.lon_target = Some(2.0);
        let summary = handle_raw(&state, req).await.unwrap();
        assert_eq!(summary.in_area, Some(true));
        assert_eq!(summary.lat_target, Some(1.0));
    }

    #[tokio::test]
    async fn empty_gmos_flagged_and_confirmed_on_third() {
        let state = app_state().await;
        let empty = r#"{"map_cells":[{"s2_cell_id":7,"center_lat":1.0,"center_lon":2.0}]}"#;
        for _ in 0..2 {
            let summary = handle_raw(&state, request(vec![gmo_frame(empty)]))
                .await
                .unwrap();
            assert!(summary.only_empty_gmos);
        }
        // Third empty upload trips the confirmation threshold.
        assert_eq!(state.world.note_empty(&[7]).await, vec![7]);
    }

    #[tokio::test]
    async fn invalid_gmo_is_not_empty() {
        let state = app_state().await;
        let invalid = r#"{"map_cells":[]}"#;
        let summary = handle_raw(&state, request(vec![gmo_frame(invalid)]))
            .await
            .unwrap();
        assert!(summary.only_invalid_gmos);
        assert!(!summary.only_empty_gmos);
    }

    #[tokio::test]
    async fn target_encounter_coords_are_echoed() {
        let state = app_state().await;
        let mut req = request(vec![gmo_frame(ONE_WILD)]);
        req.pokemon_encounter_id = Some("e1".to_string());
        let summary = handle_raw(&state, req).await.unwrap();
        assert_eq!(summary.pokemon_lat, Some(1.0));
        assert_eq!(summary.pokemon_lon, Some(2.0));
        assert_eq!(summary.pokemon_encounter_id.as_deref(), Some("e1"));
    }

    #[tokio::test]
    async fn scatter_lists_nearby_allowed_wilds_only() {
        let state = app_state().await;
        state
            .coordinator
            .add_instance(Instance {
                name: "iv".to_string(),
                kind: InstanceType::PokemonIv,
                data: InstanceData {
                    area: Some(Area::Multi(vec![vec![
                        Coord::new(0.0, 0.0),
                        Coord::new(0.0, 3.0),
                        Coord::new(3.0, 3.0),
                        Coord::new(3.0, 0.0),
                    ]])),
                    pokemon_ids: vec![25, 16],
                    scatter_pokemon_ids: vec![16],
                    ..InstanceData::default()
                },
            })
            .await
            .unwrap();
        state.devices.register("dev1").await;
        state.coordinator.reload_device("dev1", Some("iv")).await;

        // Target at (1.0, 2.0); one allowed wild ~20m away, one allowed wild
        // far away, one disallowed wild right next to the target.
        let gmo = r#"{"map_cells":[{"s2_cell_id":7,"center_lat":1.0,"center_lon":2.0,
            "wild_pokemons":[
                {"encounter_id":"e1","latitude":1.0,"longitude":2.0,"pokemon_data":{"pokemon_id":25}},
                {"encounter_id":"e2","latitude":1.00018,"longitude":2.0,"pokemon_data":{"pokemon_id":16}},
                {"encounter_id":"e3","latitude":2.0,"longitude":2.0,"pokemon_data":{"pokemon_id":16}},
                {"encounter_id":"e4","latitude":1.0,"longitude":2.00001,"pokemon_data":{"pokemon_id":25}}
            ]}]}"#;
        let mut req = request(vec![gmo_frame(gmo)]);
        req.pokemon_encounter_id = Some("e1".to_string());
        req.list_scatter_pokemon = true;
        let summary = handle_raw(&state, req).await.unwrap();
        let scatter = summary.scatter_pokemon.unwrap();
        assert_eq!(scatter.len(), 1);
        assert_eq!(scatter[0].id, 16);
    }

    #[tokio::test]
    async fn guaranteed_scan_reports_only_the_target() {
        let state = app_state().await;
        let encounter = RawFrame {
            method: Some(decoder::METHOD_ENCOUNTER),
            data: Some(STANDARD.encode(
                r#"{"wild_pokemon":{"encounter_id":"e9","latitude":1.0,"longitude":2.0,
                    "pokemon_data":{"pokemon_id":25,"individual_attack":15,
                        "individual_defense":15,"individual_stamina":15}}}"#,
            )),
            type_id: None,
            payload: None,
        };

        let mut hit = request(vec![encounter.clone()]);
        hit.trainer_level = Some(serde_json::json!(31));
        hit.pokemon_encounter_id_for_encounter = Some("e9".to_string());
        assert_eq!(handle_raw(&state, hit).await.unwrap().encounters, 1);

        let mut miss = request(vec![encounter]);
        miss.trainer_level = Some(serde_json::json!(31));
        miss.pokemon_encounter_id_for_encounter = Some("other".to_string());
        assert_eq!(handle_raw(&state, miss).await.unwrap().encounters, 0);
    }

    #[tokio::test]
    async fn low_level_encounters_are_dropped() {
        let state = app_state().await;
        let encounter = RawFrame {
            method: Some(decoder::METHOD_ENCOUNTER),
            data: Some(STANDARD.encode(
                r#"{"wild_pokemon":{"encounter_id":"e9","latitude":1.0,"longitude":2.0,
                    "pokemon_data":{"pokemon_id":25,"individual_attack":15,
                        "individual_defense":15,"individual_stamina":15}}}"#,
            )),
            type_id: None,
            payload: None,
        };
        let mut req = request(vec![encounter]);
        req.trainer_level = Some(serde_json::json!(10));
        assert_eq!(handle_raw(&state, req).await.unwrap().encounters, 0);
        assert!(!state.world.has_iv("e9").await);
    }

    #[tokio::test]
    async fn quests_confirm_stops_on_the_device_controller() {
        let state = app_state().await;
        state
            .coordinator
            .add_instance(Instance {
                name: "quest".to_string(),
                kind: InstanceType::AutoQuest,
                data: InstanceData {
                    // First route stop sits on the fort below.
                    area: Some(Area::Multi(vec![vec![
                        Coord::new(1.0, 2.0),
                        Coord::new(1.0, 2.0005),
                        Coord::new(1.0005, 2.0005),
                        Coord::new(1.0005, 2.0),
                    ]])),
                    ..InstanceData::default()
                },
            })
            .await
            .unwrap();
        state.devices.register("dev1").await;
        state.coordinator.reload_device("dev1", Some("quest")).await;

        // Seed the fort, dispatch the stop, then report its quest.
        let fort_gmo = r#"{"map_cells":[{"s2_cell_id":7,"center_lat":1.0,"center_lon":2.0,
            "forts":[{"id":"f1","latitude":1.0,"longitude":2.0,"type":1,"enabled":true}]}]}"#;
        handle_raw(&state, request(vec![gmo_frame(fort_gmo)]))
            .await
            .unwrap();
        let controller = state
            .coordinator
            .controller_for_device("dev1")
            .await
            .unwrap();
        controller.get_task("dev1", None, false).unwrap();

        let quest = RawFrame {
            method: Some(decoder::METHOD_FORT_SEARCH),
            data: Some(STANDARD.encode(
                r#"{"challenge_quest":{"quest":{"fort_id":"f1","latitude":1.0,
                    "longitude":2.0,"quest_type":7}}}"#,
            )),
            type_id: None,
            payload: None,
        };
        let summary = handle_raw(&state, request(vec![quest])).await.unwrap();
        assert_eq!(summary.quests, 1);
        assert!(controller.status().starts_with("Stops 1/"));
    }
}
