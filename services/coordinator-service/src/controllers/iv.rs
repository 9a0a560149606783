use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Mutex;

use crate::geo::{Coord, Geofence};

use super::{Sighting, Task, TaskController};

#[derive(Debug, Clone)]
struct QueueEntry {
    /// Position in the configured allow-list; lower is more wanted.
    priority: usize,
    encounter_id: String,
    pokemon_id: u16,
    coord: Coord,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.encounter_id == other.encounter_id
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the lowest allow-list index
        // pops first, with the encounter id as a deterministic tie-break.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.encounter_id.cmp(&self.encounter_id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct IvState {
    heap: BinaryHeap<QueueEntry>,
    queued: HashSet<String>,
}

/// Priority queue of pending encounters, fed by the ingestion pipeline and
/// drained by polling devices. Bounded by the configured queue limit; a full
/// queue drops new sightings rather than evicting queued ones.
pub struct PokemonIvController {
    name: String,
    fences: Vec<Geofence>,
    allow: Vec<u16>,
    scatter: Vec<u16>,
    limit: usize,
    min_level: u8,
    max_level: u8,
    state: Mutex<IvState>,
}

impl PokemonIvController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        fences: Vec<Geofence>,
        allow: Vec<u16>,
        scatter: Vec<u16>,
        limit: usize,
        min_level: u8,
        max_level: u8,
    ) -> Self {
        Self {
            name,
            fences,
            allow,
            scatter,
            limit,
            min_level,
            max_level,
            state: Mutex::new(IvState {
                heap: BinaryHeap::new(),
                queued: HashSet::new(),
            }),
        }
    }

    /// Idle coordinate handed out while the queue is empty.
    fn park_coord(&self) -> Option<Coord> {
        self.fences.first().and_then(|f| f.coords.first()).copied()
    }
}

impl TaskController for PokemonIvController {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_task(&self, _uuid: &str, _username: Option<&str>, _startup: bool) -> Option<Task> {
        let mut state = self.state.lock().expect("iv state");
        if let Some(entry) = state.heap.pop() {
            state.queued.remove(&entry.encounter_id);
            return Some(Task {
                action: "scan_iv",
                lat: entry.coord.lat,
                lon: entry.coord.lon,
                min_level: self.min_level,
                max_level: self.max_level,
            });
        }
        drop(state);
        self.park_coord().map(|coord| Task {
            action: "scan_iv",
            lat: coord.lat,
            lon: coord.lon,
            min_level: self.min_level,
            max_level: self.max_level,
        })
    }

    fn scatter_allow_list(&self) -> Vec<u16> {
        self.scatter.clone()
    }

    fn offer_sighting(&self, sighting: &Sighting) {
        let Some(priority) = self.allow.iter().position(|&id| id == sighting.pokemon_id) else {
            return;
        };
        if !self.fences.iter().any(|f| f.contains(&sighting.coord)) {
            return;
        }
        let mut state = self.state.lock().expect("iv state");
        if state.queued.contains(&sighting.encounter_id) || state.heap.len() >= self.limit {
            return;
        }
        state.queued.insert(sighting.encounter_id.clone());
        state.heap.push(QueueEntry {
            priority,
            encounter_id: sighting.encounter_id.clone(),
            pokemon_id: sighting.pokemon_id,
            coord: sighting.coord,
        });
    }

    fn drain_pending(&self) -> Vec<Sighting> {
        let mut state = self.state.lock().expect("iv state");
        state.queued.clear();
        state
            .heap
            .drain()
            .map(|entry| Sighting {
                encounter_id: entry.encounter_id,
                pokemon_id: entry.pokemon_id,
                coord: entry.coord,
            })
            .collect()
    }

    fn status(&self) -> String {
        format!("Queue {}/{}", self.pending(), self.limit)
    }

    fn pending(&self) -> usize {
        self.state.lock().expect("iv state").heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence() -> Geofence {
        Geofence::new(vec![
            Coord::new(0.0, 0.0),
            Coord::new(0.0, 1.0),
            Coord::new(1.0, 1.0),
            Coord::new(1.0, 0.0),
        ])
    }

    fn controller(limit: usize) -> PokemonIvController {
        PokemonIvController::new(
            "iv".to_string(),
            vec![fence()],
            vec![201, 25, 149],
            vec![25],
            limit,
            30,
            40,
        )
    }

    fn sighting(id: &str, pokemon_id: u16, lat: f64, lon: f64) -> Sighting {
        Sighting {
            encounter_id: id.to_string(),
            pokemon_id,
            coord: Coord::new(lat, lon),
        }
    }

    #[test]
    fn pops_by_allow_list_position() {
        let c = controller(10);
        c.offer_sighting(&sighting("a", 149, 0.5, 0.5));
        c.offer_sighting(&sighting("b", 201, 0.6, 0.6));
        c.offer_sighting(&sighting("c", 25, 0.7, 0.7));
        // 201 is first in the allow-list, then 25, then 149.
        assert_eq!(c.get_task("dev", None, false).unwrap().lat, 0.6);
        assert_eq!(c.get_task("dev", None, false).unwrap().lat, 0.7);
        assert_eq!(c.get_task("dev", None, false).unwrap().lat, 0.5);
    }

    #[test]
    fn filters_by_allow_list_and_geofence() {
        let c = controller(10);
        c.offer_sighting(&sighting("a", 999, 0.5, 0.5)); // not wanted
        c.offer_sighting(&sighting("b", 25, 5.0, 5.0)); // outside fence
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn queue_is_bounded_and_deduplicated() {
        let c = controller(2);
        c.offer_sighting(&sighting("a", 25, 0.1, 0.1));
        c.offer_sighting(&sighting("a", 25, 0.1, 0.1));
        c.offer_sighting(&sighting("b", 25, 0.2, 0.2));
        c.offer_sighting(&sighting("c", 25, 0.3, 0.3));
        assert_eq!(c.pending(), 2);
    }

    #[test]
    fn empty_queue_parks_at_first_fence_vertex() {
        let c = controller(10);
        let task = c.get_task("dev", None, false).unwrap();
        assert_eq!((task.lat, task.lon), (0.0, 0.0));
    }

    #[test]
    fn drain_returns_everything_for_reload() {
        let c = controller(10);
        c.offer_sighting(&sighting("a", 25, 0.1, 0.1));
        c.offer_sighting(&sighting("b", 149, 0.2, 0.2));
        let drained = c.drain_pending();
        assert_eq!(drained.len(), 2);
        assert_eq!(c.pending(), 0);
    }
}
