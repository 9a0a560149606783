use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::geo::Coord;

use super::{Task, TaskController};

/// A reported quest is matched back to the stop it was spun at if it lands
/// within this many metres.
const STOP_MATCH_RADIUS_M: f64 = 80.0;

struct FenceState {
    stops: Vec<Coord>,
    pending: VecDeque<usize>,
    dispatched: HashSet<usize>,
}

impl FenceState {
    fn new(stops: Vec<Coord>) -> Self {
        let pending = (0..stops.len()).collect();
        Self {
            stops,
            pending,
            dispatched: HashSet::new(),
        }
    }

    fn exhausted(&self) -> bool {
        self.pending.is_empty() && self.dispatched.is_empty()
    }

    fn restart(&mut self) {
        self.pending = (0..self.stops.len()).collect();
        self.dispatched.clear();
    }
}

struct QuestState {
    fences: Vec<FenceState>,
    spins: HashMap<String, u32>,
    completed: bool,
}

/// Walks every stop in every configured geofence once per cycle. Stops are
/// handed out in order and only leave the dispatched set when a completed
/// quest is reported near them; when all fences drain, the controller either
/// restarts the cycle or emits a completion event for the scheduler. Each
/// account gets at most `spin_limit` stops per cycle; a capped account is
/// answered with no task so the device rotates to a fresh one.
pub struct AutoQuestController {
    name: String,
    min_level: u8,
    max_level: u8,
    spin_limit: u32,
    restart_on_complete: bool,
    complete_tx: mpsc::UnboundedSender<String>,
    state: Mutex<QuestState>,
}

impl AutoQuestController {
    pub fn new(
        name: String,
        rings: Vec<Vec<Coord>>,
        min_level: u8,
        max_level: u8,
        spin_limit: u32,
        restart_on_complete: bool,
        complete_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        let fences = rings.into_iter().map(FenceState::new).collect();
        Self {
            name,
            min_level,
            max_level,
            spin_limit,
            restart_on_complete,
            complete_tx,
            state: Mutex::new(QuestState {
                fences,
                spins: HashMap::new(),
                completed: false,
            }),
        }
    }

    fn finish_cycle(&self, state: &mut QuestState) {
        if self.restart_on_complete {
            info!(instance = self.name.as_str(), "quest cycle complete, restarting");
            for fence in &mut state.fences {
                fence.restart();
            }
            state.spins.clear();
        } else if !state.completed {
            state.completed = true;
            info!(instance = self.name.as_str(), "quest instance complete");
            let _ = self.complete_tx.send(self.name.clone());
        }
    }
}

impl TaskController for AutoQuestController {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_task(&self, _uuid: &str, username: Option<&str>, _startup: bool) -> Option<Task> {
        let mut state = self.state.lock().expect("quest state");
        if let Some(user) = username {
            if state.spins.get(user).copied().unwrap_or(0) >= self.spin_limit {
                debug!(
                    instance = self.name.as_str(),
                    username = user,
                    "account hit its spin limit"
                );
                return None;
            }
        }
        let mut picked = None;
        for fence in &mut state.fences {
            if let Some(idx) = fence.pending.pop_front() {
                fence.dispatched.insert(idx);
                picked = Some(fence.stops[idx]);
                break;
            }
        }
        let stop = picked?;
        if let Some(user) = username {
            *state.spins.entry(user.to_string()).or_insert(0) += 1;
        }
        Some(Task {
            action: "scan_quest",
            lat: stop.lat,
            lon: stop.lon,
            min_level: self.min_level,
            max_level: self.max_level,
        })
    }

    fn mark_stop_done(&self, coord: &Coord) {
        let mut state = self.state.lock().expect("quest state");
        let mut matched = false;
        for fence in &mut state.fences {
            let hit = fence
                .dispatched
                .iter()
                .copied()
                .find(|&idx| fence.stops[idx].within(coord, STOP_MATCH_RADIUS_M));
            if let Some(idx) = hit {
                fence.dispatched.remove(&idx);
                matched = true;
                break;
            }
        }
        if !matched {
            debug!(
                instance = self.name.as_str(),
                lat = coord.lat,
                lon = coord.lon,
                "quest reported outside any dispatched stop"
            );
            return;
        }
        if state.fences.iter().all(FenceState::exhausted) {
            self.finish_cycle(&mut state);
        }
    }

    fn status(&self) -> String {
        let state = self.state.lock().expect("quest state");
        let total: usize = state.fences.iter().map(|f| f.stops.len()).sum();
        let remaining: usize = state
            .fences
            .iter()
            .map(|f| f.pending.len() + f.dispatched.len())
            .sum();
        format!("Stops {}/{}", total - remaining, total)
    }

    fn pending(&self) -> usize {
        let state = self.state.lock().expect("quest state");
        state.fences.iter().map(|f| f.pending.len()).sum()
    }
}
