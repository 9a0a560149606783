use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::geo::Coord;

use super::{Task, TaskController};

/// Raid circles take ~10 minutes to change state, so revisiting a centre
/// sooner than that wastes a scan.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(600);

struct SmartState {
    cursor: usize,
    last_visit: Vec<Option<Instant>>,
}

/// Round-robin over circle centres that skips centres visited within the
/// raid-timer cooldown window. When every centre is cooling down, the least
/// recently visited one is handed out anyway so devices never idle.
pub struct SmartCircleRaidController {
    name: String,
    coords: Vec<Coord>,
    min_level: u8,
    max_level: u8,
    cooldown: Duration,
    state: Mutex<SmartState>,
}

impl SmartCircleRaidController {
    pub fn new(name: String, coords: Vec<Coord>, min_level: u8, max_level: u8) -> Self {
        let len = coords.len();
        Self {
            name,
            coords,
            min_level,
            max_level,
            cooldown: DEFAULT_COOLDOWN,
            state: Mutex::new(SmartState {
                cursor: 0,
                last_visit: vec![None; len],
            }),
        }
    }

    #[cfg(test)]
    fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    fn pick(&self, now: Instant) -> Option<usize> {
        let mut state = self.state.lock().expect("smart raid state");
        let len = self.coords.len();
        if len == 0 {
            return None;
        }

        for offset in 0..len {
            let idx = (state.cursor + offset) % len;
            let ready = match state.last_visit[idx] {
                None => true,
                Some(visited) => now.duration_since(visited) >= self.cooldown,
            };
            if ready {
                state.last_visit[idx] = Some(now);
                state.cursor = (idx + 1) % len;
                return Some(idx);
            }
        }

        // Everything is cooling down: fall back to the stalest centre.
        let idx = (0..len)
            .min_by_key(|&i| state.last_visit[i])
            .unwrap_or(state.cursor);
        state.last_visit[idx] = Some(now);
        state.cursor = (idx + 1) % len;
        Some(idx)
    }
}

impl TaskController for SmartCircleRaidController {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_task(&self, _uuid: &str, _username: Option<&str>, _startup: bool) -> Option<Task> {
        let idx = self.pick(Instant::now())?;
        let coord = self.coords[idx];
        Some(Task {
            action: "scan_raid",
            lat: coord.lat,
            lon: coord.lon,
            min_level: self.min_level,
            max_level: self.max_level,
        })
    }

    fn status(&self) -> String {
        format!("Smart round robin over {} circles", self.coords.len())
    }
}
