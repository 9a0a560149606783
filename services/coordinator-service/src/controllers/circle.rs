use std::sync::Mutex;

use crate::geo::Coord;

use super::{Task, TaskController};

/// Round-robin over a fixed list of circle centres. Used for both the
/// pokemon and raid circle instance types; only the task action differs.
pub struct CircleController {
    name: String,
    action: &'static str,
    coords: Vec<Coord>,
    min_level: u8,
    max_level: u8,
    cursor: Mutex<usize>,
}

impl CircleController {
    pub fn new(
        name: String,
        action: &'static str,
        coords: Vec<Coord>,
        min_level: u8,
        max_level: u8,
    ) -> Self {
        Self {
            name,
            action,
            coords,
            min_level,
            max_level,
            cursor: Mutex::new(0),
        }
    }
}

impl TaskController for CircleController {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_task(&self, _uuid: &str, _username: Option<&str>, _startup: bool) -> Option<Task> {
        if self.coords.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock().expect("circle cursor");
        let coord = self.coords[*cursor];
        *cursor = (*cursor + 1) % self.coords.len();
        Some(Task {
            action: self.action,
            lat: coord.lat,
            lon: coord.lon,
            min_level: self.min_level,
            max_level: self.max_level,
        })
    }

    fn status(&self) -> String {
        let cursor = self.cursor.lock().expect("circle cursor");
        format!("Round robin {}/{}", *cursor, self.coords.len())
    }
}
