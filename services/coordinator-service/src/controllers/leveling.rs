use crate::geo::Coord;

use super::{Task, TaskController};

/// Single-coordinate loop used by the leveling and token-gather instance
/// types: the device walks around the start point on its own and only needs
/// to be parked there.
pub struct LevelingController {
    name: String,
    action: &'static str,
    start: Coord,
    min_level: u8,
    max_level: u8,
}

impl LevelingController {
    pub fn new(
        name: String,
        action: &'static str,
        start: Coord,
        min_level: u8,
        max_level: u8,
    ) -> Self {
        Self {
            name,
            action,
            start,
            min_level,
            max_level,
        }
    }
}

impl TaskController for LevelingController {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_task(&self, _uuid: &str, _username: Option<&str>, _startup: bool) -> Option<Task> {
        Some(Task {
            action: self.action,
            lat: self.start.lat,
            lon: self.start.lon,
            min_level: self.min_level,
            max_level: self.max_level,
        })
    }

    fn status(&self) -> String {
        self.action.replace('_', " ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_returns_the_start_coordinate() {
        let c = LevelingController::new(
            "lvl".to_string(),
            "leveling",
            Coord::new(9.0, 9.0),
            1,
            20,
        );
        for _ in 0..3 {
            let task = c.get_task("dev", None, false).unwrap();
            assert_eq!((task.lat, task.lon), (9.0, 9.0));
            assert_eq!(task.action, "leveling");
        }
    }
}
