use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Immutable WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in metres (haversine).
    pub fn distance_m(&self, other: &Coord) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }

    /// Inclusive distance check: a point at exactly `max_m` is within.
    pub fn within(&self, other: &Coord, max_m: f64) -> bool {
        self.distance_m(other) <= max_m
    }
}

/// Closed polygon bounding a scan area. The last vertex is implicitly
/// connected back to the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geofence {
    pub coords: Vec<Coord>,
}

impl Geofence {
    pub fn new(coords: Vec<Coord>) -> Self {
        Self { coords }
    }

    /// Ray-casting point-in-polygon test.
    pub fn contains(&self, point: &Coord) -> bool {
        let n = self.coords.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = &self.coords[i];
            let b = &self.coords[j];
            if (a.lon > point.lon) != (b.lon > point.lon) {
                let slope = (b.lat - a.lat) * (point.lon - a.lon) / (b.lon - a.lon) + a.lat;
                if point.lat < slope {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

#[cfg(test)]
mod tests {
    use super::{Coord, Geofence};

    #[test]
    fn haversine_matches_known_distance() {
        // One milli-degree of latitude at the equator is ~111.19 m.
        let a = Coord::new(0.0, 0.0);
        let b = Coord::new(0.001, 0.0);
        let d = a.distance_m(&b);
        assert!((d - 111.19).abs() < 0.5, "got {d}");
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_self() {
        let a = Coord::new(52.52, 13.405);
        let b = Coord::new(48.8566, 2.3522);
        assert!((a.distance_m(&b) - b.distance_m(&a)).abs() < 1e-6);
        assert_eq!(a.distance_m(&a), 0.0);
    }

    #[test]
    fn within_is_inclusive_at_the_boundary() {
        let a = Coord::new(10.0, 10.0);
        let b = Coord::new(10.002, 10.0);
        let exact = a.distance_m(&b);
        assert!(a.within(&b, exact));
        assert!(!a.within(&b, exact - 1.0));
    }

    #[test]
    fn geofence_contains_interior_points_only() {
        let square = Geofence::new(vec![
            Coord::new(0.0, 0.0),
            Coord::new(0.0, 1.0),
            Coord::new(1.0, 1.0),
            Coord::new(1.0, 0.0),
        ]);
        assert!(square.contains(&Coord::new(0.5, 0.5)));
        assert!(!square.contains(&Coord::new(1.5, 0.5)));
        assert!(!square.contains(&Coord::new(-0.1, 0.5)));
    }

    #[test]
    fn degenerate_geofence_contains_nothing() {
        let line = Geofence::new(vec![Coord::new(0.0, 0.0), Coord::new(1.0, 1.0)]);
        assert!(!line.contains(&Coord::new(0.5, 0.5)));
    }
}
