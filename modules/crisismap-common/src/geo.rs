use serde::{Deserialize, Serialize};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Stored in place of an absent location so that "has no location" stays
/// queryable as an ordinary equality filter.
pub const NOWHERE: GeoPoint = GeoPoint {
    lat: 90.0,
    lon: 90.0,
};

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_nowhere(&self) -> bool {
        *self == NOWHERE
    }

    /// Maps an optional location onto the stored representation.
    pub fn or_nowhere(point: Option<GeoPoint>) -> GeoPoint {
        point.unwrap_or(NOWHERE)
    }

    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        haversine_meters(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Haversine great-circle distance between two lat/lon points in meters.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_METERS * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_to_self() {
        let p = GeoPoint::new(44.97, -93.26);
        assert!(p.distance_meters(&p) < 1e-6);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine_meters(10.0, 20.0, 11.0, 20.0);
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn nowhere_round_trips_through_option() {
        assert!(GeoPoint::or_nowhere(None).is_nowhere());
        assert!(!GeoPoint::or_nowhere(Some(GeoPoint::new(1.0, 2.0))).is_nowhere());
    }
}
