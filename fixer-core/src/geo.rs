//! Coordinates, the service region, and great-circle distance.
//!
//! All distances in this crate are meters, computed by [`haversine_meters`].

use serde::{Deserialize, Serialize};

/// Mean Earth radius used for haversine distances, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// Great-circle distance between two points, in meters.
pub fn haversine_meters(a: LatLng, b: LatLng) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Bounding box that submissions must fall inside. Edges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegion {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Default for ServiceRegion {
    fn default() -> Self {
        Self {
            north: 52.4,
            south: 44.2,
            east: 40.2,
            west: 22.1,
        }
    }
}

impl ServiceRegion {
    pub fn contains(&self, point: LatLng) -> bool {
        point.is_finite()
            && point.lat >= self.south
            && point.lat <= self.north
            && point.lng >= self.west
            && point.lng <= self.east
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KYIV: LatLng = LatLng {
        lat: 50.4501,
        lng: 30.5234,
    };
    const LVIV: LatLng = LatLng {
        lat: 49.8397,
        lng: 24.0297,
    };

    #[test]
    fn zero_distance_to_self() {
        assert_eq!(haversine_meters(KYIV, KYIV), 0.0);
    }

    #[test]
    fn kyiv_to_lviv_is_about_470km() {
        let d = haversine_meters(KYIV, LVIV);
        assert!((465_000.0..475_000.0).contains(&d), "got {}", d);
    }

    #[test]
    fn distance_is_symmetric() {
        let ab = haversine_meters(KYIV, LVIV);
        let ba = haversine_meters(LVIV, KYIV);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = haversine_meters(LatLng::new(0.0, 0.0), LatLng::new(1.0, 0.0));
        assert!((d - 111_194.9).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn region_membership() {
        let region = ServiceRegion::default();
        assert!(region.contains(KYIV));
        assert!(region.contains(LVIV));
        // Warsaw
        assert!(!region.contains(LatLng::new(52.2297, 21.0122)));
        // Edges are inclusive
        assert!(region.contains(LatLng::new(52.4, 40.2)));
        assert!(!region.contains(LatLng::new(f64::NAN, 30.0)));
    }
}
