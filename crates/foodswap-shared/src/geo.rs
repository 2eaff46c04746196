//! Great-circle geometry on a spherical Earth.

use serde::{Deserialize, Serialize};

use crate::constants::EARTH_RADIUS_KM;

/// A WGS-84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Latitude within `[-90, 90]`, longitude within `[-180, 180]`, both finite.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Haversine distance to `other`, in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lng = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        // Clamp guards against a > 1 from rounding on antipodal points.
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_KM * c
    }
}

/// Axis-aligned lat/lng box enclosing a circle; used as a coarse SQL pre-filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    /// Smallest box that contains every point within `radius_km` of `center`.
    ///
    /// Near the poles, or when the circle crosses the antimeridian, the
    /// longitude range widens to the full `[-180, 180]`.
    pub fn around(center: &GeoPoint, radius_km: f64) -> Self {
        let angular = radius_km / EARTH_RADIUS_KM;
        let d_lat = angular.to_degrees();

        let min_latitude = (center.latitude - d_lat).max(-90.0);
        let max_latitude = (center.latitude + d_lat).min(90.0);

        let full = Self {
            min_latitude,
            max_latitude,
            min_longitude: -180.0,
            max_longitude: 180.0,
        };

        if min_latitude <= -90.0 || max_latitude >= 90.0 {
            return full;
        }

        let lat_rad = center.latitude.to_radians();
        let ratio = angular.sin() / lat_rad.cos();
        if ratio >= 1.0 {
            return full;
        }
        let d_lng = ratio.asin().to_degrees();

        let min_longitude = center.longitude - d_lng;
        let max_longitude = center.longitude + d_lng;
        if min_longitude < -180.0 || max_longitude > 180.0 {
            return full;
        }

        Self {
            min_latitude,
            max_latitude,
            min_longitude,
            max_longitude,
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&point.latitude)
            && (self.min_longitude..=self.max_longitude).contains(&point.longitude)
    }
}
