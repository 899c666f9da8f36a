use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{EngineError, EngineResult};

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct Coordinate {
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be within [-90, 90]"))]
    pub lat: f64,
    #[validate(range(
        min = -180.0,
        max = 180.0,
        message = "Longitude must be within [-180, 180]"
    ))]
    pub lon: f64,
}

impl Coordinate {
    /// Builds a coordinate, rejecting out-of-range or non-finite values.
    pub fn new(lat: f64, lon: f64) -> EngineResult<Self> {
        let coordinate = Coordinate { lat, lon };
        coordinate.ensure_valid()?;
        Ok(coordinate)
    }

    pub fn ensure_valid(&self) -> EngineResult<()> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(EngineError::validation("Coordinate must be finite"));
        }
        self.validate()
            .map_err(|e| EngineError::validation(e.to_string()))
    }

    /// Haversine great-circle distance in meters.
    pub fn distance_meters(&self, other: &Coordinate) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_METERS * c
    }
}

/// Region a player must stand in to interact with a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Circle {
        center: Coordinate,
        radius_meters: f64,
    },
    Polygon {
        vertices: Vec<Coordinate>,
    },
}

impl Geometry {
    pub fn circle(center: Coordinate, radius_meters: f64) -> EngineResult<Self> {
        let geometry = Geometry::Circle {
            center,
            radius_meters,
        };
        geometry.ensure_valid()?;
        Ok(geometry)
    }

    pub fn polygon(vertices: Vec<Coordinate>) -> EngineResult<Self> {
        let geometry = Geometry::Polygon { vertices };
        geometry.ensure_valid()?;
        Ok(geometry)
    }

    pub fn ensure_valid(&self) -> EngineResult<()> {
        match self {
            Geometry::Circle {
                center,
                radius_meters,
            } => {
                center.ensure_valid()?;
                if !radius_meters.is_finite() || *radius_meters <= 0.0 {
                    return Err(EngineError::validation(
                        "Geofence radius must be a positive number",
                    ));
                }
            }
            Geometry::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(EngineError::validation(
                        "Geofence polygon needs at least 3 vertices",
                    ));
                }
                for vertex in vertices {
                    vertex.ensure_valid()?;
                }
            }
        }
        Ok(())
    }

    pub fn contains(&self, point: &Coordinate) -> bool {
        match self {
            Geometry::Circle {
                center,
                radius_meters,
            } => center.distance_meters(point) <= *radius_meters,
            Geometry::Polygon { vertices } => polygon_contains(vertices, point),
        }
    }
}

/// Even-odd ray casting on the lat/lon plane. Geofences are small enough that
/// the planar approximation holds; polygons crossing the antimeridian are not
/// supported.
fn polygon_contains(vertices: &[Coordinate], point: &Coordinate) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (vi, vj) = (&vertices[i], &vertices[j]);
        let crosses = (vi.lat > point.lat) != (vj.lat > point.lat);
        if crosses {
            let lon_at_lat =
                (vj.lon - vi.lon) * (point.lat - vi.lat) / (vj.lat - vi.lat) + vi.lon;
            if point.lon < lon_at_lat {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}
