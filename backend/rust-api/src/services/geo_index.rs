use crate::error::{EngineError, EngineResult};
use crate::models::{City, Coordinate};

/// Answers "which city is nearest this point". Cities are reference data and
/// loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct GeospatialIndex {
    cities: Vec<City>,
}

impl GeospatialIndex {
    /// Cities are kept sorted by id; ties on distance go to the lower id.
    pub fn new(mut cities: Vec<City>) -> Self {
        cities.sort_by(|a, b| a.id.cmp(&b.id));
        Self { cities }
    }

    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    /// Nearest city by great-circle distance, with that distance in meters.
    pub fn nearest_city(&self, point: &Coordinate) -> EngineResult<(&City, f64)> {
        point.ensure_valid()?;

        let mut best: Option<(&City, f64)> = None;
        for city in &self.cities {
            let distance = point.distance_meters(&city.centroid);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((city, distance)),
            }
        }

        best.ok_or(EngineError::NoCitiesConfigured)
    }
}
