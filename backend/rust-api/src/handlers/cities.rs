use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::models::location::{CoordinateQuery, LocationQuery, NearestCityResponse};
use crate::models::Coordinate;
use crate::services::AppState;

/// GET /api/v1/cities
pub async fn list_cities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.geo.cities().to_vec())
}

/// GET /api/v1/cities/nearest?lat=..&lon=..
pub async fn nearest_city(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CoordinateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let point = Coordinate::new(query.lat, query.lon)?;
    let (city, distance_meters) = state.geo.nearest_city(&point)?;

    tracing::debug!(city_id = %city.id, distance_meters, "Resolved nearest city");

    Ok(Json(NearestCityResponse {
        city: city.clone(),
        distance_meters,
    }))
}

/// GET /api/v1/cities/{city_id}/locations?kind=building|area
pub async fn list_city_locations(
    State(state): State<Arc<AppState>>,
    Path(city_id): Path<String>,
    Query(query): Query<LocationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let locations = state.registry.list_locations(&city_id, query.kind).await?;
    Ok(Json(locations))
}
