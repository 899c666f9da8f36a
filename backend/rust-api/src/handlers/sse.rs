use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;

use super::ApiError;
use crate::models::location::LocationQuery;
use crate::services::location_registry::LocationSubscription;
use crate::services::AppState;

/// Live location feed for one city.
/// GET /api/v1/cities/{city_id}/locations/stream
///
/// Emits the current locations as `location-added`, then one
/// `location-added` / `location-modified` / `location-removed` event per
/// committed change. The subscription is released when the client goes away.
pub async fn location_stream(
    State(state): State<Arc<AppState>>,
    Path(city_id): Path<String>,
    Query(query): Query<LocationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state.registry.subscribe(&city_id, query.kind).await?;
    tracing::info!(city_id = %city_id, "Client connected to location stream");

    Ok(Sse::new(change_stream(subscription)).keep_alive(KeepAlive::default()))
}

fn change_stream(
    subscription: LocationSubscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, |mut subscription| async move {
        let change = subscription.next().await?;
        let event = Event::default()
            .event(change.event_name())
            .id(change.location.id.clone())
            .data(change.to_sse_data());
        Some((Ok(event), subscription))
    })
}
