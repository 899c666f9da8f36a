use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest(
            "/api/v1",
            api_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Map
        .route("/cities", get(handlers::cities::list_cities))
        .route("/cities/nearest", get(handlers::cities::nearest_city))
        .route(
            "/cities/{city_id}/locations",
            get(handlers::cities::list_city_locations),
        )
        .route(
            "/cities/{city_id}/locations/stream",
            get(handlers::sse::location_stream),
        )
        .route("/locations/{id}", get(handlers::locations::get_location))
        .route(
            "/locations/{id}/contest",
            get(handlers::locations::contest_status),
        )
        // Capture flow
        .route("/quiz-sessions", post(handlers::quiz::start_quiz))
        .route("/quiz-sessions/{id}", get(handlers::quiz::get_quiz))
        .route(
            "/quiz-sessions/{id}/answers",
            post(handlers::quiz::submit_answer),
        )
        .route(
            "/quiz-sessions/{id}/abandon",
            post(handlers::quiz::abandon_quiz),
        )
        .route("/captures", post(handlers::captures::attempt_capture))
        // Players
        .route("/leaderboard", get(handlers::leaderboard::get_leaderboard))
        .route("/users", post(handlers::users::sign_in))
        .route("/users/name-available", get(handlers::users::name_available))
        .route(
            "/users/me",
            get(handlers::users::me).delete(handlers::users::delete_account),
        )
        .route(
            "/users/me/username",
            put(handlers::users::change_username),
        )
        .route(
            "/users/{id}/captures",
            get(handlers::leaderboard::user_captures),
        )
}
