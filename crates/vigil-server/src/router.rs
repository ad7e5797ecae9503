//! Vigil Router
//!
//! HTTP router configuration with middleware stack. SensorThings-style
//! entity sets live under `/v1.0`; health sits at the root.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::handlers;
use crate::middleware;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

// =============================================================================
// Router
// =============================================================================

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let things = Router::new()
        .route("/", get(handlers::list_things).post(handlers::create_thing))
        .route(
            "/:id",
            get(handlers::get_thing)
                .patch(handlers::update_thing)
                .delete(handlers::delete_thing),
        )
        .route("/:id/Datastreams", get(handlers::thing_datastreams))
        .route("/:id/Locations", get(handlers::thing_locations));

    let locations = Router::new()
        .route("/", get(handlers::list_locations).post(handlers::create_location))
        .route(
            "/:id",
            get(handlers::get_location)
                .patch(handlers::update_location)
                .delete(handlers::delete_location),
        )
        .route("/:id/Things", get(handlers::location_things));

    let sensors = Router::new()
        .route("/", get(handlers::list_sensors).post(handlers::create_sensor))
        .route(
            "/:id",
            get(handlers::get_sensor)
                .patch(handlers::update_sensor)
                .delete(handlers::delete_sensor),
        )
        .route("/:id/Datastreams", get(handlers::sensor_datastreams));

    let observed_properties = Router::new()
        .route(
            "/",
            get(handlers::list_observed_properties).post(handlers::create_observed_property),
        )
        .route(
            "/:id",
            get(handlers::get_observed_property)
                .patch(handlers::update_observed_property)
                .delete(handlers::delete_observed_property),
        )
        .route("/:id/Datastreams", get(handlers::observed_property_datastreams));

    let features = Router::new()
        .route("/", get(handlers::list_features).post(handlers::create_feature))
        .route(
            "/:id",
            get(handlers::get_feature)
                .patch(handlers::update_feature)
                .delete(handlers::delete_feature),
        )
        .route("/:id/Observations", get(handlers::feature_observations));

    let datastreams = Router::new()
        .route("/", get(handlers::list_datastreams).post(handlers::create_datastream))
        .route(
            "/:id",
            get(handlers::get_datastream)
                .patch(handlers::update_datastream)
                .delete(handlers::delete_datastream),
        )
        .route("/:id/Observations", get(handlers::datastream_observations));

    // Append-only: no DELETE route
    let observations = Router::new()
        .route("/", get(handlers::list_observations).post(handlers::create_observation))
        .route("/batch", post(handlers::create_observation_batch))
        .route(
            "/:id",
            get(handlers::get_observation).patch(handlers::update_observation),
        );

    let admin = Router::new()
        .route("/store", get(handlers::get_store_stats))
        .route("/compress", post(handlers::run_compression));

    let api = Router::new()
        .nest("/Things", things)
        .nest("/Locations", locations)
        .nest("/Sensors", sensors)
        .nest("/ObservedProperties", observed_properties)
        .nest("/FeaturesOfInterest", features)
        .nest("/Datastreams", datastreams)
        .nest("/Observations", observations)
        .route("/ingest/publish", post(handlers::publish_reading))
        .nest("/admin", admin);

    let mut app = Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v1.0", api)
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http());

    if state.config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app.layer(axum::middleware::from_fn(middleware::request_id))
        .layer(DefaultBodyLimit::max(state.config.body_limit_bytes))
        .with_state(state)
}

// =============================================================================
// Tests
// =============================================================================
