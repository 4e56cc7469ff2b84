use axum::{
    Json, Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use swift_rides::{
    handlers::{driver_handler, live_handler, ride_handler},
    state::{AppConfig, AppState},
};

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env();
    let bind_addr = config.bind_addr.clone();
    let app_state = AppState::new(config).unwrap();

    let app = Router::new()
        .route("/health", get(health))
        .route(
            "/rides",
            post(ride_handler::create_ride).get(ride_handler::list_my_rides),
        )
        .route("/rides/pending", get(ride_handler::list_pending_rides))
        .route("/rides/:id", get(ride_handler::get_ride))
        .route("/rides/:id/accept", post(ride_handler::accept_ride))
        .route("/rides/:id/reject", post(ride_handler::reject_ride))
        .route("/rides/:id/verify-code", post(ride_handler::verify_pickup_code))
        .route("/rides/:id/status", post(ride_handler::advance_status))
        .route("/rides/:id/location", post(ride_handler::report_location))
        .route("/rides/:id/shared/:token", get(ride_handler::get_shared_ride))
        .route("/rides/:id/live", get(live_handler::subscribe))
        .route("/drivers/available", get(driver_handler::find_available_drivers))
        .route("/drivers/availability", put(driver_handler::set_availability))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(app_state));

    tracing::info!("Listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
