// src/handlers/ride_handler.rs
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    errors::RideResult,
    models::ride::{CreateRideRequest, GeoPoint, RideResponse, RideStatus},
    models::user::Caller,
    services::{matching_service::MatchingOperations, ride_service::RideOperations},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceStatusRequest {
    pub status: RideStatus,
}

pub async fn create_ride(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<CreateRideRequest>,
) -> RideResult<(StatusCode, Json<RideResponse>)> {
    let ride = state.rides.create_ride(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(ride)))
}

pub async fn list_my_rides(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> RideResult<Json<Vec<RideResponse>>> {
    Ok(Json(state.rides.list_my_rides(&caller).await?))
}

/// Pending work for the calling driver; an empty page when they are not
/// online.
pub async fn list_pending_rides(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> RideResult<Json<Vec<RideResponse>>> {
    Ok(Json(state.matching.list_pending_rides(&caller.id).await?))
}

pub async fn get_ride(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(ride_id): Path<String>,
) -> RideResult<Json<RideResponse>> {
    Ok(Json(state.rides.get_ride(&ride_id, &caller).await?))
}

/// Read-only trip view behind the ride's share token; no caller identity
/// needed, and the pickup code never appears.
pub async fn get_shared_ride(
    State(state): State<Arc<AppState>>,
    Path((ride_id, token)): Path<(String, String)>,
) -> RideResult<Json<RideResponse>> {
    Ok(Json(state.rides.get_shared_ride(&ride_id, &token).await?))
}

pub async fn accept_ride(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(ride_id): Path<String>,
) -> RideResult<Json<RideResponse>> {
    Ok(Json(state.rides.accept_ride(&ride_id, &caller).await?))
}

pub async fn reject_ride(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(ride_id): Path<String>,
) -> RideResult<StatusCode> {
    state.rides.reject_ride(&ride_id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn verify_pickup_code(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(ride_id): Path<String>,
    Json(request): Json<VerifyCodeRequest>,
) -> RideResult<StatusCode> {
    state
        .rides
        .verify_pickup_code(&ride_id, &caller, &request.code)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn advance_status(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(ride_id): Path<String>,
    Json(request): Json<AdvanceStatusRequest>,
) -> RideResult<Json<RideResponse>> {
    let ride = state
        .rides
        .advance_status(&ride_id, &caller, request.status)
        .await?;
    Ok(Json(ride))
}

pub async fn report_location(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(ride_id): Path<String>,
    Json(location): Json<GeoPoint>,
) -> RideResult<StatusCode> {
    state
        .rides
        .report_location(&ride_id, &caller, location)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
